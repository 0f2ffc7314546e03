//! Object caches for wrapfs inodes and dentry private data.

use alloc::sync::Arc;
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, warn};

use crate::error::{WrapfsError, WrapfsResult};
use crate::pool::{MemoryPool, PoolBox};

/// Accounting wrapper counting the blocks a cache has handed out.
struct CachePool {
    inner: Arc<dyn MemoryPool>,
    live: AtomicUsize,
    destroyed: AtomicBool,
}

impl MemoryPool for CachePool {
    fn alloc_zeroed(&self, layout: Layout) -> WrapfsResult<NonNull<u8>> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(WrapfsError::OutOfMemory);
        }
        let ptr = self.inner.alloc_zeroed(layout)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        self.inner.dealloc(ptr, layout);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Descriptor each cache keeps in its backing pool while it exists.
#[derive(Debug)]
struct CacheHeader {
    name: &'static str,
}

/// A named cache of same-purpose objects.
pub struct ObjectCache {
    pool: Arc<CachePool>,
    header: PoolBox<CacheHeader>,
}

impl ObjectCache {
    /// Create a cache. Fails if the pool cannot hold the cache descriptor.
    pub fn create(name: &'static str, pool: Arc<dyn MemoryPool>) -> WrapfsResult<Self> {
        let header = PoolBox::try_new_in(CacheHeader { name }, pool.clone())?;
        debug!("cache {} created", name);
        Ok(Self {
            pool: Arc::new(CachePool {
                inner: pool,
                live: AtomicUsize::new(0),
                destroyed: AtomicBool::new(false),
            }),
            header,
        })
    }

    pub fn name(&self) -> &'static str {
        self.header.name
    }

    /// Place `value` in a block from this cache.
    pub fn alloc<T>(&self, value: T) -> WrapfsResult<PoolBox<T>> {
        PoolBox::try_new_in(value, self.pool.clone())
    }

    /// Objects allocated and not yet freed.
    pub fn live(&self) -> usize {
        self.pool.live.load(Ordering::SeqCst)
    }

    /// Refuse further allocations; returns the number of leaked objects.
    pub fn destroy(&self) -> usize {
        self.pool.destroyed.store(true, Ordering::SeqCst);
        let live = self.live();
        if live != 0 {
            warn!("cache {}: destroyed with {} live objects", self.name(), live);
        }
        live
    }
}

impl core::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("name", &self.name())
            .field("live", &self.live())
            .finish()
    }
}

/// The caches a wrapfs registration owns.
#[derive(Debug)]
pub struct WrapfsCaches {
    pub inode: Arc<ObjectCache>,
    pub dentry: Arc<ObjectCache>,
}

impl WrapfsCaches {
    pub fn init(pool: Arc<dyn MemoryPool>) -> WrapfsResult<Self> {
        let inode = Arc::new(ObjectCache::create("wrapfs_inode_cache", pool.clone())?);
        let dentry = match ObjectCache::create("wrapfs_dentry", pool) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                inode.destroy();
                return Err(e);
            }
        };
        Ok(Self { inode, dentry })
    }

    /// Destroy both caches; returns the total number of leaked objects.
    pub fn destroy(&self) -> usize {
        self.inode.destroy() + self.dentry.destroy()
    }
}
