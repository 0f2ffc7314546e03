//! Fault-injecting collaborators shared by the mount and tier tests.

use alloc::sync::Arc;
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::WrapfsConfig;
use crate::dentry::WrapfsDentry;
use crate::error::{WrapfsError, WrapfsResult};
use crate::fstype::{init_wrapfs, WrapfsEnv, WrapfsFsType, WrapfsMountTable};
use crate::inode::Interpose;
use crate::pool::{MemoryPool, SystemPool};
use crate::super_block::SuperDraft;
use crate::vfs::{
    FileSystemRegistry, LookupFlags, Namespace, PathRef, PathResolver, SuperBlock,
};

pub const NEVER: usize = 0;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Pool failing its Nth allocation after being armed (1-based).
#[derive(Default)]
pub struct FaultPool {
    fail_at: AtomicUsize,
    seen: AtomicUsize,
    live: AtomicUsize,
}

impl FaultPool {
    /// Reset the allocation count and fail allocation `n` from now on.
    pub fn arm(&self, n: usize) {
        self.seen.store(0, Ordering::SeqCst);
        self.fail_at.store(n, Ordering::SeqCst);
    }

    /// Allocations attempted since the last `arm`.
    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl MemoryPool for FaultPool {
    fn alloc_zeroed(&self, layout: Layout) -> WrapfsResult<NonNull<u8>> {
        let nth = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if nth == self.fail_at.load(Ordering::SeqCst) {
            return Err(WrapfsError::OutOfMemory);
        }
        let ptr = SystemPool.alloc_zeroed(layout)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        SystemPool.dealloc(ptr, layout);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolver failing its Nth lookup after being armed (1-based).
pub struct FaultResolver {
    inner: Arc<Namespace>,
    fail_at: AtomicUsize,
    seen: AtomicUsize,
}

impl FaultResolver {
    pub fn new(inner: Arc<Namespace>) -> Self {
        Self {
            inner,
            fail_at: AtomicUsize::new(NEVER),
            seen: AtomicUsize::new(0),
        }
    }

    pub fn arm(&self, n: usize) {
        self.seen.store(0, Ordering::SeqCst);
        self.fail_at.store(n, Ordering::SeqCst);
    }
}

impl PathResolver for FaultResolver {
    fn resolve(&self, path: &str, flags: LookupFlags) -> WrapfsResult<PathRef> {
        let nth = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if nth == self.fail_at.load(Ordering::SeqCst) {
            return Err(WrapfsError::NotFound(path.into()));
        }
        self.inner.resolve(path, flags)
    }
}

/// Interpose that always refuses, counting its calls.
#[derive(Default)]
pub struct FailingInterposer {
    pub calls: AtomicUsize,
}

impl Interpose for FailingInterposer {
    fn interpose(&self, _: &WrapfsDentry, _: &SuperDraft, _: &PathRef) -> WrapfsResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(WrapfsError::InterposeFailure("refused".into()))
    }
}

/// A namespace with an ext4 backing filesystem at `/lower`:
///
/// ```text
/// /lower          ext4 root
/// /lower/a        dir
/// /lower/b        dir
/// /lower/file     regular file
/// /lower/to_a     -> /lower/a
/// /mnt            rootfs dir
/// ```
pub struct Fixture {
    pub ns: Arc<Namespace>,
    pub resolver: Arc<FaultResolver>,
    pub pool: Arc<FaultPool>,
    pub registry: FileSystemRegistry,
    pub table: WrapfsMountTable,
    pub fs: Arc<WrapfsFsType>,
    pub lower_sb: Arc<SuperBlock>,
}

pub const LOWER_MAXBYTES: u64 = 1 << 40;

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(WrapfsConfig::default())
    }

    pub fn with_config(config: WrapfsConfig) -> Self {
        init_logger();
        let ns = Arc::new(Namespace::with_config(&config));
        ns.mkdir("/lower").unwrap();
        let lower_sb = ns.mount_backing("/lower", "ext4", LOWER_MAXBYTES).unwrap();
        ns.mkdir("/lower/a").unwrap();
        ns.mkdir("/lower/b").unwrap();
        ns.create("/lower/file").unwrap();
        ns.symlink("/lower/to_a", "/lower/a").unwrap();
        ns.mkdir("/mnt").unwrap();

        let resolver = Arc::new(FaultResolver::new(ns.clone()));
        let pool = Arc::new(FaultPool::default());
        let registry = FileSystemRegistry::new();
        let env = WrapfsEnv::new(resolver.clone())
            .with_pool(pool.clone())
            .with_config(config);
        let fs = init_wrapfs(&registry, env).unwrap();
        Self {
            ns,
            resolver,
            pool,
            registry,
            table: WrapfsMountTable::new(),
            fs,
            lower_sb,
        }
    }

    /// Counters a failed mount must leave untouched.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            active: self.lower_sb.active(),
            pool_live: self.pool.live(),
            inode_live: self.fs.caches().inode.live(),
            dentry_live: self.fs.caches().dentry.live(),
            lower_refs: self.ns.ref_count("/lower").unwrap(),
            a_refs: self.ns.ref_count("/lower/a").unwrap(),
            b_refs: self.ns.ref_count("/lower/b").unwrap(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub active: usize,
    pub pool_live: usize,
    pub inode_live: usize,
    pub dentry_live: usize,
    pub lower_refs: usize,
    pub a_refs: usize,
    pub b_refs: usize,
}
