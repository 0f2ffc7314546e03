//! Fallible memory for superblock and dentry private data.
//!
//! Every allocation made while building an instance goes through a
//! [`MemoryPool`], so running out of memory is an ordinary error instead of
//! an abort. [`PoolBox`] owns one value placed in a pool and gives the memory
//! back when dropped.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use buddy_system_allocator::LockedHeap;

use crate::error::{WrapfsError, WrapfsResult};

/// Source of zeroed memory blocks.
pub trait MemoryPool: Send + Sync {
    /// Allocate a zeroed block. `layout` must have a non-zero size.
    fn alloc_zeroed(&self, layout: Layout) -> WrapfsResult<NonNull<u8>>;

    /// Return a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `alloc_zeroed` on this pool with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPool;

impl MemoryPool for SystemPool {
    fn alloc_zeroed(&self, layout: Layout) -> WrapfsResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(WrapfsError::OutOfMemory);
        }
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or(WrapfsError::OutOfMemory)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

const PAGE_SIZE: usize = 4096;

#[repr(C, align(4096))]
struct Page([u8; PAGE_SIZE]);

/// A bounded pool carved out of one fixed arena by a buddy allocator.
pub struct BuddyPool {
    heap: LockedHeap<32>,
    arena: NonNull<[Page]>,
}

// The arena is only touched through the locked heap.
unsafe impl Send for BuddyPool {}
unsafe impl Sync for BuddyPool {}

impl BuddyPool {
    /// A pool managing `bytes` bytes, rounded up to whole pages.
    pub fn new(bytes: usize) -> Self {
        let pages = bytes.div_ceil(PAGE_SIZE).max(1);
        let arena: Box<[Page]> = (0..pages).map(|_| Page([0; PAGE_SIZE])).collect();
        let arena = NonNull::from(Box::leak(arena));
        let heap = LockedHeap::<32>::empty();
        unsafe {
            heap.lock()
                .init(arena.as_ptr() as *mut Page as usize, pages * PAGE_SIZE);
        }
        Self { heap, arena }
    }

    /// Bytes currently handed out, as requested by callers.
    pub fn in_use(&self) -> usize {
        self.heap.lock().stats_alloc_user()
    }

    /// Bytes under management.
    pub fn capacity(&self) -> usize {
        self.heap.lock().stats_total_bytes()
    }
}

impl MemoryPool for BuddyPool {
    fn alloc_zeroed(&self, layout: Layout) -> WrapfsResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(WrapfsError::OutOfMemory);
        }
        let ptr = self
            .heap
            .lock()
            .alloc(layout)
            .map_err(|_| WrapfsError::OutOfMemory)?;
        unsafe { ptr.as_ptr().write_bytes(0, layout.size()) };
        Ok(ptr)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        self.heap.lock().dealloc(ptr, layout);
    }
}

impl Drop for BuddyPool {
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(self.arena.as_ptr())) };
    }
}

impl fmt::Debug for BuddyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyPool")
            .field("in_use", &self.in_use())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// A value living in a [`MemoryPool`] block.
pub struct PoolBox<T> {
    ptr: NonNull<T>,
    pool: Arc<dyn MemoryPool>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for PoolBox<T> {}
unsafe impl<T: Sync> Sync for PoolBox<T> {}

impl<T> PoolBox<T> {
    /// Move `value` into a fresh zeroed block. On failure `value` is dropped.
    pub fn try_new_in(value: T, pool: Arc<dyn MemoryPool>) -> WrapfsResult<Self> {
        let layout = Layout::new::<T>();
        let ptr = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            pool.alloc_zeroed(layout)?.cast::<T>()
        };
        unsafe { ptr.as_ptr().write(value) };
        Ok(Self {
            ptr,
            pool,
            _marker: PhantomData,
        })
    }
}

impl<T> Deref for PoolBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for PoolBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for PoolBox<T> {
    fn drop(&mut self) {
        let layout = Layout::new::<T>();
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            if layout.size() != 0 {
                self.pool.dealloc(self.ptr.cast::<u8>(), layout);
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
