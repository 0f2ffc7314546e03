use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::Ordering;

use bitflags::bitflags;

use super::{Dentry, SuperBlock, VfsMount};
use crate::error::WrapfsResult;

bitflags! {
    /// Lookup behaviour for [`PathResolver::resolve`].
    pub struct LookupFlags: u32 {
        /// Follow a symlink in the final component.
        const FOLLOW = 0x0001;
        /// The final component must be a directory.
        const DIRECTORY = 0x0002;
    }
}

/// Resolves path strings to referenced locations.
pub trait PathResolver: Send + Sync {
    fn resolve(&self, path: &str, flags: LookupFlags) -> WrapfsResult<PathRef>;
}

/// A (mount, dentry) pair holding one reference on each.
///
/// Not `Clone`: a second reference is taken with [`PathRef::get`], and the
/// reference is given back when the value is dropped.
pub struct PathRef {
    mnt: Arc<VfsMount>,
    dentry: Arc<Dentry>,
}

impl PathRef {
    pub(crate) fn acquire(mnt: &Arc<VfsMount>, dentry: &Arc<Dentry>) -> Self {
        mnt.mnt_count.fetch_add(1, Ordering::SeqCst);
        dentry.d_count.fetch_add(1, Ordering::SeqCst);
        Self {
            mnt: mnt.clone(),
            dentry: dentry.clone(),
        }
    }

    /// Take an additional reference on the same location.
    pub fn get(&self) -> Self {
        Self::acquire(&self.mnt, &self.dentry)
    }

    pub fn mnt(&self) -> &Arc<VfsMount> {
        &self.mnt
    }

    pub fn dentry(&self) -> &Arc<Dentry> {
        &self.dentry
    }

    /// Superblock the dentry lives on.
    pub fn sb(&self) -> &Arc<SuperBlock> {
        self.dentry.sb()
    }
}

impl Drop for PathRef {
    fn drop(&mut self) {
        self.dentry.d_count.fetch_sub(1, Ordering::SeqCst);
        self.mnt.mnt_count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathRef")
            .field("mnt", &self.mnt.devname())
            .field("dentry", &self.dentry.name())
            .finish()
    }
}
