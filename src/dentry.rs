//! wrapfs directory entries and the synthetic root builder.

use alloc::sync::{Arc, Weak};
use core::ptr;

use log::debug;
use spin::Once;

use crate::error::{WrapfsError, WrapfsResult};
use crate::inode::WrapfsInode;
use crate::pool::{MemoryPool, PoolBox};
use crate::vfs::{DevId, PathRef};

/// Names up to this length are stored inline in the dentry's name slot.
pub const DNAME_INLINE_LEN: usize = 32;

/// Inline dentry name.
#[derive(Debug)]
pub struct DentryName {
    len: u8,
    bytes: [u8; DNAME_INLINE_LEN],
}

impl DentryName {
    pub fn new(name: &str) -> Option<Self> {
        if name.is_empty() || name.len() > DNAME_INLINE_LEN {
            return None;
        }
        let mut bytes = [0; DNAME_INLINE_LEN];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Some(Self {
            len: name.len() as u8,
            bytes,
        })
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }
}

/// Operation table installed on wrapfs dentries.
#[derive(Debug)]
pub struct DentryOperations {
    pub d_revalidate: fn(&WrapfsDentry) -> bool,
}

pub static WRAPFS_DOPS: DentryOperations = DentryOperations {
    d_revalidate: wrapfs_d_revalidate,
};

/// A wrapfs dentry stays valid while its lower dentry is positive.
fn wrapfs_d_revalidate(dentry: &WrapfsDentry) -> bool {
    dentry
        .lower_path()
        .map(|path| path.dentry().inode().is_some())
        .unwrap_or(false)
}

/// Private data linking a wrapfs dentry to its lower path.
#[derive(Debug, Default)]
pub struct WrapfsDentryInfo {
    lower_path: Option<PathRef>,
}

impl WrapfsDentryInfo {
    /// Take ownership of `path`; a previously held path is released.
    pub fn set_lower_path(&mut self, path: PathRef) {
        self.lower_path = Some(path);
    }

    pub fn lower_path(&self) -> Option<&PathRef> {
        self.lower_path.as_ref()
    }
}

/// A directory entry of a wrapfs instance.
///
/// Field order is teardown order: the inode goes first, then the private
/// data (releasing the lower path), then the name slot.
#[derive(Debug)]
pub struct WrapfsDentry {
    d_inode: Once<PoolBox<WrapfsInode>>,
    d_fsdata: Once<PoolBox<WrapfsDentryInfo>>,
    d_name: PoolBox<DentryName>,
    d_parent: Weak<WrapfsDentry>,
    d_sb: DevId,
    d_op: &'static DentryOperations,
}

impl WrapfsDentry {
    pub fn name(&self) -> &str {
        self.d_name.as_str()
    }

    pub fn parent(&self) -> Option<Arc<WrapfsDentry>> {
        self.d_parent.upgrade()
    }

    pub fn is_root(&self) -> bool {
        ptr::eq(self.d_parent.as_ptr(), self)
    }

    /// Device number of the owning instance.
    pub fn sb_dev(&self) -> DevId {
        self.d_sb
    }

    pub fn ops(&self) -> &'static DentryOperations {
        self.d_op
    }

    pub fn revalidate(&self) -> bool {
        (self.d_op.d_revalidate)(self)
    }

    /// Attach private data. A dentry takes private data once; a second
    /// `info` is dropped and the call fails.
    pub fn attach_info(&self, info: PoolBox<WrapfsDentryInfo>) -> WrapfsResult<&WrapfsDentryInfo> {
        let mut fresh = false;
        let stored = self.d_fsdata.call_once(|| {
            fresh = true;
            info
        });
        if !fresh {
            return Err(WrapfsError::AlreadyExists(self.name().into()));
        }
        Ok(stored)
    }

    pub fn info(&self) -> Option<&WrapfsDentryInfo> {
        self.d_fsdata.get().map(|info| &**info)
    }

    pub fn lower_path(&self) -> Option<&PathRef> {
        self.info()?.lower_path()
    }

    /// Make the dentry positive.
    pub fn instantiate(&self, inode: PoolBox<WrapfsInode>) -> WrapfsResult<&WrapfsInode> {
        let mut fresh = false;
        let stored = self.d_inode.call_once(|| {
            fresh = true;
            inode
        });
        if !fresh {
            return Err(WrapfsError::AlreadyExists(self.name().into()));
        }
        Ok(stored)
    }

    pub fn inode(&self) -> Option<&WrapfsInode> {
        self.d_inode.get().map(|inode| &**inode)
    }
}

/// Build the root dentry of a new instance by hand.
///
/// The generic root allocator would install the host's default dentry
/// operations; the wrapfs root needs [`WRAPFS_DOPS`] before interpose runs.
/// Returns `None` when the name slot cannot be allocated.
pub fn d_alloc_root(pool: &Arc<dyn MemoryPool>, s_dev: DevId) -> Option<Arc<WrapfsDentry>> {
    debug!("wrapfs: allocating root dentry for dev {}", s_dev);
    let name = DentryName::new("/")?;
    let d_name = PoolBox::try_new_in(name, pool.clone()).ok()?;
    Some(Arc::new_cyclic(|me| WrapfsDentry {
        d_inode: Once::new(),
        d_fsdata: Once::new(),
        d_name,
        d_parent: me.clone(),
        d_sb: s_dev,
        d_op: &WRAPFS_DOPS,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BuddyPool, SystemPool};

    #[test]
    fn test_root_is_its_own_parent() {
        let pool: Arc<dyn MemoryPool> = Arc::new(SystemPool);
        let root = d_alloc_root(&pool, 0x100).unwrap();
        assert!(root.is_root());
        assert!(Arc::ptr_eq(&root.parent().unwrap(), &root));
        assert_eq!(root.name(), "/");
        assert_eq!(root.sb_dev(), 0x100);
        assert!(ptr::eq(root.ops(), &WRAPFS_DOPS));
        assert!(root.inode().is_none());
    }

    #[test]
    fn test_root_without_lower_path_is_invalid() {
        let pool: Arc<dyn MemoryPool> = Arc::new(SystemPool);
        let root = d_alloc_root(&pool, 1).unwrap();
        assert!(!root.revalidate());
    }

    #[test]
    fn test_root_allocation_failure() {
        let buddy = Arc::new(BuddyPool::new(4096));
        let pool: Arc<dyn MemoryPool> = buddy.clone();
        let _hog = PoolBox::try_new_in([0u8; 4096], pool.clone()).unwrap();
        assert!(d_alloc_root(&pool, 1).is_none());
    }

    #[test]
    fn test_second_attach_rejected() {
        let pool: Arc<dyn MemoryPool> = Arc::new(SystemPool);
        let root = d_alloc_root(&pool, 1).unwrap();
        let first = PoolBox::try_new_in(WrapfsDentryInfo::default(), pool.clone()).unwrap();
        assert!(root.attach_info(first).is_ok());

        let second = PoolBox::try_new_in(WrapfsDentryInfo::default(), pool.clone()).unwrap();
        assert_eq!(
            root.attach_info(second).unwrap_err(),
            WrapfsError::AlreadyExists("/".into())
        );
        assert!(root.info().is_some());
    }

    #[test]
    fn test_long_names_do_not_fit_inline() {
        assert!(DentryName::new(&"x".repeat(DNAME_INLINE_LEN + 1)).is_none());
        assert_eq!(DentryName::new("tier0").unwrap().as_str(), "tier0");
    }
}
