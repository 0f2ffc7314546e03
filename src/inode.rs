//! wrapfs inodes and binding them to backing inodes.

use alloc::format;
use alloc::string::ToString;
use alloc::sync::Arc;

use log::debug;

use crate::cache::ObjectCache;
use crate::dentry::WrapfsDentry;
use crate::error::{WrapfsError, WrapfsResult};
use crate::pool::PoolBox;
use crate::super_block::SuperDraft;
use crate::vfs::{DevId, Inode, InodeKind, PathRef};

/// Upper inode mirroring one backing inode.
#[derive(Debug)]
pub struct WrapfsInode {
    i_ino: u64,
    i_sb: DevId,
    lower: Arc<Inode>,
}

impl WrapfsInode {
    /// Upper inodes reuse the backing inode number.
    pub fn ino(&self) -> u64 {
        self.i_ino
    }

    pub fn sb_dev(&self) -> DevId {
        self.i_sb
    }

    pub fn kind(&self) -> InodeKind {
        self.lower.kind()
    }

    pub fn lower(&self) -> &Arc<Inode> {
        &self.lower
    }
}

/// Allocate an upper inode for `lower` from the inode cache.
pub fn wrapfs_iget(
    cache: &ObjectCache,
    s_dev: DevId,
    lower: &Arc<Inode>,
) -> WrapfsResult<PoolBox<WrapfsInode>> {
    cache.alloc(WrapfsInode {
        i_ino: lower.ino(),
        i_sb: s_dev,
        lower: lower.clone(),
    })
}

/// Binds a fresh upper dentry to the backing location it wraps.
///
/// On success the dentry is positive. On failure nothing the implementation
/// allocated may survive.
pub trait Interpose: Send + Sync {
    fn interpose(&self, dentry: &WrapfsDentry, sb: &SuperDraft, lower_path: &PathRef)
        -> WrapfsResult<()>;
}

/// Default binding: one upper inode per backing inode.
#[derive(Debug)]
pub struct InodeInterposer {
    inode_cache: Arc<ObjectCache>,
}

impl InodeInterposer {
    pub fn new(inode_cache: Arc<ObjectCache>) -> Self {
        Self { inode_cache }
    }
}

impl Interpose for InodeInterposer {
    fn interpose(
        &self,
        dentry: &WrapfsDentry,
        sb: &SuperDraft,
        lower_path: &PathRef,
    ) -> WrapfsResult<()> {
        let lower_dentry = lower_path.dentry();
        let lower_inode = lower_dentry.inode().ok_or_else(|| {
            WrapfsError::InterposeFailure(format!("negative lower dentry {}", lower_dentry.name()))
        })?;
        let lower_sb = sb
            .lower_sb()
            .ok_or_else(|| WrapfsError::InterposeFailure("no lower superblock".to_string()))?;
        if lower_inode.i_sb() != lower_sb.s_dev() {
            return Err(WrapfsError::InterposeFailure(format!(
                "lower inode {} is not on dev {}",
                lower_inode.ino(),
                lower_sb.s_dev()
            )));
        }

        let inode = wrapfs_iget(&self.inode_cache, sb.s_dev(), lower_inode)
            .map_err(|e| WrapfsError::InterposeFailure(format!("iget: {}", e)))?;
        dentry
            .instantiate(inode)
            .map_err(|e| WrapfsError::InterposeFailure(e.to_string()))?;
        debug!(
            "wrapfs: interposed ino {} on dev {}",
            lower_inode.ino(),
            sb.s_dev()
        );
        Ok(())
    }
}
