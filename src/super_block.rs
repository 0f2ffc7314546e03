//! wrapfs superblocks and the superblock initializer.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::fmt::Write;

use log::{debug, error, info};

use crate::dentry::{d_alloc_root, WrapfsDentry, WrapfsDentryInfo};
use crate::error::{WrapfsError, WrapfsResult};
use crate::fstype::{MountRequest, WrapfsFsType, WRAPFS_NAME};
use crate::pool::PoolBox;
use crate::tier::{TierList, TierSlot};
use crate::vfs::{ActiveRef, DevId, LookupFlags, MountFlags, SuperBlock};

/// Timestamp granularity of wrapfs instances, in nanoseconds.
pub const WRAPFS_TIME_GRAN: u32 = 1;

/// Superblock operation table.
#[derive(Debug)]
pub struct SuperOperations {
    pub show_options: fn(&WrapfsSuperBlock) -> String,
}

pub static WRAPFS_SOPS: SuperOperations = SuperOperations {
    show_options: wrapfs_show_options,
};

fn wrapfs_show_options(sb: &WrapfsSuperBlock) -> String {
    let mut out = String::new();
    let _ = write!(out, "lowerdir={}", sb.dev_name());
    if let Some(tiers) = sb.tiers() {
        for tier in tiers.iter() {
            let _ = write!(out, ",tier={}:{}", tier.label(), tier.path());
        }
    }
    out
}

/// Filesystem-private extension block of a wrapfs instance.
#[derive(Debug, Default)]
pub struct WrapfsSbInfo {
    lower_sb: Option<ActiveRef>,
    tiers: TierSlot,
}

impl WrapfsSbInfo {
    pub fn lower_sb(&self) -> Option<&Arc<SuperBlock>> {
        self.lower_sb.as_ref().map(|active| active.sb())
    }

    pub fn tiers(&self) -> &TierSlot {
        &self.tiers
    }
}

/// An instance under construction, before it has a root.
#[derive(Debug)]
pub struct SuperDraft {
    s_dev: DevId,
    s_flags: MountFlags,
    s_maxbytes: u64,
    s_time_gran: u32,
    s_op: &'static SuperOperations,
    s_fs_info: PoolBox<WrapfsSbInfo>,
    dev_name: String,
}

impl SuperDraft {
    pub fn s_dev(&self) -> DevId {
        self.s_dev
    }

    pub fn s_flags(&self) -> MountFlags {
        self.s_flags
    }

    pub fn s_maxbytes(&self) -> u64 {
        self.s_maxbytes
    }

    pub fn lower_sb(&self) -> Option<&Arc<SuperBlock>> {
        self.s_fs_info.lower_sb()
    }

    pub fn dev_name(&self) -> &str {
        &self.dev_name
    }

    fn finish(self, s_root: Arc<WrapfsDentry>) -> WrapfsSuperBlock {
        WrapfsSuperBlock {
            s_root,
            s_fs_info: self.s_fs_info,
            s_dev: self.s_dev,
            s_flags: self.s_flags,
            s_maxbytes: self.s_maxbytes,
            s_time_gran: self.s_time_gran,
            s_op: self.s_op,
            dev_name: self.dev_name,
        }
    }
}

/// A mounted wrapfs instance.
///
/// The root goes before the extension block on teardown, so the lower path
/// is released before the active reference on the backing instance.
#[derive(Debug)]
pub struct WrapfsSuperBlock {
    s_root: Arc<WrapfsDentry>,
    s_fs_info: PoolBox<WrapfsSbInfo>,
    s_dev: DevId,
    s_flags: MountFlags,
    s_maxbytes: u64,
    s_time_gran: u32,
    s_op: &'static SuperOperations,
    dev_name: String,
}

impl WrapfsSuperBlock {
    pub fn s_dev(&self) -> DevId {
        self.s_dev
    }

    pub fn s_flags(&self) -> MountFlags {
        self.s_flags
    }

    pub fn s_maxbytes(&self) -> u64 {
        self.s_maxbytes
    }

    pub fn s_time_gran(&self) -> u32 {
        self.s_time_gran
    }

    pub fn s_op(&self) -> &'static SuperOperations {
        self.s_op
    }

    pub fn root(&self) -> &Arc<WrapfsDentry> {
        &self.s_root
    }

    pub fn dev_name(&self) -> &str {
        &self.dev_name
    }

    pub fn lower_sb(&self) -> Option<&Arc<SuperBlock>> {
        self.s_fs_info.lower_sb()
    }

    pub fn tier_slot(&self) -> &TierSlot {
        self.s_fs_info.tiers()
    }

    /// Published tiers, if any were published.
    pub fn tiers(&self) -> Option<&TierList> {
        self.tier_slot().get()
    }

    pub fn show_options(&self) -> String {
        (self.s_op.show_options)(self)
    }
}

impl Drop for WrapfsSuperBlock {
    fn drop(&mut self) {
        debug!("wrapfs: releasing instance dev {} ({})", self.s_dev, self.dev_name);
    }
}

/// Fill a new wrapfs instance stacked on `request.dev_name`.
///
/// Every resource taken here is owned by a local, so an early return gives
/// them back in reverse order.
pub fn read_super(
    fs: &WrapfsFsType,
    s_dev: DevId,
    request: &MountRequest<'_>,
) -> WrapfsResult<WrapfsSuperBlock> {
    let dev_name = match request.dev_name {
        Some(name) if !name.is_empty() => name,
        _ => {
            error!("wrapfs: read_super: missing dev_name argument");
            return Err(WrapfsError::InvalidArgument("missing dev_name".to_string()));
        }
    };

    // 1. find the lower directory
    let lower_path = fs
        .resolver()
        .resolve(dev_name, LookupFlags::FOLLOW | LookupFlags::DIRECTORY)
        .map_err(|e| {
            error!("wrapfs: error accessing lower directory '{}': {}", dev_name, e);
            e
        })?;

    // 2. private extension block
    let mut s_fs_info = PoolBox::try_new_in(WrapfsSbInfo::default(), fs.pool().clone())?;

    // 3. pin the backing instance
    let lower_sb = lower_path.sb().clone();
    s_fs_info.lower_sb = Some(ActiveRef::acquire(&lower_sb));

    // 4. inherit limits
    let draft = SuperDraft {
        s_dev,
        s_flags: request.flags,
        s_maxbytes: lower_sb.s_maxbytes(),
        s_time_gran: WRAPFS_TIME_GRAN,
        s_op: &WRAPFS_SOPS,
        s_fs_info,
        dev_name: dev_name.to_string(),
    };

    // 5. root dentry, with our own dentry operations
    let root = d_alloc_root(fs.pool(), s_dev).ok_or(WrapfsError::OutOfMemory)?;

    // 6. private linkage for the root
    let mut root_info = fs.caches().dentry.alloc(WrapfsDentryInfo::default())?;

    // 7. the root owns the lower path from here on
    root_info.set_lower_path(lower_path);
    let root_info = root.attach_info(root_info)?;

    // 8. bind the root to the lower inode
    let lower_path = root_info
        .lower_path()
        .ok_or_else(|| WrapfsError::InterposeFailure("root has no lower path".to_string()))?;
    fs.interposer()
        .interpose(&root, &draft, lower_path)
        .map_err(|e| {
            error!("wrapfs: interpose failed on {}: {}", dev_name, e);
            match e {
                WrapfsError::InterposeFailure(_) => e,
                other => WrapfsError::InterposeFailure(other.to_string()),
            }
        })?;

    if !request.flags.contains(MountFlags::SILENT) {
        info!(
            "{}: mounted on top of {} type {}",
            WRAPFS_NAME,
            dev_name,
            lower_sb.fs_name()
        );
    }
    Ok(draft.finish(root))
}
