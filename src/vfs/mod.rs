//! Host-side VFS objects that wrapfs stacks on.
//!
//! These are the pieces a kernel would provide: backing superblocks with an
//! active-use counter, reference-counted mounts and dentries, a path
//! namespace, the mount table and the filesystem-type registry.

mod mount_table;
mod namespace;
mod path;
mod registry;

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;

pub use mount_table::MountTable;
pub use namespace::Namespace;
pub use path::{LookupFlags, PathRef, PathResolver};
pub use registry::{FileSystemRegistry, FileSystemType, FsFlags};

/// Device number identifying a superblock.
pub type DevId = u32;

bitflags! {
    /// Flags passed to a mount request.
    pub struct MountFlags: u32 {
        /// Suppress informational mount messages.
        const SILENT = 1 << 15;
    }
}

/// A mounted filesystem instance that wrapfs can stack on.
#[derive(Debug)]
pub struct SuperBlock {
    s_dev: DevId,
    s_type: String,
    s_maxbytes: u64,
    /// Active users; every stacked instance holds one.
    s_active: AtomicUsize,
}

impl SuperBlock {
    /// A new superblock with one active user (its own mount).
    pub fn new(s_dev: DevId, s_type: impl Into<String>, s_maxbytes: u64) -> Arc<Self> {
        Arc::new(Self {
            s_dev,
            s_type: s_type.into(),
            s_maxbytes,
            s_active: AtomicUsize::new(1),
        })
    }

    pub fn s_dev(&self) -> DevId {
        self.s_dev
    }

    pub fn fs_name(&self) -> &str {
        &self.s_type
    }

    pub fn s_maxbytes(&self) -> u64 {
        self.s_maxbytes
    }

    /// Current value of the active-use counter.
    pub fn active(&self) -> usize {
        self.s_active.load(Ordering::SeqCst)
    }
}

/// One active reference on a [`SuperBlock`], dropped exactly once.
#[derive(Debug)]
pub struct ActiveRef {
    sb: Arc<SuperBlock>,
}

impl ActiveRef {
    pub fn acquire(sb: &Arc<SuperBlock>) -> Self {
        sb.s_active.fetch_add(1, Ordering::SeqCst);
        Self { sb: sb.clone() }
    }

    pub fn sb(&self) -> &Arc<SuperBlock> {
        &self.sb
    }
}

impl Drop for ActiveRef {
    fn drop(&mut self) {
        self.sb.s_active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    Directory,
    File,
    Symlink,
}

/// Backing inode.
#[derive(Debug)]
pub struct Inode {
    i_ino: u64,
    i_sb: DevId,
    kind: InodeKind,
}

impl Inode {
    pub fn new(i_ino: u64, i_sb: DevId, kind: InodeKind) -> Arc<Self> {
        Arc::new(Self { i_ino, i_sb, kind })
    }

    pub fn ino(&self) -> u64 {
        self.i_ino
    }

    pub fn i_sb(&self) -> DevId {
        self.i_sb
    }

    pub fn kind(&self) -> InodeKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }
}

/// Backing directory entry. A `None` inode makes it negative.
#[derive(Debug)]
pub struct Dentry {
    d_name: String,
    d_inode: Option<Arc<Inode>>,
    d_sb: Arc<SuperBlock>,
    d_count: AtomicUsize,
}

impl Dentry {
    pub fn new(name: impl Into<String>, inode: Option<Arc<Inode>>, sb: Arc<SuperBlock>) -> Arc<Self> {
        Arc::new(Self {
            d_name: name.into(),
            d_inode: inode,
            d_sb: sb,
            d_count: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.d_name
    }

    pub fn inode(&self) -> Option<&Arc<Inode>> {
        self.d_inode.as_ref()
    }

    pub fn sb(&self) -> &Arc<SuperBlock> {
        &self.d_sb
    }

    /// Number of live path references on this dentry.
    pub fn count(&self) -> usize {
        self.d_count.load(Ordering::SeqCst)
    }
}

/// A backing filesystem attached somewhere in the namespace.
#[derive(Debug)]
pub struct VfsMount {
    mnt_devname: String,
    mnt_sb: Arc<SuperBlock>,
    mnt_count: AtomicUsize,
}

impl VfsMount {
    pub fn new(devname: impl Into<String>, sb: Arc<SuperBlock>) -> Arc<Self> {
        Arc::new(Self {
            mnt_devname: devname.into(),
            mnt_sb: sb,
            mnt_count: AtomicUsize::new(0),
        })
    }

    pub fn devname(&self) -> &str {
        &self.mnt_devname
    }

    pub fn sb(&self) -> &Arc<SuperBlock> {
        &self.mnt_sb
    }

    pub fn count(&self) -> usize {
        self.mnt_count.load(Ordering::SeqCst)
    }
}
