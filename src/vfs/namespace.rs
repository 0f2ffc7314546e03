//! In-memory path namespace used to resolve backing locations.
//!
//! Paths are routed to the backing mount owning the longest matching
//! prefix: every node records the mount it was created under, and mounting a
//! backing filesystem on a directory replaces that node with the new
//! filesystem's root.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use log::debug;
use spin::RwLock;

use super::path::{LookupFlags, PathRef, PathResolver};
use super::{Dentry, DevId, Inode, InodeKind, SuperBlock, VfsMount};
use crate::config::{WrapfsConfig, MAX_SYMLINKS};
use crate::error::{WrapfsError, WrapfsResult};

const ROOT_DEV: DevId = 1;
const ROOT_INO: u64 = 1;
/// Largest file size a 64-bit kernel allows.
pub const MAX_LFS_FILESIZE: u64 = i64::MAX as u64;

struct NsNode {
    mnt: Arc<VfsMount>,
    dentry: Arc<Dentry>,
    link: Option<String>,
}

impl NsNode {
    fn is_dir(&self) -> bool {
        self.dentry.inode().map(|inode| inode.is_dir()).unwrap_or(false)
    }
}

/// A tree of backing filesystems addressed by absolute path.
pub struct Namespace {
    /// Nodes keyed by normalized absolute path.
    nodes: RwLock<BTreeMap<String, NsNode>>,
    next_ino: AtomicU64,
    next_dev: AtomicU32,
    max_symlinks: usize,
}

impl core::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Namespace")
            .field("nodes", &self.nodes.read().len())
            .finish()
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    /// A namespace holding only a `rootfs` directory at `/`.
    pub fn new() -> Self {
        let sb = SuperBlock::new(ROOT_DEV, "rootfs", MAX_LFS_FILESIZE);
        let mnt = VfsMount::new("rootfs", sb.clone());
        let root = Dentry::new("/", Some(Inode::new(ROOT_INO, ROOT_DEV, InodeKind::Directory)), sb);

        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            NsNode {
                mnt,
                dentry: root,
                link: None,
            },
        );
        Self {
            nodes: RwLock::new(nodes),
            next_ino: AtomicU64::new(ROOT_INO + 1),
            next_dev: AtomicU32::new(ROOT_DEV + 1),
            max_symlinks: MAX_SYMLINKS,
        }
    }

    /// A fresh namespace whose lookups follow at most
    /// `config.max_symlinks` links.
    pub fn with_config(config: &WrapfsConfig) -> Self {
        Self::new().with_max_symlinks(config.max_symlinks)
    }

    pub fn with_max_symlinks(mut self, max_symlinks: usize) -> Self {
        self.max_symlinks = max_symlinks;
        self
    }

    pub fn mkdir(&self, path: &str) -> WrapfsResult<()> {
        self.add_node(path, InodeKind::Directory, None)
    }

    pub fn create(&self, path: &str) -> WrapfsResult<()> {
        self.add_node(path, InodeKind::File, None)
    }

    pub fn symlink(&self, path: &str, target: &str) -> WrapfsResult<()> {
        self.add_node(path, InodeKind::Symlink, Some(target.to_string()))
    }

    /// Attach a fresh backing filesystem on the empty directory `path`.
    pub fn mount_backing(
        &self,
        path: &str,
        fs_type: &str,
        s_maxbytes: u64,
    ) -> WrapfsResult<Arc<SuperBlock>> {
        let path = normalize(path)?;
        let mut nodes = self.nodes.write();

        let node = nodes
            .get(&path)
            .ok_or_else(|| WrapfsError::NotFound(path.clone()))?;
        if !node.is_dir() {
            return Err(WrapfsError::NotADirectory(path));
        }
        let prefix = if path == "/" {
            path.clone()
        } else {
            format!("{}/", path)
        };
        if nodes.keys().any(|key| *key != path && key.starts_with(&prefix)) {
            return Err(WrapfsError::Busy(path));
        }

        let s_dev = self.next_dev.fetch_add(1, Ordering::SeqCst);
        let sb = SuperBlock::new(s_dev, fs_type, s_maxbytes);
        let mnt = VfsMount::new(fs_type, sb.clone());
        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        let root = Dentry::new(
            last_component(&path),
            Some(Inode::new(ino, s_dev, InodeKind::Directory)),
            sb.clone(),
        );
        debug!("namespace: mounted {} (dev {}) on {}", fs_type, s_dev, path);
        nodes.insert(
            path,
            NsNode {
                mnt,
                dentry: root,
                link: None,
            },
        );
        Ok(sb)
    }

    /// Outstanding path references on the dentry at `path` (not followed).
    pub fn ref_count(&self, path: &str) -> WrapfsResult<usize> {
        let path = normalize(path)?;
        self.nodes
            .read()
            .get(&path)
            .map(|node| node.dentry.count())
            .ok_or(WrapfsError::NotFound(path))
    }

    fn add_node(&self, path: &str, kind: InodeKind, link: Option<String>) -> WrapfsResult<()> {
        let path = normalize(path)?;
        if path == "/" {
            return Err(WrapfsError::AlreadyExists(path));
        }
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&path) {
            return Err(WrapfsError::AlreadyExists(path));
        }

        let parent_path = parent_of(&path);
        let parent = nodes
            .get(parent_path)
            .ok_or_else(|| WrapfsError::NotFound(parent_path.to_string()))?;
        if !parent.is_dir() {
            return Err(WrapfsError::NotADirectory(parent_path.to_string()));
        }

        let mnt = parent.mnt.clone();
        let sb = mnt.sb().clone();
        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        let dentry = Dentry::new(last_component(&path), Some(Inode::new(ino, sb.s_dev(), kind)), sb);
        nodes.insert(path, NsNode { mnt, dentry, link });
        Ok(())
    }

    fn walk(&self, path: &str, flags: LookupFlags) -> WrapfsResult<PathRef> {
        if path.is_empty() {
            return Err(WrapfsError::NotFound(String::new()));
        }
        if !path.starts_with('/') || path.contains('\0') {
            return Err(WrapfsError::InvalidPath(path.to_string()));
        }

        let nodes = self.nodes.read();
        // Stack of names still to walk; the top is the next component.
        let mut pending: Vec<String> = components(path).rev().map(String::from).collect();
        let mut resolved: Vec<String> = Vec::new();
        let mut links = 0;

        while let Some(name) = pending.pop() {
            match name.as_str() {
                "." => continue,
                ".." => {
                    resolved.pop();
                    continue;
                }
                _ => resolved.push(name),
            }

            let key = join(&resolved);
            let node = nodes
                .get(&key)
                .ok_or_else(|| WrapfsError::NotFound(path.to_string()))?;
            let last = pending.is_empty();

            if let Some(target) = &node.link {
                if last && !flags.contains(LookupFlags::FOLLOW) {
                    break;
                }
                links += 1;
                if links > self.max_symlinks {
                    return Err(WrapfsError::TooManySymlinks(path.to_string()));
                }
                resolved.pop();
                if target.starts_with('/') {
                    resolved.clear();
                }
                pending.extend(components(target).rev().map(String::from));
                continue;
            }

            if !last && !node.is_dir() {
                return Err(WrapfsError::NotADirectory(key));
            }
        }

        let key = join(&resolved);
        let node = nodes
            .get(&key)
            .ok_or_else(|| WrapfsError::NotFound(path.to_string()))?;
        if flags.contains(LookupFlags::DIRECTORY) && !node.is_dir() {
            return Err(WrapfsError::NotADirectory(path.to_string()));
        }
        Ok(PathRef::acquire(&node.mnt, &node.dentry))
    }
}

impl PathResolver for Namespace {
    fn resolve(&self, path: &str, flags: LookupFlags) -> WrapfsResult<PathRef> {
        self.walk(path, flags)
    }
}

fn components(path: &str) -> impl DoubleEndedIterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

fn join(parts: &[String]) -> String {
    if parts.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    out
}

/// Lexical normalization: absolute, no `.`/`..`, no duplicate slashes.
fn normalize(path: &str) -> WrapfsResult<String> {
    if !path.starts_with('/') || path.contains('\0') {
        return Err(WrapfsError::InvalidPath(path.to_string()));
    }
    let mut parts: Vec<String> = Vec::new();
    for part in components(path) {
        match part {
            "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part.to_string()),
        }
    }
    Ok(join(&parts))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn last_component(path: &str) -> &str {
    components(path).next_back().unwrap_or("/")
}
