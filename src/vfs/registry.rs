//! Registry of filesystem types known to the host.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use log::info;
use spin::RwLock;

use crate::error::{WrapfsError, WrapfsResult};

bitflags! {
    /// Per-type filesystem flags.
    pub struct FsFlags: u32 {
        /// Dentries must be revalidated even for "." lookups.
        const REVAL_DOT = 16384;
    }
}

/// A filesystem type as seen by the registry.
pub trait FileSystemType: Send + Sync {
    fn name(&self) -> &str;
    fn fs_flags(&self) -> FsFlags;
}

#[derive(Default)]
pub struct FileSystemRegistry {
    types: RwLock<BTreeMap<String, Arc<dyn FileSystemType>>>,
}

impl FileSystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, fs_type: Arc<dyn FileSystemType>) -> WrapfsResult<()> {
        let name = fs_type.name().to_string();
        let mut types = self.types.write();
        if types.contains_key(&name) {
            return Err(WrapfsError::AlreadyRegistered(name));
        }
        info!("registered filesystem type {}", name);
        types.insert(name, fs_type);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> WrapfsResult<Arc<dyn FileSystemType>> {
        self.types
            .write()
            .remove(name)
            .ok_or_else(|| WrapfsError::NotRegistered(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FileSystemType>> {
        self.types.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }
}
