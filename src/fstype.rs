//! The wrapfs filesystem type: registration and the mount entry point.

use alloc::string::ToString;
use alloc::sync::Arc;

use log::{debug, error, info, warn};

use crate::cache::WrapfsCaches;
use crate::config::WrapfsConfig;
use crate::error::{WrapfsError, WrapfsResult};
use crate::inode::{InodeInterposer, Interpose};
use crate::pool::{MemoryPool, SystemPool};
use crate::super_block::{read_super, WrapfsSuperBlock};
use crate::tier::{publish_tiers, TierSpec};
use crate::vfs::{FileSystemRegistry, FileSystemType, FsFlags, MountFlags, MountTable, PathResolver};

pub const WRAPFS_NAME: &str = "wrapfs";
pub const WRAPFS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Mount table holding wrapfs instances.
pub type WrapfsMountTable = MountTable<WrapfsSuperBlock>;

/// Arguments of one mount call.
#[derive(Debug, Clone, Copy)]
pub struct MountRequest<'a> {
    /// Path of the lower directory.
    pub dev_name: Option<&'a str>,
    pub flags: MountFlags,
    /// Tier string, `label:/path,...`.
    pub data: Option<&'a str>,
}

impl<'a> MountRequest<'a> {
    pub fn new(dev_name: &'a str) -> Self {
        Self {
            dev_name: Some(dev_name),
            flags: MountFlags::empty(),
            data: None,
        }
    }

    /// A request without a lower directory.
    pub fn without_dev() -> Self {
        Self {
            dev_name: None,
            flags: MountFlags::empty(),
            data: None,
        }
    }

    pub fn with_flags(mut self, flags: MountFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_tiers(mut self, data: &'a str) -> Self {
        self.data = Some(data);
        self
    }
}

/// Host services a wrapfs registration depends on.
pub struct WrapfsEnv {
    pub resolver: Arc<dyn PathResolver>,
    pub pool: Arc<dyn MemoryPool>,
    pub config: WrapfsConfig,
}

impl WrapfsEnv {
    pub fn new(resolver: Arc<dyn PathResolver>) -> Self {
        Self {
            resolver,
            pool: Arc::new(SystemPool),
            config: WrapfsConfig::default(),
        }
    }

    pub fn with_pool(mut self, pool: Arc<dyn MemoryPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_config(mut self, config: WrapfsConfig) -> Self {
        self.config = config;
        self
    }
}

/// A registered wrapfs filesystem type.
pub struct WrapfsFsType {
    resolver: Arc<dyn PathResolver>,
    pool: Arc<dyn MemoryPool>,
    config: WrapfsConfig,
    caches: WrapfsCaches,
    interposer: Arc<dyn Interpose>,
}

impl core::fmt::Debug for WrapfsFsType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WrapfsFsType")
            .field("config", &self.config)
            .field("caches", &self.caches)
            .finish()
    }
}

impl WrapfsFsType {
    /// Create the inode and dentry caches for a new registration.
    pub fn new(env: WrapfsEnv) -> WrapfsResult<Self> {
        env.config.validate()?;
        let caches = WrapfsCaches::init(env.pool.clone())?;
        let interposer = Arc::new(InodeInterposer::new(caches.inode.clone()));
        Ok(Self {
            resolver: env.resolver,
            pool: env.pool,
            config: env.config,
            caches,
            interposer,
        })
    }

    pub fn with_interposer(mut self, interposer: Arc<dyn Interpose>) -> Self {
        self.interposer = interposer;
        self
    }

    pub fn resolver(&self) -> &Arc<dyn PathResolver> {
        &self.resolver
    }

    pub fn pool(&self) -> &Arc<dyn MemoryPool> {
        &self.pool
    }

    pub fn config(&self) -> &WrapfsConfig {
        &self.config
    }

    pub fn caches(&self) -> &WrapfsCaches {
        &self.caches
    }

    pub fn interposer(&self) -> &Arc<dyn Interpose> {
        &self.interposer
    }

    /// Mount a new instance at `target`.
    ///
    /// The instance becomes visible only once the superblock is filled and
    /// its tiers are published; on any error nothing taken on its behalf
    /// survives.
    pub fn mount(
        &self,
        table: &WrapfsMountTable,
        target: &str,
        request: &MountRequest<'_>,
    ) -> WrapfsResult<Arc<WrapfsSuperBlock>> {
        let dev_name = match request.dev_name {
            Some(name) if !name.is_empty() => name,
            _ => {
                error!("wrapfs: mount on {}: missing dev_name argument", target);
                return Err(WrapfsError::InvalidArgument("missing dev_name".to_string()));
            }
        };
        let spec = TierSpec::parse(request.data, &self.config).map_err(|e| {
            error!("wrapfs: mount on {}: bad tier list: {}", target, e);
            e
        })?;
        debug!("wrapfs: mount {} on {} ({} tiers)", dev_name, target, spec.len());

        table.mount_nodev(target, |s_dev| {
            let sb = read_super(self, s_dev, request)?;
            publish_tiers(&spec, self.resolver.as_ref(), sb.tier_slot())?;
            Ok(sb)
        })
    }

    /// Detach the instance at `target`. Teardown completes when the last
    /// handle to it is dropped.
    pub fn umount(&self, table: &WrapfsMountTable, target: &str) -> WrapfsResult<()> {
        let sb = table.umount(target)?;
        if !sb.s_flags().contains(MountFlags::SILENT) {
            info!("{}: unmounted {} from {}", WRAPFS_NAME, sb.dev_name(), target);
        }
        Ok(())
    }
}

impl FileSystemType for WrapfsFsType {
    fn name(&self) -> &str {
        WRAPFS_NAME
    }

    fn fs_flags(&self) -> FsFlags {
        FsFlags::REVAL_DOT
    }
}

/// Create the caches and register wrapfs with `registry`.
pub fn init_wrapfs(registry: &FileSystemRegistry, env: WrapfsEnv) -> WrapfsResult<Arc<WrapfsFsType>> {
    info!("Registering {} {}", WRAPFS_NAME, WRAPFS_VERSION);
    let fs = Arc::new(WrapfsFsType::new(env)?);
    if let Err(e) = registry.register(fs.clone()) {
        error!("wrapfs: registration failed: {}", e);
        fs.caches().destroy();
        return Err(e);
    }
    Ok(fs)
}

/// Unregister wrapfs and destroy its caches.
pub fn exit_wrapfs(registry: &FileSystemRegistry, fs: &WrapfsFsType) -> WrapfsResult<()> {
    let leaked = fs.caches().destroy();
    if leaked != 0 {
        warn!("wrapfs: {} objects still live at unload", leaked);
    }
    registry.unregister(WRAPFS_NAME)?;
    info!("Unloaded {}", WRAPFS_NAME);
    Ok(())
}
