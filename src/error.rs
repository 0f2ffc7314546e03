//! Error type shared by every wrapfs component.

use alloc::string::String;
use onlyerror::Error;

/// Errors produced while mounting, resolving paths or parsing tiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WrapfsError {
    /// Missing or malformed mount argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Path is syntactically unusable (relative, empty component, ...).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A directory was required.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Symlink chain longer than the configured limit.
    #[error("too many symbolic links: {0}")]
    TooManySymlinks(String),

    /// Any allocation failure.
    #[error("out of memory")]
    OutOfMemory,

    /// The upper inode could not be bound to the backing inode.
    #[error("interpose failed: {0}")]
    InterposeFailure(String),

    /// The tier string names more tiers than allowed.
    #[error("too many tiers (limit {limit})")]
    TooManyTiers { limit: usize },

    /// A tier path is longer than allowed.
    #[error("tier {index}: path longer than {limit} characters")]
    TierPathTooLong { index: usize, limit: usize },

    /// A tier segment carries no path.
    #[error("tier {index}: empty path")]
    EmptyTierPath { index: usize },

    /// The tier list of an instance was already published.
    #[error("tier list already published")]
    AlreadyPublished,

    /// Every anonymous device number has been handed out.
    #[error("no anonymous device numbers left")]
    DevicesExhausted,

    /// The mount target is in use.
    #[error("mount target busy: {0}")]
    Busy(String),

    /// Nothing is mounted at the target.
    #[error("not mounted: {0}")]
    NotMounted(String),

    /// A filesystem type with this name is already registered.
    #[error("filesystem type already registered: {0}")]
    AlreadyRegistered(String),

    /// No filesystem type with this name is registered.
    #[error("filesystem type not registered: {0}")]
    NotRegistered(String),

    /// Bad configuration document.
    #[error("config error: {0}")]
    Config(String),
}

impl WrapfsError {
    /// Negative errno value a kernel mount entry point would return.
    pub fn errno(&self) -> i32 {
        let code = match self {
            WrapfsError::InvalidArgument(_) | WrapfsError::InvalidPath(_) => EINVAL,
            WrapfsError::Config(_) | WrapfsError::EmptyTierPath { .. } => EINVAL,
            WrapfsError::NotFound(_) | WrapfsError::NotRegistered(_) => ENOENT,
            WrapfsError::NotMounted(_) => EINVAL,
            WrapfsError::NotADirectory(_) => ENOTDIR,
            WrapfsError::TooManySymlinks(_) => ELOOP,
            WrapfsError::OutOfMemory => ENOMEM,
            WrapfsError::InterposeFailure(_) => EIO,
            WrapfsError::TooManyTiers { .. } => E2BIG,
            WrapfsError::TierPathTooLong { .. } => ENAMETOOLONG,
            WrapfsError::AlreadyExists(_) | WrapfsError::AlreadyRegistered(_) => EEXIST,
            WrapfsError::AlreadyPublished => EEXIST,
            WrapfsError::Busy(_) => EBUSY,
            WrapfsError::DevicesExhausted => EMFILE,
        };
        -code
    }
}

const ENOENT: i32 = 2;
const EIO: i32 = 5;
const E2BIG: i32 = 7;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const EEXIST: i32 = 17;
const ENOTDIR: i32 = 20;
const EINVAL: i32 = 22;
const EMFILE: i32 = 24;
const ENAMETOOLONG: i32 = 36;
const ELOOP: i32 = 40;

/// Result alias used across the crate.
pub type WrapfsResult<T> = Result<T, WrapfsError>;
