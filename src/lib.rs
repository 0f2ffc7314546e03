#![cfg_attr(not(test), no_std)]
//! wrapfs: a stacking filesystem layered over a directory of another mount.
//!
//! This crate covers mount-time initialization. [`init_wrapfs`] registers the
//! filesystem type; [`WrapfsFsType::mount`] builds an instance whose root
//! wraps the lower directory and publishes its optional tier list.
extern crate alloc;

pub mod cache;
pub mod config;
pub mod dentry;
pub mod error;
pub mod fstype;
pub mod inode;
pub mod pool;
pub mod super_block;
pub mod tier;
pub mod vfs;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod mount_test;


pub use config::WrapfsConfig;
pub use error::{WrapfsError, WrapfsResult};
pub use fstype::{
    exit_wrapfs, init_wrapfs, MountRequest, WrapfsEnv, WrapfsFsType, WrapfsMountTable,
    WRAPFS_NAME, WRAPFS_VERSION,
};
pub use super_block::{read_super, WrapfsSuperBlock};
pub use tier::{parse_tiers, TierInfo, TierList, TierSpec};
