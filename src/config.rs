//! Tunables for a wrapfs registration.

use alloc::string::ToString;
use serde::{Deserialize, Serialize};

use crate::error::{WrapfsError, WrapfsResult};

/// Maximum number of tiers a mount may name.
pub const TIER_CAPACITY: usize = 5;
/// Maximum length of a single tier path, in characters.
pub const TIER_PATH_MAX: usize = 30;
/// Maximum number of symlinks followed during one lookup.
pub const MAX_SYMLINKS: usize = 40;

/// Limits applied to every mount made through one filesystem type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapfsConfig {
    pub tier_capacity: usize,
    pub tier_path_max: usize,
    pub max_symlinks: usize,
}

impl Default for WrapfsConfig {
    fn default() -> Self {
        Self {
            tier_capacity: TIER_CAPACITY,
            tier_path_max: TIER_PATH_MAX,
            max_symlinks: MAX_SYMLINKS,
        }
    }
}

impl WrapfsConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(doc: &str) -> WrapfsResult<Self> {
        let config: Self =
            serde_json::from_str(doc).map_err(|e| WrapfsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would make every mount fail.
    pub fn validate(&self) -> WrapfsResult<()> {
        if self.tier_capacity == 0 {
            return Err(WrapfsError::Config("tier_capacity must be non-zero".to_string()));
        }
        if self.tier_path_max == 0 {
            return Err(WrapfsError::Config("tier_path_max must be non-zero".to_string()));
        }
        Ok(())
    }
}
