//! Tier list parsing, resolution and publication.
//!
//! A tier string looks like `label:/path,label:/path`. Everything before the
//! first `:` of a segment is the label; the rest, including any further `:`,
//! is the path. `,` ends a tier and the end of the string ends the last one.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use spin::Once;

use crate::config::WrapfsConfig;
use crate::error::{WrapfsError, WrapfsResult};
use crate::vfs::{DevId, LookupFlags, PathRef, PathResolver};

/// One syntactically valid, not yet resolved, tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSegment {
    pub label: String,
    pub path: String,
}

/// The parsed form of a tier string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierSpec {
    segments: Vec<TierSegment>,
}

impl TierSpec {
    /// Parse `config` against `limits`. An absent or empty string names no
    /// tiers.
    pub fn parse(config: Option<&str>, limits: &WrapfsConfig) -> WrapfsResult<Self> {
        let mut segments = Vec::new();
        let text = match config {
            Some(text) if !text.is_empty() => text,
            _ => return Ok(Self { segments }),
        };

        for (index, raw) in text.split(',').enumerate() {
            if index >= limits.tier_capacity {
                return Err(WrapfsError::TooManyTiers {
                    limit: limits.tier_capacity,
                });
            }
            let (label, path) = raw
                .split_once(':')
                .ok_or(WrapfsError::EmptyTierPath { index })?;
            if path.is_empty() {
                return Err(WrapfsError::EmptyTierPath { index });
            }
            if path.chars().count() > limits.tier_path_max {
                return Err(WrapfsError::TierPathTooLong {
                    index,
                    limit: limits.tier_path_max,
                });
            }
            segments.push(TierSegment {
                label: label.to_string(),
                path: path.to_string(),
            });
        }
        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TierSegment> {
        self.segments.iter()
    }
}

/// A resolved tier holding a reference on its location.
#[derive(Debug)]
pub struct Tier {
    index: usize,
    label: String,
    path: String,
    path_ref: PathRef,
}

impl Tier {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn path_ref(&self) -> &PathRef {
        &self.path_ref
    }
}

/// Summary of one tier, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInfo {
    pub index: usize,
    pub label: String,
    pub path: String,
    pub fs_type: String,
    pub s_dev: DevId,
}

/// Resolved tiers in the order they were written.
#[derive(Debug, Default)]
pub struct TierList {
    tiers: Vec<Tier>,
}

impl TierList {
    /// Resolve every tier, following a final symlink. On failure the
    /// references taken so far are released.
    pub fn resolve(spec: &TierSpec, resolver: &dyn PathResolver) -> WrapfsResult<Self> {
        let mut tiers = Vec::with_capacity(spec.len());
        for (index, segment) in spec.iter().enumerate() {
            let path_ref = resolver
                .resolve(&segment.path, LookupFlags::FOLLOW)
                .map_err(|e| {
                    warn!(
                        "wrapfs: tier {} ({}): cannot resolve {}: {}",
                        index, segment.label, segment.path, e
                    );
                    e
                })?;
            tiers.push(Tier {
                index,
                label: segment.label.clone(),
                path: segment.path.clone(),
                path_ref,
            });
        }
        Ok(Self { tiers })
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.tiers.iter().map(|tier| tier.path()).collect()
    }

    pub fn report(&self) -> Vec<TierInfo> {
        self.tiers
            .iter()
            .map(|tier| TierInfo {
                index: tier.index,
                label: tier.label.clone(),
                path: tier.path.clone(),
                fs_type: tier.path_ref.sb().fs_name().to_string(),
                s_dev: tier.path_ref.sb().s_dev(),
            })
            .collect()
    }
}

/// Per-instance tier list, written at most once.
///
/// Readers observe either nothing or the complete list.
#[derive(Debug)]
pub struct TierSlot(Once<TierList>);

impl Default for TierSlot {
    fn default() -> Self {
        Self(Once::new())
    }
}

impl TierSlot {
    pub fn publish(&self, list: TierList) -> WrapfsResult<&TierList> {
        let mut fresh = false;
        let stored = self.0.call_once(|| {
            fresh = true;
            list
        });
        if !fresh {
            return Err(WrapfsError::AlreadyPublished);
        }
        Ok(stored)
    }

    pub fn get(&self) -> Option<&TierList> {
        self.0.get()
    }
}

/// Resolve an already parsed tier list and publish it into `target`.
pub fn publish_tiers(
    spec: &TierSpec,
    resolver: &dyn PathResolver,
    target: &TierSlot,
) -> WrapfsResult<usize> {
    let list = TierList::resolve(spec, resolver)?;
    let count = target.publish(list)?.len();
    debug!("wrapfs: published {} tiers", count);
    Ok(count)
}

/// Parse `config`, resolve each tier and publish the list into `target`.
/// Returns the number of tiers.
pub fn parse_tiers(
    config: Option<&str>,
    resolver: &dyn PathResolver,
    limits: &WrapfsConfig,
    target: &TierSlot,
) -> WrapfsResult<usize> {
    let spec = TierSpec::parse(config, limits)?;
    publish_tiers(&spec, resolver, target)
}
