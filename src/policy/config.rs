//! Configuration for [`TieredMergePolicy`](crate::policy::tiered::TieredMergePolicy).

use serde::{Deserialize, Serialize};

use crate::error::{CalamusError, Result};

/// Default maximum merged segment size: 5 GiB.
pub const DEFAULT_MAX_MERGED_SEGMENT_MB: f64 = 5.0 * 1024.0;

/// Default floor segment size: 2 MiB.
pub const DEFAULT_FLOOR_SEGMENT_MB: f64 = 2.0;

/// Default number of segments allowed per size tier.
pub const DEFAULT_SEGMENTS_PER_TIER: f64 = 10.0;

/// Default maximum segments merged at once during natural merging.
pub const DEFAULT_MAX_MERGE_AT_ONCE: u32 = 10;

/// Default maximum segments merged at once during forced merging.
pub const DEFAULT_MAX_MERGE_AT_ONCE_EXPLICIT: u32 = 30;

/// Default tolerated share of deleted documents across the index, percent.
pub const DEFAULT_DELETES_PCT_ALLOWED: f64 = 20.0;

/// Default per-segment deletion percentage that makes a segment eligible
/// for forced deletes merging.
pub const DEFAULT_FORCE_MERGE_DELETES_PCT_ALLOWED: f64 = 10.0;

/// Default compound-file size ceiling: unbounded.
pub const DEFAULT_MAX_CFS_SEGMENT_MB: f64 = f64::INFINITY;

/// Validated, immutable settings for tiered merge selection.
///
/// Build one with [`TieredMergeConfig::builder`]; `Default` gives the
/// stock tuning, which suits most indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredMergeConfig {
    max_merged_segment_bytes: u64,
    floor_segment_bytes: u64,
    segments_per_tier: f64,
    max_merge_at_once: u32,
    max_merge_at_once_explicit: u32,
    deletes_pct_allowed: f64,
    force_merge_deletes_pct_allowed: f64,
    target_search_concurrency: u32,
    max_cfs_segment_bytes: u64,
}

impl TieredMergeConfig {
    pub fn builder() -> TieredMergeConfigBuilder {
        TieredMergeConfigBuilder::new()
    }

    /// Upper bound on the byte size of a naturally merged segment.
    pub fn max_merged_segment_bytes(&self) -> u64 {
        self.max_merged_segment_bytes
    }

    /// Size below which segments are treated as equally small.
    pub fn floor_segment_bytes(&self) -> u64 {
        self.floor_segment_bytes
    }

    /// How many same-sized segments are tolerated before a tier merges.
    pub fn segments_per_tier(&self) -> f64 {
        self.segments_per_tier
    }

    /// Widest natural merge.
    pub fn max_merge_at_once(&self) -> u32 {
        self.max_merge_at_once
    }

    /// Widest forced merge.
    pub fn max_merge_at_once_explicit(&self) -> u32 {
        self.max_merge_at_once_explicit
    }

    /// Tolerated percentage of deleted documents across the whole index.
    pub fn deletes_pct_allowed(&self) -> f64 {
        self.deletes_pct_allowed
    }

    /// Per-segment deletion percentage gate for forced deletes merges.
    pub fn force_merge_deletes_pct_allowed(&self) -> f64 {
        self.force_merge_deletes_pct_allowed
    }

    /// Number of segments the index should retain to keep searches
    /// parallelizable. 1 disables the constraint.
    pub fn target_search_concurrency(&self) -> u32 {
        self.target_search_concurrency
    }

    /// Size ceiling for compound-file packing. Merge selection never
    /// consults this; it is carried for the segment-writing stage.
    pub fn max_cfs_segment_bytes(&self) -> u64 {
        self.max_cfs_segment_bytes
    }

    /// Growth factor between adjacent tiers.
    pub fn merge_factor(&self) -> u32 {
        let per_tier = self.segments_per_tier as u32;
        per_tier.min(self.max_merge_at_once).max(2)
    }
}

impl Default for TieredMergeConfig {
    fn default() -> Self {
        TieredMergeConfigBuilder::new()
            .build()
            .unwrap_or_else(|_| unreachable!("stock tuning always validates"))
    }
}

/// Builder for [`TieredMergeConfig`]. Sizes are given in megabytes and
/// converted to bytes on build, saturating at `i64::MAX` so that "merge
/// everything" tunings are expressible with `f64::INFINITY`.
#[derive(Debug, Clone)]
pub struct TieredMergeConfigBuilder {
    max_merged_segment_mb: f64,
    floor_segment_mb: f64,
    segments_per_tier: f64,
    max_merge_at_once: u32,
    max_merge_at_once_explicit: u32,
    deletes_pct_allowed: f64,
    force_merge_deletes_pct_allowed: f64,
    target_search_concurrency: u32,
    max_cfs_segment_mb: f64,
}

impl Default for TieredMergeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TieredMergeConfigBuilder {
    pub fn new() -> Self {
        Self {
            max_merged_segment_mb: DEFAULT_MAX_MERGED_SEGMENT_MB,
            floor_segment_mb: DEFAULT_FLOOR_SEGMENT_MB,
            segments_per_tier: DEFAULT_SEGMENTS_PER_TIER,
            max_merge_at_once: DEFAULT_MAX_MERGE_AT_ONCE,
            max_merge_at_once_explicit: DEFAULT_MAX_MERGE_AT_ONCE_EXPLICIT,
            deletes_pct_allowed: DEFAULT_DELETES_PCT_ALLOWED,
            force_merge_deletes_pct_allowed: DEFAULT_FORCE_MERGE_DELETES_PCT_ALLOWED,
            target_search_concurrency: 1,
            max_cfs_segment_mb: DEFAULT_MAX_CFS_SEGMENT_MB,
        }
    }

    pub fn max_merged_segment_mb(mut self, mb: f64) -> Self {
        self.max_merged_segment_mb = mb;
        self
    }

    pub fn floor_segment_mb(mut self, mb: f64) -> Self {
        self.floor_segment_mb = mb;
        self
    }

    pub fn segments_per_tier(mut self, count: f64) -> Self {
        self.segments_per_tier = count;
        self
    }

    pub fn max_merge_at_once(mut self, count: u32) -> Self {
        self.max_merge_at_once = count;
        self
    }

    pub fn max_merge_at_once_explicit(mut self, count: u32) -> Self {
        self.max_merge_at_once_explicit = count;
        self
    }

    pub fn deletes_pct_allowed(mut self, pct: f64) -> Self {
        self.deletes_pct_allowed = pct;
        self
    }

    pub fn force_merge_deletes_pct_allowed(mut self, pct: f64) -> Self {
        self.force_merge_deletes_pct_allowed = pct;
        self
    }

    pub fn target_search_concurrency(mut self, count: u32) -> Self {
        self.target_search_concurrency = count;
        self
    }

    pub fn max_cfs_segment_mb(mut self, mb: f64) -> Self {
        self.max_cfs_segment_mb = mb;
        self
    }

    pub fn build(self) -> Result<TieredMergeConfig> {
        if !(self.max_merged_segment_mb >= 0.0) {
            return Err(CalamusError::config(format!(
                "max_merged_segment_mb must be non-negative, got {}",
                self.max_merged_segment_mb
            )));
        }
        if !(self.floor_segment_mb >= 0.0) {
            return Err(CalamusError::config(format!(
                "floor_segment_mb must be non-negative, got {}",
                self.floor_segment_mb
            )));
        }
        if !(self.segments_per_tier >= 1.0) {
            return Err(CalamusError::config(format!(
                "segments_per_tier must be at least 1, got {}",
                self.segments_per_tier
            )));
        }
        if self.max_merge_at_once < 2 {
            return Err(CalamusError::config(format!(
                "max_merge_at_once must be at least 2, got {}",
                self.max_merge_at_once
            )));
        }
        if self.max_merge_at_once_explicit < 2 {
            return Err(CalamusError::config(format!(
                "max_merge_at_once_explicit must be at least 2, got {}",
                self.max_merge_at_once_explicit
            )));
        }
        if !(0.0..=100.0).contains(&self.deletes_pct_allowed) {
            return Err(CalamusError::config(format!(
                "deletes_pct_allowed must be within [0, 100], got {}",
                self.deletes_pct_allowed
            )));
        }
        if !(0.0..=100.0).contains(&self.force_merge_deletes_pct_allowed) {
            return Err(CalamusError::config(format!(
                "force_merge_deletes_pct_allowed must be within [0, 100], got {}",
                self.force_merge_deletes_pct_allowed
            )));
        }
        if self.target_search_concurrency < 1 {
            return Err(CalamusError::config(
                "target_search_concurrency must be at least 1",
            ));
        }
        if !(self.max_cfs_segment_mb >= 0.0) {
            return Err(CalamusError::config(format!(
                "max_cfs_segment_mb must be non-negative, got {}",
                self.max_cfs_segment_mb
            )));
        }
        Ok(TieredMergeConfig {
            max_merged_segment_bytes: mb_to_bytes(self.max_merged_segment_mb),
            floor_segment_bytes: mb_to_bytes(self.floor_segment_mb),
            segments_per_tier: self.segments_per_tier,
            max_merge_at_once: self.max_merge_at_once,
            max_merge_at_once_explicit: self.max_merge_at_once_explicit,
            deletes_pct_allowed: self.deletes_pct_allowed,
            force_merge_deletes_pct_allowed: self.force_merge_deletes_pct_allowed,
            target_search_concurrency: self.target_search_concurrency,
            max_cfs_segment_bytes: mb_to_bytes(self.max_cfs_segment_mb),
        })
    }
}

fn mb_to_bytes(mb: f64) -> u64 {
    let bytes = mb * 1024.0 * 1024.0;
    if bytes >= i64::MAX as f64 {
        i64::MAX as u64
    } else {
        bytes as u64
    }
}
