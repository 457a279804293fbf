//! Merge policies.
//!
//! A merge policy inspects the current set of segments and decides which
//! of them, if any, should be rewritten together. [`TieredMergePolicy`] is
//! the production policy; [`NoMergePolicy`] disables merging entirely and
//! is useful in tests and bulk-load scenarios.
//!
//! [`TieredMergePolicy`]: crate::policy::tiered::TieredMergePolicy

pub mod config;
pub mod tiered;

use ahash::AHashSet;

use crate::context::MergeContext;
use crate::error::Result;
use crate::plan::{MergePlan, MergeTrigger};
use crate::segment::SegmentDescriptor;

/// Decides which segments to merge. Implementations must be usable from
/// multiple indexing threads.
pub trait MergePolicy: Send + Sync {
    /// Natural merge selection, run after flushes and completed merges.
    fn find_merges(
        &self,
        trigger: MergeTrigger,
        segments: &[SegmentDescriptor],
        ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>>;

    /// Forced merge down to at most `max_segment_count` segments.
    ///
    /// When `eligible` is given, segments outside it are pinned: they stay
    /// in the index untouched and never join a candidate.
    fn find_forced_merges(
        &self,
        segments: &[SegmentDescriptor],
        max_segment_count: u32,
        eligible: Option<&AHashSet<String>>,
        ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>>;

    /// Merges whose only goal is reclaiming deleted documents.
    fn find_forced_deletes_merges(
        &self,
        segments: &[SegmentDescriptor],
        ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>>;

    /// Opportunistic folding of small flushed segments at commit time.
    fn find_full_flush_merges(
        &self,
        trigger: MergeTrigger,
        segments: &[SegmentDescriptor],
        ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>>;
}

/// A policy that never merges. Segments accumulate as flushed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMergePolicy;

impl NoMergePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl MergePolicy for NoMergePolicy {
    fn find_merges(
        &self,
        _trigger: MergeTrigger,
        _segments: &[SegmentDescriptor],
        _ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>> {
        Ok(None)
    }

    fn find_forced_merges(
        &self,
        _segments: &[SegmentDescriptor],
        _max_segment_count: u32,
        _eligible: Option<&AHashSet<String>>,
        _ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>> {
        Ok(None)
    }

    fn find_forced_deletes_merges(
        &self,
        _segments: &[SegmentDescriptor],
        _ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>> {
        Ok(None)
    }

    fn find_full_flush_merges(
        &self,
        _trigger: MergeTrigger,
        _segments: &[SegmentDescriptor],
        _ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>> {
        Ok(None)
    }
}
