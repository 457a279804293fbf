//! Merge context: the policy's read-only window into live engine state.

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;

use crate::segment::SegmentDescriptor;

/// Read-only view of engine state consulted during merge selection.
///
/// Deletions keep accruing after a snapshot is taken, and segments get
/// claimed by in-flight merges. Both are re-queried through this trait
/// rather than trusted from the snapshot; the in-flight set is the only
/// synchronization contract the policy relies on.
pub trait MergeContext: Send + Sync {
    /// Current deleted-document count for the segment, which may be ahead
    /// of the snapshot's `del_count`.
    fn current_deleted_count(&self, segment: &SegmentDescriptor) -> u32;

    /// Whether the segment is claimed by an in-flight merge.
    fn is_merging(&self, name: &str) -> bool;
}

/// Merge context backed by explicit in-memory state.
///
/// Segments without a recorded deletion count fall back to the snapshot
/// value. Used for deterministic simulations and tests; the engine's
/// production context satisfies the same trait over its own bookkeeping.
#[derive(Debug, Default)]
pub struct InMemoryMergeContext {
    deletions: RwLock<AHashMap<String, u32>>,
    merging: RwLock<AHashSet<String>>,
}

impl InMemoryMergeContext {
    /// Create an empty context: no extra deletions, nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the live deleted-document count for a segment.
    pub fn set_deleted_count(&self, name: impl Into<String>, del_count: u32) {
        self.deletions.write().insert(name.into(), del_count);
    }

    /// Mark a segment as claimed by an in-flight merge.
    pub fn set_merging(&self, name: impl Into<String>) {
        self.merging.write().insert(name.into());
    }

    /// Release a segment back to the pool.
    pub fn clear_merging(&self, name: &str) {
        self.merging.write().remove(name);
    }
}

impl MergeContext for InMemoryMergeContext {
    fn current_deleted_count(&self, segment: &SegmentDescriptor) -> u32 {
        self.deletions
            .read()
            .get(&segment.name)
            .copied()
            .unwrap_or(segment.del_count)
    }

    fn is_merging(&self, name: &str) -> bool {
        self.merging.read().contains(name)
    }
}
