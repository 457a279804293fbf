//! Merge plan output types.
//!
//! A policy decision is a [`MergePlan`] holding one or more
//! [`MergeOperation`]s. Operations within a plan never share a segment and
//! can run concurrently.

use serde::{Deserialize, Serialize};

use crate::error::{CalamusError, Result};
use crate::segment::SegmentDescriptor;

/// Why a merge selection round was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeTrigger {
    /// A segment was flushed or a previous merge finished.
    SegmentFlush,
    /// An explicit request to force-merge down to a segment count.
    Explicit,
    /// An explicit request to reclaim deleted documents.
    ExplicitDeletes,
    /// A commit that wants small flush segments folded before publishing.
    FullFlush,
}

/// One merge: an ordered, non-empty set of distinct segments to be
/// rewritten into a single new segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOperation {
    segments: Vec<SegmentDescriptor>,
}

impl MergeOperation {
    /// Create an operation over `segments`.
    ///
    /// Returns an error when the set is empty or contains the same segment
    /// name twice.
    pub fn new(segments: Vec<SegmentDescriptor>) -> Result<Self> {
        if segments.is_empty() {
            return Err(CalamusError::invalid_argument(
                "merge operation requires at least one segment",
            ));
        }
        for (i, seg) in segments.iter().enumerate() {
            if segments[..i].iter().any(|other| other.name == seg.name) {
                return Err(CalamusError::invalid_argument(format!(
                    "segment {} appears twice in one merge operation",
                    seg.name
                )));
            }
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total on-disk bytes across the inputs.
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.byte_size).sum()
    }

    /// Total document slots across the inputs, deleted ones included.
    pub fn total_max_doc(&self) -> u64 {
        self.segments.iter().map(|s| u64::from(s.max_doc)).sum()
    }

    /// Snapshot deletion count across the inputs.
    pub fn total_del_count(&self) -> u64 {
        self.segments.iter().map(|s| u64::from(s.del_count)).sum()
    }
}

/// The full outcome of one selection round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergePlan {
    operations: Vec<MergeOperation>,
}

impl MergePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, operation: MergeOperation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[MergeOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// `None` when no merge is warranted, which callers treat as "nothing
    /// to do" rather than as an error.
    pub fn into_option(self) -> Option<Self> {
        if self.operations.is_empty() { None } else { Some(self) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentSource;

    fn seg(name: &str) -> SegmentDescriptor {
        SegmentDescriptor::new(name, 100, 0, 1024, SegmentSource::Flush)
    }

    #[test]
    fn test_operation_rejects_empty() {
        assert!(MergeOperation::new(Vec::new()).is_err());
    }

    #[test]
    fn test_operation_rejects_duplicates() {
        let result = MergeOperation::new(vec![seg("a"), seg("b"), seg("a")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_operation_totals() {
        let op = MergeOperation::new(vec![
            SegmentDescriptor::new("a", 100, 10, 1024, SegmentSource::Flush),
            SegmentDescriptor::new("b", 200, 30, 2048, SegmentSource::Merge),
        ])
        .unwrap();
        assert_eq!(op.len(), 2);
        assert_eq!(op.total_bytes(), 3072);
        assert_eq!(op.total_max_doc(), 300);
        assert_eq!(op.total_del_count(), 40);
    }

    #[test]
    fn test_empty_plan_becomes_none() {
        assert!(MergePlan::new().into_option().is_none());

        let mut plan = MergePlan::new();
        plan.add(MergeOperation::new(vec![seg("a")]).unwrap());
        let plan = plan.into_option().unwrap();
        assert_eq!(plan.len(), 1);
    }
}
