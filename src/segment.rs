//! Segment descriptors.
//!
//! A descriptor is an immutable snapshot of one on-disk segment: identity,
//! document counts, byte size, and provenance. The engine creates a fresh
//! descriptor whenever a flush or merge completes; superseded descriptors
//! are discarded, never mutated in place.

use serde::{Deserialize, Serialize};

/// How a segment came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentSource {
    /// Produced by flushing buffered documents.
    Flush,
    /// Produced by a previous merge.
    Merge,
}

/// Immutable snapshot of one segment's identity, document counts, and size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    /// Segment identifier, unique within the index.
    pub name: String,

    /// Total document slots in the segment, including deleted ones.
    pub max_doc: u32,

    /// Deleted document count at snapshot time. The live count is
    /// re-queried from the merge context during selection.
    pub del_count: u32,

    /// Raw on-disk size in bytes.
    pub byte_size: u64,

    /// Provenance of the segment.
    pub source: SegmentSource,
}

impl SegmentDescriptor {
    /// Create a new segment descriptor.
    pub fn new(
        name: impl Into<String>,
        max_doc: u32,
        del_count: u32,
        byte_size: u64,
        source: SegmentSource,
    ) -> Self {
        SegmentDescriptor {
            name: name.into(),
            max_doc,
            del_count,
            byte_size,
            source,
        }
    }

    /// Live (non-deleted) documents as of the snapshot.
    pub fn live_docs(&self) -> u32 {
        self.max_doc.saturating_sub(self.del_count)
    }

    /// Deleted fraction of the snapshot, in percent (0.0 to 100.0).
    ///
    /// Zero-document segments count as fully live.
    pub fn del_pct(&self) -> f64 {
        if self.max_doc == 0 {
            0.0
        } else {
            100.0 * self.del_count.min(self.max_doc) as f64 / self.max_doc as f64
        }
    }
}
