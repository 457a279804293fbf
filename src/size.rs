//! Live-weighted size arithmetic used by tiering.

use crate::context::MergeContext;
use crate::segment::SegmentDescriptor;

/// Byte size scaled by the fraction of non-deleted documents.
///
/// The deletion count is re-queried from the context so that deletions
/// occurring between snapshot and decision are honored. Zero-document
/// segments count as fully live; a fully deleted segment weighs zero and
/// therefore always sorts as the smallest merge candidate.
pub fn weighted_size(segment: &SegmentDescriptor, ctx: &dyn MergeContext) -> u64 {
    if segment.max_doc == 0 {
        return segment.byte_size;
    }
    let del_count = ctx.current_deleted_count(segment).min(segment.max_doc);
    let live_ratio = 1.0 - del_count as f64 / segment.max_doc as f64;
    (live_ratio * segment.byte_size as f64) as u64
}

/// Clamp a weighted size upward to the configured floor, so that a handful
/// of near-empty segments cannot dominate tier math.
pub fn floored(bytes: u64, floor_bytes: u64) -> u64 {
    bytes.max(floor_bytes)
}
