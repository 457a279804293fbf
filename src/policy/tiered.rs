//! Tiered merge selection.
//!
//! Segments are bucketed into size tiers: the smallest tier starts at the
//! floor size and each tier above it grows by the merge factor. When any
//! tier holds more segments than `segments_per_tier` allows, contiguous
//! runs of similarly sized segments are scored and the most balanced,
//! least deletion-heavy run is merged. The policy bounds write
//! amplification by never merging a segment that is already at least half
//! of `max_merged_segment_bytes`, unless merging it would reclaim an
//! outsized share of deleted documents.

use ahash::AHashSet;
use log::{debug, trace};

use crate::context::MergeContext;
use crate::error::{CalamusError, Result};
use crate::plan::{MergeOperation, MergePlan, MergeTrigger};
use crate::policy::MergePolicy;
use crate::policy::config::TieredMergeConfig;
use crate::segment::{SegmentDescriptor, SegmentSource};
use crate::size;

/// Exponent applied to a candidate's merged size so that, at equal
/// balance, smaller merges win.
const SIZE_EXPONENT: f64 = 0.05;

/// Exponent applied to the live-byte ratio of a candidate, favoring
/// merges that reclaim more deleted documents.
const RECLAIM_DELETES_WEIGHT: f64 = 2.0;

/// Headroom multiplier on the per-merge size bound during forced merges,
/// so one pass usually reaches the requested segment count.
const FORCED_MERGE_SIZE_FUDGE: f64 = 1.25;

/// Merge policy that keeps the segment count logarithmic in index size.
#[derive(Debug, Clone)]
pub struct TieredMergePolicy {
    config: TieredMergeConfig,
}

/// A segment plus the live state used during one selection round. The
/// deletion count is re-queried from the context once, up front, so every
/// comparison within the round sees the same numbers.
#[derive(Debug, Clone)]
struct SegmentEntry {
    segment: SegmentDescriptor,
    del_count: u32,
    weighted_bytes: u64,
}

impl SegmentEntry {
    fn new(segment: SegmentDescriptor, ctx: &dyn MergeContext) -> Self {
        let del_count = ctx.current_deleted_count(&segment).min(segment.max_doc);
        let weighted_bytes = size::weighted_size(&segment, ctx);
        Self {
            segment,
            del_count,
            weighted_bytes,
        }
    }

    fn live_docs(&self) -> u32 {
        self.segment.max_doc - self.del_count
    }

    fn del_pct(&self) -> f64 {
        if self.segment.max_doc == 0 {
            0.0
        } else {
            100.0 * f64::from(self.del_count) / f64::from(self.segment.max_doc)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeKind {
    /// Stop once the segment count and deletion count fit the budget.
    Natural,
    /// Keep going until every eligible segment has been consumed.
    ForceDeletes,
}

/// Limits in force for one call to [`TieredMergePolicy::select`].
#[derive(Debug, Clone, Copy)]
struct MergeBudget {
    max_merge_bytes: u64,
    merge_factor: usize,
    allowed_seg_count: usize,
    /// `None` disables the deletion pressure check.
    allowed_del_count: Option<u64>,
    allowed_doc_count: u64,
}

struct BestCandidate {
    indices: Vec<usize>,
    score: f64,
    hit_too_large: bool,
    bytes: u64,
    reclaimed: u64,
}

impl TieredMergePolicy {
    pub fn new(config: TieredMergeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TieredMergeConfig {
        &self.config
    }

    /// Segments ordered largest first by live-weighted size, with the name
    /// as a tie break so selection is deterministic.
    fn sorted_entries(
        &self,
        segments: &[SegmentDescriptor],
        ctx: &dyn MergeContext,
    ) -> Vec<SegmentEntry> {
        let mut entries: Vec<SegmentEntry> = segments
            .iter()
            .map(|segment| SegmentEntry::new(segment.clone(), ctx))
            .collect();
        entries.sort_by(|a, b| {
            b.weighted_bytes
                .cmp(&a.weighted_bytes)
                .then_with(|| a.segment.name.cmp(&b.segment.name))
        });
        entries
    }

    /// How many segments the index may hold before merging is warranted:
    /// `segments_per_tier` at each tier, with tier sizes growing by the
    /// merge factor from the floor up to the maximum merged size.
    fn allowed_segment_count(&self, total_index_bytes: u64, min_segment_bytes: u64) -> usize {
        let max_merged = self.config.max_merged_segment_bytes();
        let per_tier = self.config.segments_per_tier();
        let merge_factor = u64::from(self.config.merge_factor());

        let mut level_bytes = min_segment_bytes.max(self.config.floor_segment_bytes()).max(1);
        let mut bytes_left = total_index_bytes as f64;
        let mut allowed = 0.0;
        // Natural merges stop growing segments at half the maximum merged
        // size, so tiers are only modeled up to that level.
        let level_cap = max_merged / 2;
        loop {
            let count_at_level = bytes_left / level_bytes as f64;
            if count_at_level < per_tier || level_bytes >= level_cap {
                allowed += count_at_level.ceil();
                break;
            }
            allowed += per_tier;
            bytes_left -= per_tier * level_bytes as f64;
            level_bytes = level_bytes.saturating_mul(merge_factor).min(level_cap);
        }
        let allowed = allowed
            .max(per_tier)
            .max(f64::from(self.config.target_search_concurrency()));
        allowed as usize
    }

    /// Per-merge document budget derived from the target search
    /// concurrency: an index of N live documents should keep at least
    /// `target_search_concurrency` segments, so no merge may produce a
    /// segment holding more than N over that target.
    fn allowed_doc_count(&self, total_live_docs: u64) -> u64 {
        let concurrency = u64::from(self.config.target_search_concurrency());
        if concurrency <= 1 {
            u64::MAX
        } else {
            total_live_docs.div_ceil(concurrency)
        }
    }

    /// Score a candidate run; lower is better. Balance (skew) dominates,
    /// then total size, then how much deleted data the merge retains.
    fn score(&self, eligible: &[SegmentEntry], candidate: &[usize], hit_too_large: bool) -> f64 {
        let floor = self.config.floor_segment_bytes();
        let mut after_bytes: u64 = 0;
        let mut after_floored: u64 = 0;
        let mut before_bytes: u64 = 0;
        for &idx in candidate {
            let entry = &eligible[idx];
            after_bytes += entry.weighted_bytes;
            // A zero floor leaves fully deleted segments weightless; clamp
            // so the skew below stays finite.
            after_floored += size::floored(entry.weighted_bytes, floor).max(1);
            before_bytes += entry.segment.byte_size;
        }

        let skew = if hit_too_large {
            // The run was cut short by the size budget, so its shape says
            // little; pretend it is perfectly balanced at full width.
            1.0 / f64::from(self.config.merge_factor())
        } else {
            let first = candidate
                .first()
                .map_or(1, |&idx| size::floored(eligible[idx].weighted_bytes, floor).max(1));
            first as f64 / after_floored as f64
        };

        let live_ratio = if before_bytes == 0 {
            1.0
        } else {
            after_bytes as f64 / before_bytes as f64
        };
        skew * (after_bytes as f64).powf(SIZE_EXPONENT) * live_ratio.powf(RECLAIM_DELETES_WEIGHT)
    }

    /// Greedy selection of non-overlapping merges over `eligible`, which
    /// must be sorted largest first.
    ///
    /// Each round enumerates every contiguous window, skipping past
    /// entries that would blow the size or document budget so smaller
    /// segments can still pack in behind them, scores each window, and
    /// keeps the best. Selected segments leave the pool and the loop
    /// repeats until the pool fits the budget (or, for deletes
    /// reclamation, until the pool is empty).
    fn select(
        &self,
        mut eligible: Vec<SegmentEntry>,
        kind: MergeKind,
        budget: MergeBudget,
        max_merge_running: bool,
    ) -> Result<MergePlan> {
        let floor = self.config.floor_segment_bytes();
        let mut plan = MergePlan::new();
        let mut have_one_large_merge = false;

        loop {
            match kind {
                MergeKind::Natural => {
                    let remaining_del: u64 =
                        eligible.iter().map(|e| u64::from(e.del_count)).sum();
                    let over_deletes = budget
                        .allowed_del_count
                        .is_some_and(|allowed| remaining_del > allowed);
                    if eligible.len() <= budget.allowed_seg_count && !over_deletes {
                        return Ok(plan);
                    }
                }
                MergeKind::ForceDeletes => {
                    if eligible.is_empty() {
                        return Ok(plan);
                    }
                }
            }

            let mut best: Option<BestCandidate> = None;
            for start in 0..eligible.len() {
                let mut indices = Vec::new();
                let mut bytes: u64 = 0;
                let mut docs: u64 = 0;
                let mut hit_too_large = false;
                let mut idx = start;
                while idx < eligible.len()
                    && indices.len() < budget.merge_factor
                    && bytes < budget.max_merge_bytes
                    && (bytes < floor || docs < budget.allowed_doc_count)
                {
                    let entry = &eligible[idx];
                    let seg_bytes = entry.weighted_bytes;
                    let seg_docs = u64::from(entry.live_docs());
                    let over_bytes = bytes + seg_bytes > budget.max_merge_bytes;
                    let over_docs = bytes > floor && docs + seg_docs > budget.allowed_doc_count;
                    if over_bytes || over_docs {
                        // A doc-count overrun is not marked too-large: a
                        // narrower merge heeds it better than a padded one.
                        hit_too_large |= over_bytes;
                        if indices.is_empty() && over_bytes {
                            // Over budget all by itself. Rewriting it alone
                            // is still worthwhile when it carries deletes.
                            indices.push(idx);
                            bytes += seg_bytes;
                            docs += seg_docs;
                        }
                        idx += 1;
                        continue;
                    }
                    indices.push(idx);
                    bytes += seg_bytes;
                    docs += seg_docs;
                    idx += 1;
                }

                if indices.is_empty() {
                    continue;
                }
                // Rewriting a single segment only pays off when it drops
                // deleted documents.
                if indices.len() == 1 && eligible[indices[0]].del_count == 0 {
                    continue;
                }
                let score = self.score(&eligible, &indices, hit_too_large);
                let reclaimed: u64 = indices
                    .iter()
                    .map(|&i| u64::from(eligible[i].del_count))
                    .sum();
                // While a max-sized merge is running another over-budget
                // window may not win; a smaller window still can.
                let better = best.as_ref().is_none_or(|b| {
                    score < b.score || (score == b.score && reclaimed > b.reclaimed)
                }) && (!hit_too_large || !max_merge_running);
                if better {
                    best = Some(BestCandidate {
                        indices,
                        score,
                        hit_too_large,
                        bytes,
                        reclaimed,
                    });
                }
            }

            let Some(best) = best else {
                return Ok(plan);
            };

            // At most one over-budget merge may be pending at a time,
            // except when reclaiming deletes was explicitly requested.
            let emit = !have_one_large_merge
                || !best.hit_too_large
                || kind == MergeKind::ForceDeletes;
            if emit {
                have_one_large_merge |= best.hit_too_large;
                let segments: Vec<SegmentDescriptor> = best
                    .indices
                    .iter()
                    .map(|&i| eligible[i].segment.clone())
                    .collect();
                trace!(
                    "selected merge of {} segments, {} bytes, score {:.4}, reclaims {} deleted docs",
                    segments.len(),
                    best.bytes,
                    best.score,
                    best.reclaimed
                );
                plan.add(MergeOperation::new(segments)?);
            }
            // Either way the segments leave the pool, so suppressed
            // candidates are not rediscovered next round.
            for &idx in best.indices.iter().rev() {
                eligible.remove(idx);
            }
        }
    }
}

impl Default for TieredMergePolicy {
    fn default() -> Self {
        Self::new(TieredMergeConfig::default())
    }
}

impl MergePolicy for TieredMergePolicy {
    fn find_merges(
        &self,
        trigger: MergeTrigger,
        segments: &[SegmentDescriptor],
        ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>> {
        if segments.is_empty() {
            return Ok(None);
        }
        let sorted = self.sorted_entries(segments, ctx);

        let mut total_index_bytes: u64 = 0;
        let mut min_segment_bytes = u64::MAX;
        let mut total_del_docs: u64 = 0;
        let mut total_max_doc: u64 = 0;
        let mut merging_bytes: u64 = 0;
        let mut eligible = Vec::with_capacity(sorted.len());
        for entry in sorted {
            min_segment_bytes = min_segment_bytes.min(entry.weighted_bytes);
            total_index_bytes += entry.weighted_bytes;
            if ctx.is_merging(&entry.segment.name) {
                // An in-flight merge is already reclaiming this segment's
                // deletes, so only its live docs count toward pressure.
                merging_bytes += entry.weighted_bytes;
                total_max_doc += u64::from(entry.live_docs());
            } else {
                total_del_docs += u64::from(entry.del_count);
                total_max_doc += u64::from(entry.segment.max_doc);
                eligible.push(entry);
            }
        }

        let total_del_pct = if total_max_doc == 0 {
            0.0
        } else {
            100.0 * total_del_docs as f64 / total_max_doc as f64
        };
        let deletes_pct_allowed = self.config.deletes_pct_allowed();
        let mut allowed_del_count =
            (deletes_pct_allowed * total_max_doc as f64 / 100.0) as i64;

        // Segments at half the maximum size or more are left alone: merging
        // them mostly rewrites bytes that are already well packed. They do
        // come back into play once they, and the index overall, carry more
        // deletes than tolerated.
        let half_max = self.config.max_merged_segment_bytes() / 2;
        let mut too_big_count = 0usize;
        eligible.retain(|entry| {
            let graced = entry.weighted_bytes > half_max
                && (total_del_pct <= deletes_pct_allowed
                    || entry.del_pct() <= deletes_pct_allowed);
            if graced {
                too_big_count += 1;
                total_index_bytes -= entry.weighted_bytes;
                allowed_del_count -= i64::from(entry.del_count);
            }
            !graced
        });
        let allowed_del_count = allowed_del_count.max(0) as u64;

        let allowed_seg_count = self.allowed_segment_count(total_index_bytes, min_segment_bytes);
        let total_live_docs = total_max_doc.saturating_sub(total_del_docs);
        let budget = MergeBudget {
            max_merge_bytes: self.config.max_merged_segment_bytes(),
            merge_factor: self.config.merge_factor() as usize,
            allowed_seg_count,
            allowed_del_count: Some(allowed_del_count),
            allowed_doc_count: self.allowed_doc_count(total_live_docs),
        };
        debug!(
            "natural selection ({trigger:?}): {} eligible, {too_big_count} too large, allowed count {allowed_seg_count}, allowed deletes {allowed_del_count}",
            eligible.len()
        );

        let max_merge_running = merging_bytes >= self.config.max_merged_segment_bytes();
        let plan = self.select(eligible, MergeKind::Natural, budget, max_merge_running)?;
        Ok(plan.into_option())
    }

    fn find_forced_merges(
        &self,
        segments: &[SegmentDescriptor],
        max_segment_count: u32,
        eligible_names: Option<&AHashSet<String>>,
        ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>> {
        if max_segment_count == 0 {
            return Err(CalamusError::invalid_argument(
                "forced merge target must be at least 1 segment",
            ));
        }
        if segments.is_empty() {
            return Ok(None);
        }
        let target = max_segment_count as usize;
        let explicit_factor = self.config.max_merge_at_once_explicit() as usize;

        let sorted = self.sorted_entries(segments, ctx);
        let mut force_merge_running = false;
        let mut total_merge_bytes: u64 = 0;
        let mut eligible = Vec::with_capacity(sorted.len());
        for entry in sorted {
            let pinned =
                eligible_names.is_some_and(|names| !names.contains(&entry.segment.name));
            if pinned {
                continue;
            }
            if ctx.is_merging(&entry.segment.name) {
                force_merge_running = true;
            } else {
                total_merge_bytes += entry.weighted_bytes;
                eligible.push(entry);
            }
        }

        // Per-merge size bound: merging to one segment is unbounded;
        // otherwise an even split of the index, with headroom so one pass
        // usually suffices, but never tighter than the natural maximum.
        let max_merge_bytes = if target == 1 {
            u64::MAX
        } else {
            let even_split = total_merge_bytes / target as u64;
            let bound = even_split.max(self.config.max_merged_segment_bytes());
            (bound as f64 * FORCED_MERGE_SIZE_FUDGE) as u64
        };

        // Segments without deletes that already exceed the bound are as
        // merged as they will get. Any segment carrying deletes stays in,
        // whatever its size.
        eligible.retain(|entry| entry.del_count != 0 || entry.weighted_bytes < max_merge_bytes);
        if eligible.is_empty() {
            return Ok(None);
        }

        // If the remaining work fits in a single round but a forced merge
        // is still running, wait for it: its output changes what the last
        // round should look like.
        let starting_count = eligible.len();
        let final_round = starting_count < target + explicit_factor - 1;
        if final_round && force_merge_running {
            debug!(
                "forced merge to {target} deferred: {starting_count} segments left and a forced merge is in flight"
            );
            return Ok(None);
        }

        if starting_count <= target {
            // Already at the requested count. The one merge still worth
            // doing is folding a tiny tail segment into a near-maximum
            // segment with room for it, so no small orphan is left behind.
            let mut plan = MergePlan::new();
            if starting_count >= 2 {
                let max_merged = self.config.max_merged_segment_bytes();
                let tail = &eligible[starting_count - 1];
                if tail.weighted_bytes < self.config.floor_segment_bytes() {
                    let room = max_merged.saturating_sub(tail.weighted_bytes);
                    if let Some(partner) = eligible[..starting_count - 1]
                        .iter()
                        .find(|e| e.weighted_bytes >= max_merged / 2 && e.weighted_bytes <= room)
                    {
                        plan.add(MergeOperation::new(vec![
                            partner.segment.clone(),
                            tail.segment.clone(),
                        ])?);
                    }
                }
            }
            return Ok(plan.into_option());
        }
        debug!(
            "forced merge to {target}: {starting_count} eligible, per-merge bound {max_merge_bytes} bytes"
        );

        // Bin segments smallest first. A bin closes when the next segment
        // would blow the size bound (two segments minimum, so oversized
        // pairs at the tail still fold), the width limit is hit, or the
        // target count is reached.
        let mut plan = MergePlan::new();
        let mut resulting = starting_count;
        loop {
            let mut candidate: Vec<SegmentDescriptor> = Vec::new();
            let mut candidate_bytes: u64 = 0;
            let mut width_left = explicit_factor;
            while resulting > target && width_left > 0 {
                let Some(entry) = eligible.last() else {
                    break;
                };
                let fits = candidate_bytes + entry.weighted_bytes <= max_merge_bytes
                    || candidate.len() < 2;
                if !fits {
                    break;
                }
                let Some(entry) = eligible.pop() else {
                    break;
                };
                candidate_bytes += entry.weighted_bytes;
                width_left -= 1;
                candidate.push(entry.segment);
                if candidate.len() > 1 {
                    resulting -= 1;
                }
            }
            // While a forced merge runs, only full-width merges are safe to
            // start; anything narrower belongs to the final round.
            let full_width = candidate.len() == explicit_factor;
            if candidate.len() > 1 && (!force_merge_running || full_width) {
                trace!(
                    "forced merge of {} segments, {candidate_bytes} bytes, {resulting} segments will remain",
                    candidate.len()
                );
                plan.add(MergeOperation::new(candidate)?);
            } else {
                return Ok(plan.into_option());
            }
        }
    }

    fn find_forced_deletes_merges(
        &self,
        segments: &[SegmentDescriptor],
        ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>> {
        if segments.is_empty() {
            return Ok(None);
        }
        let threshold = self.config.force_merge_deletes_pct_allowed();
        let sorted = self.sorted_entries(segments, ctx);
        let eligible: Vec<SegmentEntry> = sorted
            .into_iter()
            .filter(|entry| entry.del_pct() > threshold && !ctx.is_merging(&entry.segment.name))
            .collect();
        if eligible.is_empty() {
            return Ok(None);
        }
        debug!(
            "forced deletes reclamation: {} segments above {threshold}% deleted",
            eligible.len()
        );

        let budget = MergeBudget {
            max_merge_bytes: self.config.max_merged_segment_bytes(),
            merge_factor: self.config.max_merge_at_once_explicit() as usize,
            allowed_seg_count: usize::MAX,
            allowed_del_count: None,
            allowed_doc_count: u64::MAX,
        };
        let plan = self.select(eligible, MergeKind::ForceDeletes, budget, false)?;
        Ok(plan.into_option())
    }

    fn find_full_flush_merges(
        &self,
        trigger: MergeTrigger,
        segments: &[SegmentDescriptor],
        ctx: &dyn MergeContext,
    ) -> Result<Option<MergePlan>> {
        let sorted = self.sorted_entries(segments, ctx);
        let mut total_bytes: u64 = 0;
        let mut min_segment_bytes = u64::MAX;
        let mut total_live_docs: u64 = 0;
        let mut eligible = Vec::new();
        for entry in sorted {
            if entry.segment.source != SegmentSource::Flush
                || ctx.is_merging(&entry.segment.name)
            {
                continue;
            }
            total_bytes += entry.weighted_bytes;
            min_segment_bytes = min_segment_bytes.min(entry.weighted_bytes);
            total_live_docs += u64::from(entry.live_docs());
            eligible.push(entry);
        }
        if eligible.is_empty() {
            return Ok(None);
        }

        // Same tier budget as natural merging, but no deletion pressure:
        // a commit only wants the flush burst folded, not space recovered.
        let allowed_seg_count = self.allowed_segment_count(total_bytes, min_segment_bytes);
        let budget = MergeBudget {
            max_merge_bytes: self.config.max_merged_segment_bytes(),
            merge_factor: self.config.merge_factor() as usize,
            allowed_seg_count,
            allowed_del_count: None,
            allowed_doc_count: self.allowed_doc_count(total_live_docs),
        };
        debug!(
            "full flush selection ({trigger:?}): {} flushed segments, allowed count {allowed_seg_count}",
            eligible.len()
        );
        let plan = self.select(eligible, MergeKind::Natural, budget, false)?;
        Ok(plan.into_option())
    }
}
