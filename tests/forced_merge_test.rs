use calamus::{
    InMemoryMergeContext, MergePlan, MergePolicy, SegmentDescriptor, SegmentSource,
    TieredMergeConfig, TieredMergePolicy,
};

const MB: u64 = 1024 * 1024;

fn merged_seg(name: &str, max_doc: u32, del_count: u32, byte_size: u64) -> SegmentDescriptor {
    SegmentDescriptor::new(name, max_doc, del_count, byte_size, SegmentSource::Merge)
}

fn segment_count_after(starting: usize, plan: &MergePlan) -> usize {
    let consumed: usize = plan.operations().iter().map(|op| op.len()).sum();
    starting - consumed + plan.len()
}

fn max_operation_bytes(plan: &MergePlan) -> u64 {
    plan.operations()
        .iter()
        .map(|op| op.total_bytes())
        .max()
        .unwrap_or(0)
}

#[test]
fn test_forced_merge_reaches_exact_target() -> calamus::Result<()> {
    let config = TieredMergeConfig::builder()
        .max_merged_segment_mb(10.0)
        .build()?;
    let policy = TieredMergePolicy::new(config);
    let ctx = InMemoryMergeContext::new();

    let segments: Vec<SegmentDescriptor> = (0..30)
        .map(|i| merged_seg(&format!("seg{i:02}"), 1000, 0, MB))
        .collect();

    for target in 3..=13u32 {
        let plan = policy
            .find_forced_merges(&segments, target, None, &ctx)?
            .expect("above target count");
        assert_eq!(
            segment_count_after(segments.len(), &plan),
            target as usize,
            "target {target}"
        );
        // No merge may blow past 1.5x of an even split of the index.
        let limit = (1.5 * (30.0 * MB as f64 / f64::from(target)).max(10.0 * MB as f64)) as u64;
        assert!(max_operation_bytes(&plan) <= limit, "target {target}");
    }
    Ok(())
}

#[test]
fn test_forced_merge_many_small_segments() -> calamus::Result<()> {
    let config = TieredMergeConfig::builder()
        .max_merged_segment_mb(10.0)
        .build()?;
    let policy = TieredMergePolicy::new(config);
    let ctx = InMemoryMergeContext::new();

    // One hundred 100 KB segments merged down to five: the width limit of
    // thirty forces several rounds of binning, which may overshoot the
    // target slightly but never undershoot it.
    let segments: Vec<SegmentDescriptor> = (0..100)
        .map(|i| merged_seg(&format!("seg{i:03}"), 1000, 0, 100 * 1024))
        .collect();
    let plan = policy
        .find_forced_merges(&segments, 5, None, &ctx)?
        .expect("above target count");
    assert!(segment_count_after(segments.len(), &plan) >= 5);
    for op in plan.operations() {
        assert!(op.len() <= policy.config().max_merge_at_once_explicit() as usize);
    }
    Ok(())
}

#[test]
fn test_final_forced_merge_deferred_while_merging() -> calamus::Result<()> {
    let config = TieredMergeConfig::builder()
        .max_merged_segment_mb(10.0)
        .build()?;
    let policy = TieredMergePolicy::new(config);
    let ctx = InMemoryMergeContext::new();

    let segments: Vec<SegmentDescriptor> = (0..30)
        .map(|i| merged_seg(&format!("seg{i:02}"), 1000, 0, MB))
        .collect();
    ctx.set_merging("seg00");

    // 29 idle segments is within one round of any target in this range,
    // so the whole request waits for the in-flight merge.
    for target in 3..=12u32 {
        assert!(
            policy
                .find_forced_merges(&segments, target, None, &ctx)?
                .is_none(),
            "target {target}"
        );
    }

    // Once the index is quiescent the same request goes through.
    ctx.clear_merging("seg00");
    assert!(policy.find_forced_merges(&segments, 3, None, &ctx)?.is_some());
    Ok(())
}

#[test]
fn test_forced_merge_target_above_count() -> calamus::Result<()> {
    let config = TieredMergeConfig::builder()
        .max_merged_segment_mb(10.0)
        .build()?;
    let policy = TieredMergePolicy::new(config);
    let ctx = InMemoryMergeContext::new();

    let segments: Vec<SegmentDescriptor> = (0..30)
        .map(|i| merged_seg(&format!("seg{i:02}"), 1000, 0, MB))
        .collect();
    assert!(policy.find_forced_merges(&segments, 50, None, &ctx)?.is_none());
    Ok(())
}

#[test]
fn test_forced_deletes_threshold() -> calamus::Result<()> {
    let config = TieredMergeConfig::builder()
        .force_merge_deletes_pct_allowed(30.0)
        .build()?;
    let policy = TieredMergePolicy::new(config);
    let ctx = InMemoryMergeContext::new();

    let segments = vec![merged_seg("big", 1_000_000, 0, 1024 * MB)];

    // 15% deleted stays under a 30% threshold.
    ctx.set_deleted_count("big", 150_000);
    assert!(policy.find_forced_deletes_merges(&segments, &ctx)?.is_none());

    // A further 16% crosses it and the segment is rewritten alone.
    ctx.set_deleted_count("big", 310_000);
    let plan = policy
        .find_forced_deletes_merges(&segments, &ctx)?
        .expect("over the per-segment threshold");
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.operations()[0].len(), 1);
    assert_eq!(plan.operations()[0].segments()[0].name, "big");
    Ok(())
}

#[test]
fn test_forced_deletes_respect_max_merged_size() -> calamus::Result<()> {
    let config = TieredMergeConfig::builder()
        .max_merged_segment_mb(100.0)
        .build()?;
    let policy = TieredMergePolicy::new(config);
    let ctx = InMemoryMergeContext::new();

    // Five segments, 20% deleted each, 48 MB live apiece: three merges at
    // most two segments wide, so none exceeds the 100 MB ceiling.
    let segments: Vec<SegmentDescriptor> = (0..5)
        .map(|i| merged_seg(&format!("seg{i}"), 100_000, 20_000, 60 * MB))
        .collect();
    let plan = policy
        .find_forced_deletes_merges(&segments, &ctx)?
        .expect("all segments over the threshold");

    let covered: usize = plan.operations().iter().map(|op| op.len()).sum();
    assert_eq!(covered, 5);
    for op in plan.operations() {
        let live: u64 = op
            .segments()
            .iter()
            .map(|s| (0.8 * s.byte_size as f64) as u64)
            .sum();
        assert!(live <= 100 * MB);
    }
    Ok(())
}

#[test]
fn test_forced_deletes_skip_merging_segments() -> calamus::Result<()> {
    let policy = TieredMergePolicy::default();
    let ctx = InMemoryMergeContext::new();

    let segments = vec![merged_seg("busy", 100_000, 40_000, 100 * MB)];
    ctx.set_merging("busy");
    assert!(policy.find_forced_deletes_merges(&segments, &ctx)?.is_none());
    Ok(())
}
