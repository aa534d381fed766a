// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Classifier;
use crate::{
    binlog::{read_blob, Column},
    buffer::ClusterBuffer,
    pool::for_each_parallel,
    plan::{CompactionPlan, InputSegment},
    schema::{FieldSchema, TIMESTAMP_FIELD_ID},
    stats::FieldStats,
    storage::{IdAllocator, ObjectStore},
    tombstone::TombstoneIndex,
    value::{ScalarValue, Timestamp},
    Config,
};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

/// Runs the analyze pass and the greedy range-bucketing, then
/// materializes one cluster buffer per bucket.
pub(crate) fn plan(
    store: &dyn ObjectStore,
    allocator: &dyn IdAllocator,
    config: &Config,
    plan: &CompactionPlan,
    tombstones: &TombstoneIndex,
) -> crate::Result<(Classifier, Vec<ClusterBuffer>)> {
    let clustering = plan.schema.clustering_field()?.clone();

    let histogram = analyze(store, config, plan, &clustering, tombstones)?;

    let mut sorted = histogram.into_iter().collect::<Vec<_>>();
    sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

    let buckets = split_buckets(sorted, plan.prefer_segment_rows, plan.max_segment_rows);

    log::info!(
        "Plan {}: range-bucketing produced {} buckets",
        plan.plan_id,
        buckets.len(),
    );

    let schema = Arc::new(plan.schema.clone());
    let mut membership = FxHashMap::default();
    let mut buffers = Vec::with_capacity(buckets.len());

    for (bucket_id, keys) in buckets.into_iter().enumerate() {
        let buffer = ClusterBuffer::new(
            bucket_id,
            allocator.alloc_one()?,
            schema.clone(),
            clustering.field_id,
            FieldStats::new_scalar(clustering.field_id, clustering.data_type),
        );

        for key in keys {
            buffer.seed_stats_key(&key);
            membership.insert(key, bucket_id);
        }

        buffers.push(buffer);
    }

    Ok((
        Classifier::Scalar {
            field_id: clustering.field_id,
            membership,
        },
        buffers,
    ))
}

/// One-pass histogram over the clustering key column.
///
/// Applies only the expiration predicate; soft-deleted rows are
/// tolerated because bucket sizes are advisory.
fn analyze(
    store: &dyn ObjectStore,
    config: &Config,
    plan: &CompactionPlan,
    clustering: &FieldSchema,
    tombstones: &TombstoneIndex,
) -> crate::Result<FxHashMap<ScalarValue, u64>> {
    let histogram = Mutex::new(FxHashMap::<ScalarValue, u64>::default());

    for_each_parallel(
        plan.segments.iter().collect(),
        config.worker_pool_size,
        |segment| {
            let local = analyze_segment(store, segment, clustering, tombstones)?;

            #[allow(clippy::expect_used)]
            let mut histogram = histogram.lock().expect("lock is poisoned");

            for (key, count) in local {
                *histogram.entry(key).or_insert(0) += count;
            }

            Ok(())
        },
    )?;

    #[allow(clippy::expect_used)]
    let histogram = histogram.into_inner().expect("lock is poisoned");

    Ok(histogram)
}

fn analyze_segment(
    store: &dyn ObjectStore,
    segment: &InputSegment,
    clustering: &FieldSchema,
    tombstones: &TombstoneIndex,
) -> crate::Result<FxHashMap<ScalarValue, u64>> {
    let mut local = FxHashMap::<ScalarValue, u64>::default();

    let key_logs = segment
        .insert_logs
        .get(&clustering.field_id)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for (idx, key_path) in key_logs.iter().enumerate() {
        let ts_path = segment
            .insert_logs
            .get(&TIMESTAMP_FIELD_ID)
            .and_then(|logs| logs.get(idx))
            .ok_or_else(|| {
                crate::Error::Internal(format!(
                    "segment {}: timestamp binlog {idx} is missing",
                    segment.segment_id,
                ))
            })?;

        let blobs = store.download(&[key_path.clone(), ts_path.clone()])?;

        let (Some(key_blob), Some(ts_blob)) = (blobs.first(), blobs.get(1)) else {
            return Err(crate::Error::Internal("download dropped a blob".into()));
        };

        let keys: Column = read_blob(key_blob)?;
        let timestamps: Column = read_blob(ts_blob)?;

        let Column::Int64(timestamps) = timestamps else {
            return Err(crate::Error::Internal(
                "timestamp column has an unexpected type".into(),
            ));
        };

        for (offset, ts) in timestamps.iter().enumerate() {
            #[allow(clippy::cast_sign_loss)]
            if tombstones.is_expired(*ts as Timestamp) {
                continue;
            }

            let Some(value) = keys.get(offset) else {
                return Err(crate::Error::Internal(format!(
                    "segment {}: clustering key binlog {idx} is misaligned",
                    segment.segment_id,
                )));
            };

            let Some(key) = value.as_scalar() else {
                return Err(crate::Error::Internal(
                    "clustering key column holds vectors".into(),
                ));
            };

            *local.entry(key.clone()).or_insert(0) += 1;
        }
    }

    Ok(local)
}

/// Greedy range-bucketing over keys sorted in their natural order.
///
/// Returns the bucket key sets, including a (possibly empty) residual
/// bucket. Empty buckets are permitted, they just never receive rows.
fn split_buckets(
    sorted: Vec<(ScalarValue, u64)>,
    prefer_rows: u64,
    max_rows: u64,
) -> Vec<Vec<ScalarValue>> {
    let mut buckets = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0u64;

    for (key, count) in sorted {
        if count > prefer_rows {
            if !current.is_empty() {
                buckets.push(std::mem::take(&mut current));
                current_size = 0;
            }

            buckets.push(vec![key]);
        } else if current_size + count > max_rows {
            buckets.push(std::mem::take(&mut current));

            current.push(key);
            current_size = count;
        } else if current_size + count > prefer_rows {
            current.push(key);
            buckets.push(std::mem::take(&mut current));
            current_size = 0;
        } else {
            current.push(key);
            current_size += count;
        }
    }

    buckets.push(current);

    buckets
}
