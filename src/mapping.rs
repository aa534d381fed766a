// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    binlog::{read_blob, Column},
    planner::{vector, Classifier},
    plan::InputSegment,
    pool::for_each_parallel,
    reader::RowGroup,
    schema::{ROW_ID_FIELD_ID, TIMESTAMP_FIELD_ID},
    task::TaskContext,
    tombstone::TombstoneIndex,
    value::FieldId,
};
use rustc_hash::FxHashMap;
use std::sync::atomic::Ordering::AcqRel;

/// Runs the mapping phase: one worker per input segment, bounded by
/// the worker pool size.
pub(crate) fn run(
    ctx: &TaskContext<'_>,
    classifier: &Classifier,
    tombstones: &TombstoneIndex,
) -> crate::Result<()> {
    for_each_parallel(
        ctx.plan.segments.iter().collect(),
        ctx.config.worker_pool_size,
        |segment| map_segment(ctx, classifier, tombstones, segment),
    )
}

/// Streams one input segment: filters deleted and expired rows,
/// classifies the survivors and appends them to their buckets.
fn map_segment(
    ctx: &TaskContext<'_>,
    classifier: &Classifier,
    tombstones: &TombstoneIndex,
    segment: &InputSegment,
) -> crate::Result<()> {
    ctx.check_cancelled()?;

    let mapping = match classifier {
        Classifier::Vector { field_id } => Some(vector::load_offset_mapping(
            ctx.store,
            ctx.plan,
            *field_id,
            segment.segment_id,
        )?),
        Classifier::Scalar { .. } => None,
    };

    let binlog_count = segment
        .insert_logs
        .values()
        .map(Vec::len)
        .max()
        .unwrap_or(0);

    if binlog_count == 0 {
        return Err(crate::Error::IllegalPlan(format!(
            "input segment {} has no binlogs",
            segment.segment_id,
        )));
    }

    log::debug!(
        "Mapping segment {} ({binlog_count} binlogs per field)",
        segment.segment_id,
    );

    let field_ids = field_ids_to_read(ctx);

    let mut offset = 0usize;
    let mut written_since_check = 0u64;

    for idx in 0..binlog_count {
        ctx.check_cancelled()?;

        let paths = field_ids
            .iter()
            .map(|field_id| {
                segment
                    .insert_logs
                    .get(field_id)
                    .and_then(|logs| logs.get(idx))
                    .cloned()
                    .ok_or_else(|| {
                        crate::Error::Internal(format!(
                            "segment {}: field {field_id} has no binlog {idx}",
                            segment.segment_id,
                        ))
                    })
            })
            .collect::<crate::Result<Vec<_>>>()?;

        let blobs = ctx.store.download(&paths)?;

        let mut columns = FxHashMap::default();
        for (field_id, blob) in field_ids.iter().zip(&blobs) {
            columns.insert(*field_id, read_blob::<Column>(blob)?);
        }

        let group = RowGroup::from_columns(&ctx.plan.schema, columns)?;

        for i in 0..group.len() {
            let row = group.row(i)?;

            if tombstones.is_deleted(&row.pk, row.timestamp) {
                ctx.counters.deleted_rows.fetch_add(1, AcqRel);
                continue;
            }

            if tombstones.is_expired(row.timestamp) {
                ctx.counters.expired_rows.fetch_add(1, AcqRel);
                continue;
            }

            let bucket = classifier.classify(
                &row,
                offset + i,
                mapping.as_deref(),
                ctx.buffers.len(),
            )?;

            let buffer = ctx.buffer(bucket)?;

            let retired = buffer.write(
                row,
                ctx.allocator,
                ctx.plan.max_segment_rows,
                ctx.config.writer_flush_size,
            )?;
            ctx.counters.written_rows.fetch_add(1, AcqRel);

            if let Some((writer, pack)) = retired {
                ctx.submit_writer(bucket, writer, pack)?;
            }

            written_since_check += 1;

            if written_since_check % ctx.config.flush_check_interval == 0 {
                ctx.check_cancelled()?;
                ctx.check_memory_trigger()?;
                ctx.backpressure()?;
            }
        }

        offset += group.len();
    }

    log::debug!("Finished mapping segment {}", segment.segment_id);

    Ok(())
}

/// System columns plus every schema field.
fn field_ids_to_read(ctx: &TaskContext<'_>) -> Vec<FieldId> {
    let mut field_ids = Vec::with_capacity(ctx.plan.schema.fields.len() + 2);
    field_ids.push(ROW_ID_FIELD_ID);
    field_ids.push(TIMESTAMP_FIELD_ID);
    field_ids.extend(ctx.plan.schema.fields.iter().map(|f| f.field_id));

    field_ids
}
