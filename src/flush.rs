// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    binlog::write_blob,
    buffer::{ClusterBuffer, FlushedArtifacts},
    plan::{BinlogDescriptor, CompactionSegment, FieldBinlog},
    pool::for_each_parallel,
    task::TaskContext,
    value::SegmentId,
    writer::SegmentWriter,
};
use std::sync::atomic::Ordering::AcqRel;

/// Serializes a retired writer's batch into one binlog per field and
/// uploads them; with `pack`, additionally seals the buffer's open
/// output segment.
///
/// Holds the buffer's flush lock for its entirety. The buffer lock is
/// *not* held, so appends into the replacement writer proceed
/// concurrently.
pub(crate) fn flush_binlog(
    ctx: &TaskContext<'_>,
    buffer: &ClusterBuffer,
    writer: SegmentWriter,
    pack: bool,
) -> crate::Result<()> {
    let mut artifacts = buffer.lock_flushed();

    let segment_id = writer.segment_id();
    let row_num = writer.row_num();
    let writer_size = writer.written_memory_size();

    if row_num == 0 {
        if pack {
            pack_buffer_to_segment(ctx, buffer, &mut artifacts, segment_id)?;
        }

        return Ok(());
    }

    log::trace!(
        "Flushing {row_num} rows of bucket {} into segment {segment_id}",
        buffer.id(),
    );

    let segment_binlogs = artifacts.binlogs.entry(segment_id).or_default();

    for (field_id, column) in writer.into_columns()? {
        let row_count = column.len() as u64;
        let blob = write_blob(&column, ctx.config.compression)?;
        let byte_size = blob.len() as u64;

        let log_id = ctx.allocator.alloc_one()?;
        let path = ctx.binlog_path(segment_id, field_id, log_id);
        ctx.store.upload(&path, blob)?;

        segment_binlogs
            .entry(field_id)
            .or_default()
            .push(BinlogDescriptor {
                path,
                row_count,
                byte_size,
            });
    }

    *artifacts.row_counts.entry(segment_id).or_default() += row_num;

    buffer.finish_flush(row_num, writer_size);
    ctx.counters.flush_count.fetch_add(1, AcqRel);

    if pack {
        pack_buffer_to_segment(ctx, buffer, &mut artifacts, segment_id)?;
    }

    Ok(())
}

/// Assembles the buffer's accumulated binlogs plus serialized field
/// stats into a complete output segment.
///
/// A no-op if nothing was spilled for the open segment.
fn pack_buffer_to_segment(
    ctx: &TaskContext<'_>,
    buffer: &ClusterBuffer,
    artifacts: &mut FlushedArtifacts,
    segment_id: SegmentId,
) -> crate::Result<()> {
    let Some(row_count) = artifacts.row_counts.remove(&segment_id) else {
        return Ok(());
    };

    if row_count == 0 {
        return Ok(());
    }

    let stats = buffer.cloned_stats();

    let stats_blob = write_blob(
        &crate::stats::SegmentStats {
            field_stats: vec![stats.clone()],
            row_count,
        },
        ctx.config.compression,
    )?;
    let byte_size = stats_blob.len() as u64;

    let log_id = ctx.allocator.alloc_one()?;
    let stats_path = ctx.statslog_path(segment_id, stats.field_id, log_id);
    ctx.store.upload(&stats_path, stats_blob)?;

    let mut insert_logs = artifacts
        .binlogs
        .remove(&segment_id)
        .unwrap_or_default()
        .into_iter()
        .map(|(field_id, binlogs)| FieldBinlog { field_id, binlogs })
        .collect::<Vec<_>>();
    insert_logs.sort_by_key(|field| field.field_id);

    let segment = CompactionSegment {
        plan_id: ctx.plan.plan_id,
        segment_id,
        channel: ctx.plan.channel.clone(),
        row_count,
        insert_logs,
        stats_log: FieldBinlog {
            field_id: stats.field_id,
            binlogs: vec![BinlogDescriptor {
                path: stats_path,
                row_count,
                byte_size,
            }],
        },
    };

    artifacts.uploaded.push(segment);
    artifacts.uploaded_stats.insert(segment_id, stats);
    buffer.finish_seal(row_count);

    log::debug!(
        "Bucket {}: sealed segment {segment_id} with {row_count} rows",
        buffer.id(),
    );

    Ok(())
}

/// Drains the fullest buffers until the projected total memory drops
/// below the low watermark.
///
/// Skipped entirely if another drain is already running.
pub(crate) fn flush_largest_buffers(ctx: &TaskContext<'_>) -> crate::Result<()> {
    let Ok(_guard) = ctx.flush_mutex.try_lock() else {
        log::trace!("Drain already in progress, skipping");
        return Ok(());
    };

    let mut order = ctx
        .buffers
        .iter()
        .filter(|buffer| buffer.row_num() > 0)
        .collect::<Vec<_>>();
    order.sort_by_key(|buffer| std::cmp::Reverse(buffer.row_num()));

    let low = ctx.config.low_threshold();
    let mut projected = ctx.used_memory();
    let mut jobs = Vec::new();

    for buffer in order {
        if projected <= low {
            break;
        }

        let (writer, pack) =
            buffer.refresh_writer(ctx.allocator, ctx.plan.max_segment_rows)?;

        // Raced to empty between the sort and the swap
        if writer.row_num() == 0 {
            continue;
        }

        projected = projected.saturating_sub(writer.written_memory_size());
        jobs.push((buffer, writer, pack));
    }

    log::debug!(
        "Draining {} buffers (projected memory: {projected} B)",
        jobs.len(),
    );

    for_each_parallel(
        jobs,
        ctx.config.worker_pool_size,
        |(buffer, writer, pack)| flush_binlog(ctx, buffer, writer, pack),
    )
}

/// Final drain: seals every buffer's open segment.
///
/// Blocks until any in-flight drain finished.
#[allow(clippy::expect_used)]
pub(crate) fn flush_all(ctx: &TaskContext<'_>) -> crate::Result<()> {
    let _guard = ctx.flush_mutex.lock().expect("lock is poisoned");

    log::debug!("Final drain of {} buffers", ctx.buffers.len());

    let jobs = ctx
        .buffers
        .iter()
        .map(|buffer| (buffer, buffer.take_writer_for_seal()))
        .collect::<Vec<_>>();

    for_each_parallel(jobs, ctx.config.worker_pool_size, |(buffer, writer)| {
        flush_binlog(ctx, buffer, writer, true)
    })
}
