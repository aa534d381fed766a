// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    plan::{BinlogDescriptor, CompactionSegment},
    schema::CollectionSchema,
    stats::FieldStats,
    storage::IdAllocator,
    value::{BucketId, FieldId, Row, ScalarValue, SegmentId},
    writer::SegmentWriter,
};
use rustc_hash::FxHashMap;
use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{AcqRel, Acquire},
    },
    Arc, Mutex, MutexGuard,
};

struct BufferState {
    writer: SegmentWriter,
    stats: FieldStats,
}

/// Binlogs and segments a buffer has spilled to object storage so far
///
/// Owned by the buffer's flush lock: holding the guard *is* holding
/// the flush lock. Spilled binlogs are keyed by their output segment,
/// so a seal that was queued behind a spill of the successor segment
/// still seals exactly its own rows.
#[derive(Default)]
pub(crate) struct FlushedArtifacts {
    /// Segment ID -> field ID -> binlogs of that (unsealed) segment
    pub binlogs: FxHashMap<SegmentId, FxHashMap<FieldId, Vec<BinlogDescriptor>>>,

    /// Segment ID -> rows spilled for it but not yet sealed
    pub row_counts: FxHashMap<SegmentId, u64>,

    /// Output segments sealed by this buffer so far
    pub uploaded: Vec<CompactionSegment>,

    /// Clustering key stats per sealed segment
    pub uploaded_stats: FxHashMap<SegmentId, FieldStats>,
}

/// Per-bucket in-memory row accumulator
///
/// Writes go through the buffer lock; flushing goes through the
/// separate flush lock ([`FlushedArtifacts`]), so appends into a
/// freshly swapped-in writer can proceed while the old writer's rows
/// are being uploaded.
pub(crate) struct ClusterBuffer {
    id: BucketId,
    schema: Arc<CollectionSchema>,
    clustering_field_id: FieldId,

    state: Mutex<BufferState>,

    /// Bytes held by the open writer plus in-flight flush snapshots
    memory_size: AtomicU64,

    /// Rows in the open writer
    row_num: AtomicU64,

    /// Rows spilled to object storage but not yet sealed into an
    /// output segment
    flushed_row_num: AtomicU64,

    flushed: Mutex<FlushedArtifacts>,
}

impl ClusterBuffer {
    pub(crate) fn new(
        id: BucketId,
        segment_id: SegmentId,
        schema: Arc<CollectionSchema>,
        clustering_field_id: FieldId,
        stats: FieldStats,
    ) -> Self {
        Self {
            id,
            schema: schema.clone(),
            clustering_field_id,
            state: Mutex::new(BufferState {
                writer: SegmentWriter::new(segment_id, schema),
                stats,
            }),
            memory_size: AtomicU64::new(0),
            row_num: AtomicU64::new(0),
            flushed_row_num: AtomicU64::new(0),
            flushed: Mutex::new(FlushedArtifacts::default()),
        }
    }

    pub(crate) fn id(&self) -> BucketId {
        self.id
    }

    pub(crate) fn memory_size(&self) -> u64 {
        self.memory_size.load(Acquire)
    }

    pub(crate) fn row_num(&self) -> u64 {
        self.row_num.load(Acquire)
    }

    pub(crate) fn flushed_row_num(&self) -> u64 {
        self.flushed_row_num.load(Acquire)
    }

    /// Appends a row and runs the flush trigger while still holding
    /// the buffer lock, so the segment row cap is exact even with
    /// concurrent writers.
    ///
    /// Returns the retired writer (plus whether to seal, "pack") if
    /// the open segment reached the row cap or the writer is full.
    /// A new segment ID is allocated iff the seal condition is met.
    #[allow(clippy::expect_used)]
    pub(crate) fn write(
        &self,
        row: Row,
        allocator: &dyn IdAllocator,
        max_segment_rows: u64,
        flush_size: u64,
    ) -> crate::Result<Option<(SegmentWriter, bool)>> {
        let mut state = self.state.lock().expect("lock is poisoned");

        if let Some(scalar) = row
            .fields
            .get(&self.clustering_field_id)
            .and_then(|v| v.as_scalar())
        {
            state.stats.update_min_max(scalar);
        }

        let size = state.writer.write(row);

        self.row_num.fetch_add(1, AcqRel);
        self.memory_size.fetch_add(size, AcqRel);

        let seal =
            self.flushed_row_num.load(Acquire) + state.writer.row_num() >= max_segment_rows;

        if !seal && !state.writer.is_full(flush_size) {
            return Ok(None);
        }

        self.swap_writer(&mut state, allocator, seal).map(Some)
    }

    /// Unconditionally swaps in a fresh writer, retiring the old one.
    #[allow(clippy::expect_used)]
    pub(crate) fn refresh_writer(
        &self,
        allocator: &dyn IdAllocator,
        max_segment_rows: u64,
    ) -> crate::Result<(SegmentWriter, bool)> {
        let mut state = self.state.lock().expect("lock is poisoned");

        let seal =
            self.flushed_row_num.load(Acquire) + state.writer.row_num() >= max_segment_rows;

        self.swap_writer(&mut state, allocator, seal)
    }

    /// Retires the open writer for the final drain; the replacement
    /// writer (same segment ID) never receives rows.
    #[allow(clippy::expect_used)]
    pub(crate) fn take_writer_for_seal(&self) -> SegmentWriter {
        let mut state = self.state.lock().expect("lock is poisoned");

        let fresh = SegmentWriter::new(state.writer.segment_id(), self.schema.clone());
        let old_writer = std::mem::replace(&mut state.writer, fresh);

        self.row_num.store(0, std::sync::atomic::Ordering::Release);

        old_writer
    }

    fn swap_writer(
        &self,
        state: &mut BufferState,
        allocator: &dyn IdAllocator,
        seal: bool,
    ) -> crate::Result<(SegmentWriter, bool)> {
        let next_segment_id = if seal {
            allocator.alloc_one()?
        } else {
            state.writer.segment_id()
        };

        let fresh = SegmentWriter::new(next_segment_id, self.schema.clone());
        let old_writer = std::mem::replace(&mut state.writer, fresh);

        self.row_num.store(0, std::sync::atomic::Ordering::Release);

        if seal {
            log::debug!(
                "Bucket {}: rotating to segment {next_segment_id}",
                self.id,
            );
        }

        Ok((old_writer, seal))
    }

    /// Clones the running clustering key stats.
    #[allow(clippy::expect_used)]
    pub(crate) fn cloned_stats(&self) -> FieldStats {
        self.state.lock().expect("lock is poisoned").stats.clone()
    }

    /// Widens the scalar stats by one planner-emitted bucket key.
    #[allow(clippy::expect_used)]
    pub(crate) fn seed_stats_key(&self, key: &ScalarValue) {
        self.state
            .lock()
            .expect("lock is poisoned")
            .stats
            .update_min_max(key);
    }

    /// Acquires the flush lock, giving access to the flushed artifacts.
    #[allow(clippy::expect_used)]
    pub(crate) fn lock_flushed(&self) -> MutexGuard<'_, FlushedArtifacts> {
        self.flushed.lock().expect("lock is poisoned")
    }

    /// Accounts a completed flush: `rows` left the buffer, `bytes`
    /// were released.
    pub(crate) fn finish_flush(&self, rows: u64, bytes: u64) {
        self.flushed_row_num.fetch_add(rows, AcqRel);
        self.memory_size.fetch_sub(bytes, AcqRel);
    }

    /// Retires `rows` spilled rows after their segment was sealed.
    pub(crate) fn finish_seal(&self, rows: u64) {
        self.flushed_row_num.fetch_sub(rows, AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schema::{DataType, FieldSchema},
        storage::SequenceIdAllocator,
        value::{FieldValue, PrimaryKey},
    };
    use test_log::test;

    fn test_buffer() -> ClusterBuffer {
        let schema = Arc::new(CollectionSchema::new(vec![
            FieldSchema::new(100, "id", DataType::Int64).primary_key(),
            FieldSchema::new(101, "age", DataType::Int32).clustering_key(),
        ]));

        ClusterBuffer::new(
            0,
            1_000,
            schema,
            101,
            FieldStats::new_scalar(101, DataType::Int32),
        )
    }

    fn test_row(id: i64, age: i32) -> Row {
        let mut fields = FxHashMap::default();
        fields.insert(100, FieldValue::Scalar(ScalarValue::Int64(id)));
        fields.insert(101, FieldValue::Scalar(ScalarValue::Int32(age)));

        Row {
            row_id: id,
            timestamp: 1,
            pk: PrimaryKey::Int64(id),
            fields,
        }
    }

    #[test]
    fn buffer_write_accounts_memory() -> crate::Result<()> {
        let buffer = test_buffer();
        let allocator = SequenceIdAllocator::new(2_000);

        let retired = buffer.write(test_row(1, 30), &allocator, u64::MAX, u64::MAX)?;
        assert!(retired.is_none());

        assert!(buffer.memory_size() > 0);
        assert_eq!(1, buffer.row_num());

        Ok(())
    }

    #[test]
    fn buffer_refresh_without_seal_keeps_segment_id() -> crate::Result<()> {
        let buffer = test_buffer();
        let allocator = SequenceIdAllocator::new(2_000);

        buffer.write(test_row(1, 30), &allocator, u64::MAX, u64::MAX)?;

        let (writer, pack) = buffer.refresh_writer(&allocator, u64::MAX)?;
        assert!(!pack);
        assert_eq!(1_000, writer.segment_id());
        assert_eq!(1, writer.row_num());
        assert_eq!(0, buffer.row_num());

        // Memory is only released once the flush completes
        assert!(buffer.memory_size() > 0);
        buffer.finish_flush(writer.row_num(), writer.written_memory_size());
        assert_eq!(0, buffer.memory_size());
        assert_eq!(1, buffer.flushed_row_num());

        Ok(())
    }

    #[test]
    fn buffer_seals_at_row_cap() -> crate::Result<()> {
        let buffer = test_buffer();
        let allocator = SequenceIdAllocator::new(2_000);

        assert!(buffer
            .write(test_row(1, 30), &allocator, 2, u64::MAX)?
            .is_none());

        let retired = buffer.write(test_row(2, 31), &allocator, 2, u64::MAX)?;
        let (writer, pack) = retired.expect("row cap should fire");

        assert!(pack);
        assert_eq!(1_000, writer.segment_id());
        assert_eq!(2, writer.row_num());

        // The replacement writer owns the freshly allocated ID
        let next = buffer.take_writer_for_seal();
        assert_eq!(2_000, next.segment_id());

        Ok(())
    }

    #[test]
    fn buffer_rotates_full_writer_without_seal() -> crate::Result<()> {
        let buffer = test_buffer();
        let allocator = SequenceIdAllocator::new(2_000);

        let retired = buffer.write(test_row(1, 30), &allocator, u64::MAX, 1)?;
        let (writer, pack) = retired.expect("byte threshold should fire");

        assert!(!pack);
        assert_eq!(1_000, writer.segment_id());

        // Same open segment continues in the replacement writer
        let next = buffer.take_writer_for_seal();
        assert_eq!(1_000, next.segment_id());

        Ok(())
    }

    #[test]
    fn buffer_tracks_min_max() -> crate::Result<()> {
        let buffer = test_buffer();
        let allocator = SequenceIdAllocator::new(2_000);

        buffer.write(test_row(1, 42), &allocator, u64::MAX, u64::MAX)?;
        buffer.write(test_row(2, 7), &allocator, u64::MAX, u64::MAX)?;

        let stats = buffer.cloned_stats();
        assert_eq!(
            crate::stats::StatsBounds::Scalar {
                min: Some(ScalarValue::Int32(7)),
                max: Some(ScalarValue::Int32(42)),
            },
            stats.bounds,
        );

        Ok(())
    }
}
