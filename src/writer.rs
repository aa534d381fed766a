// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    binlog::{rows_to_columns, Column},
    schema::CollectionSchema,
    value::{FieldId, Row, SegmentId},
};
use std::sync::Arc;

/// Accumulates rows for one in-flight output segment
///
/// A writer owns exactly one segment ID. It is swapped out of its
/// cluster buffer on every flush; if the flush also seals the segment,
/// the replacement writer gets a freshly allocated ID.
pub(crate) struct SegmentWriter {
    segment_id: SegmentId,
    schema: Arc<CollectionSchema>,
    rows: Vec<Row>,
    written_memory_size: u64,
}

impl SegmentWriter {
    pub(crate) fn new(segment_id: SegmentId, schema: Arc<CollectionSchema>) -> Self {
        Self {
            segment_id,
            schema,
            rows: Vec::new(),
            written_memory_size: 0,
        }
    }

    pub(crate) fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    pub(crate) fn row_num(&self) -> u64 {
        self.rows.len() as u64
    }

    pub(crate) fn written_memory_size(&self) -> u64 {
        self.written_memory_size
    }

    /// Appends a row, returning its accounted size in bytes.
    pub(crate) fn write(&mut self, row: Row) -> u64 {
        let size = row.memory_size();

        self.rows.push(row);
        self.written_memory_size += size;

        size
    }

    /// Returns `true` once the writer's batch reached the byte threshold.
    pub(crate) fn is_full(&self, flush_size: u64) -> bool {
        self.written_memory_size >= flush_size
    }

    /// Transposes the accumulated batch into per-field columns,
    /// consuming the writer.
    pub(crate) fn into_columns(self) -> crate::Result<Vec<(FieldId, Column)>> {
        rows_to_columns(&self.schema, &self.rows)
    }
}
