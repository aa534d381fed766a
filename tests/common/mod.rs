#![allow(dead_code)]

use clustering_compaction::{
    binlog::{rows_to_columns, write_blob, Column, DeleteLog},
    reader::RowGroup,
    CollectionSchema, CompactionPlan, CompactionSegment, CompactionType, CompressionType,
    DataType, FieldSchema, FieldValue, InputSegment, MemoryObjectStore, ObjectStore, PrimaryKey,
    Row, ScalarValue, Timestamp,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// Schema with an Int64 primary key (100) and a scalar clustering key (101).
pub fn scalar_schema(clustering_type: DataType) -> CollectionSchema {
    CollectionSchema::new(vec![
        FieldSchema::new(100, "id", DataType::Int64).primary_key(),
        FieldSchema::new(101, "key", clustering_type).clustering_key(),
    ])
}

/// Row with an Int64 clustering key.
pub fn int_row(id: i64, ts: Timestamp, key: i64) -> Row {
    let mut fields = FxHashMap::default();
    fields.insert(100, FieldValue::Scalar(ScalarValue::Int64(id)));
    fields.insert(101, FieldValue::Scalar(ScalarValue::Int64(key)));

    Row {
        row_id: id,
        timestamp: ts,
        pk: PrimaryKey::Int64(id),
        fields,
    }
}

/// Row with a VarChar clustering key.
pub fn varchar_row(id: i64, ts: Timestamp, key: &str) -> Row {
    let mut fields = FxHashMap::default();
    fields.insert(100, FieldValue::Scalar(ScalarValue::Int64(id)));
    fields.insert(101, FieldValue::Scalar(ScalarValue::VarChar(key.into())));

    Row {
        row_id: id,
        timestamp: ts,
        pk: PrimaryKey::Int64(id),
        fields,
    }
}

/// Serializes rows into per-field binlogs of `rows_per_binlog` rows each,
/// uploads them plus the delete log, and returns the segment descriptor.
pub fn seed_segment(
    store: &MemoryObjectStore,
    schema: &CollectionSchema,
    segment_id: u64,
    rows: &[Row],
    deletes: &[(PrimaryKey, Timestamp)],
    rows_per_binlog: usize,
) -> InputSegment {
    let mut insert_logs: FxHashMap<i64, Vec<String>> = FxHashMap::default();

    for (idx, chunk) in rows.chunks(rows_per_binlog.max(1)).enumerate() {
        let columns = rows_to_columns(schema, chunk).expect("rows should match schema");

        for (field_id, column) in columns {
            let blob = write_blob(&column, CompressionType::None).expect("encoding should work");

            let path = format!("input/insert_log/{segment_id}/{field_id}/{idx}");
            store.upload(&path, blob).expect("upload should work");

            insert_logs.entry(field_id).or_default().push(path);
        }
    }

    let mut delete_logs = vec![];

    if !deletes.is_empty() {
        let log = DeleteLog {
            entries: deletes.to_vec(),
        };

        let blob = write_blob(&log, CompressionType::None).expect("encoding should work");
        let path = format!("input/delta_log/{segment_id}/0");
        store.upload(&path, blob).expect("upload should work");

        delete_logs.push(path);
    }

    InputSegment {
        segment_id,
        insert_logs,
        delete_logs,
    }
}

/// A clustering plan over the given inputs with sensible defaults.
pub fn base_plan(schema: CollectionSchema, segments: Vec<InputSegment>) -> CompactionPlan {
    CompactionPlan {
        plan_id: 99,
        collection_id: 1,
        partition_id: 2,
        channel: "ch-0".into(),
        timeout_secs: 300,
        schema,
        ttl: 0,
        max_segment_rows: 100_000,
        prefer_segment_rows: 50_000,
        compaction_type: CompactionType::Clustering,
        segments,
        analyze_root: None,
        analyzed_segments: FxHashSet::default(),
    }
}

/// Downloads and decodes every row of an output segment.
pub fn decode_output_rows(
    store: &MemoryObjectStore,
    schema: &CollectionSchema,
    segment: &CompactionSegment,
) -> Vec<Row> {
    let binlog_count = segment
        .insert_logs
        .first()
        .map(|field| field.binlogs.len())
        .unwrap_or_default();

    let mut rows = vec![];

    for idx in 0..binlog_count {
        let mut columns = FxHashMap::default();

        for field in &segment.insert_logs {
            let descriptor = field.binlogs.get(idx).expect("binlog lists should align");
            let blob = store
                .get(&descriptor.path)
                .expect("output binlog should exist");

            let column: Column =
                clustering_compaction::binlog::read_blob(&blob).expect("decoding should work");

            columns.insert(field.field_id, column);
        }

        let group = RowGroup::from_columns(schema, columns).expect("row group should align");

        for i in 0..group.len() {
            rows.push(group.row(i).expect("row should decode"));
        }
    }

    rows
}

/// The Int64 clustering key of a decoded row.
pub fn clustering_key_i64(row: &Row) -> i64 {
    match row.fields.get(&101) {
        Some(FieldValue::Scalar(ScalarValue::Int64(v))) => *v,
        other => panic!("unexpected clustering key: {other:?}"),
    }
}

/// The VarChar clustering key of a decoded row.
pub fn clustering_key_str(row: &Row) -> String {
    match row.fields.get(&101) {
        Some(FieldValue::Scalar(ScalarValue::VarChar(v))) => v.clone(),
        other => panic!("unexpected clustering key: {other:?}"),
    }
}
