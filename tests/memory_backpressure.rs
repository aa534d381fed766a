mod common;

use clustering_compaction::{
    ClusteringCompactionTask, CollectionSchema, Config, DataType, FieldSchema, FieldValue,
    MemoryObjectStore, PrimaryKey, Row, ScalarValue, SequenceIdAllocator,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use test_log::test;

fn padded_schema() -> CollectionSchema {
    CollectionSchema::new(vec![
        FieldSchema::new(100, "id", DataType::Int64).primary_key(),
        FieldSchema::new(101, "key", DataType::Int64).clustering_key(),
        FieldSchema::new(102, "payload", DataType::VarChar),
    ])
}

fn padded_row(id: i64, key: i64) -> Row {
    let mut fields = FxHashMap::default();
    fields.insert(100, FieldValue::Scalar(ScalarValue::Int64(id)));
    fields.insert(101, FieldValue::Scalar(ScalarValue::Int64(key)));
    fields.insert(
        102,
        FieldValue::Scalar(ScalarValue::VarChar("x".repeat(100))),
    );

    Row {
        row_id: id,
        timestamp: 1_000 + id as u64,
        pk: PrimaryKey::Int64(id),
        fields,
    }
}

// Inputs sized well past a tiny 1 MiB budget: the scheduler must spill
// mid-mapping and total residency must stay bounded.
#[test]
fn memory_budget_forces_spills() -> clustering_compaction::Result<()> {
    const BUDGET: u64 = 1024 * 1024;

    let store = Arc::new(MemoryObjectStore::new());
    let schema = padded_schema();

    let mut segments = vec![];
    let mut next_id = 0i64;

    for segment_id in 1..=2u64 {
        let rows = (0..10_000)
            .map(|i| {
                next_id += 1;
                padded_row(next_id, i % 10)
            })
            .collect::<Vec<_>>();

        segments.push(common::seed_segment(
            &store, &schema, segment_id, &rows, &[], 1_000,
        ));
    }

    // 10 singleton buckets (every key's count exceeds preferRows)
    let mut plan = common::base_plan(schema, segments);
    plan.max_segment_rows = 1_000_000;
    plan.prefer_segment_rows = 1_000;

    let config = Config::new()
        .worker_pool_size(2)
        .memory_buffer_size(BUDGET);

    let task = ClusteringCompactionTask::new(
        plan,
        config,
        store,
        Arc::new(SequenceIdAllocator::new(10_000)),
    );

    let result = task.run()?;

    // Row conservation under pressure
    let output_rows = result.segments.iter().map(|s| s.row_count).sum::<u64>();
    assert_eq!(20_000, output_rows);
    assert_eq!(10, result.segments.len());

    // Spills happened before mapping completed: at least one bucket
    // was flushed more than once
    assert!(
        task.counters().flush_count() > 10,
        "expected intermediate flushes, got {}",
        task.counters().flush_count(),
    );

    let multi_binlog_segments = result
        .segments
        .iter()
        .filter(|segment| {
            segment
                .insert_logs
                .first()
                .is_some_and(|field| field.binlogs.len() > 1)
        })
        .count();
    assert!(multi_binlog_segments > 0);

    // No unbounded growth
    assert!(
        task.counters().peak_buffer_size() < 2 * BUDGET,
        "peak buffer memory {} exceeded twice the budget",
        task.counters().peak_buffer_size(),
    );

    Ok(())
}
