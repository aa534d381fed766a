mod common;

use clustering_compaction::{
    ClusteringCompactionTask, Config, DataType, MemoryObjectStore, PrimaryKey,
    SequenceIdAllocator,
};
use common::{base_plan, decode_output_rows, int_row, scalar_schema, seed_segment};
use std::collections::BTreeSet;
use std::sync::Arc;
use test_log::test;

// 100 rows; 10 are deleted with a later delete timestamp, 5 are
// "upserted" (delete timestamp equals the insert timestamp) and must
// survive.
#[test]
fn tombstones_filter_deleted_rows() -> clustering_compaction::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let schema = scalar_schema(DataType::Int64);

    let rows = (0..100)
        .map(|i| int_row(i, 1_000 + i as u64, i % 10))
        .collect::<Vec<_>>();

    // Rows 0..10: delTs > insertTs -> deleted
    // Rows 10..15: delTs == insertTs -> upsert, survives
    let mut deletes = vec![];
    for i in 0..10i64 {
        deletes.push((PrimaryKey::Int64(i), 1_000 + i as u64 + 1));
    }
    for i in 10..15i64 {
        deletes.push((PrimaryKey::Int64(i), 1_000 + i as u64));
    }

    let segment = seed_segment(&store, &schema, 1, &rows, &deletes, 50);
    let plan = base_plan(schema.clone(), vec![segment]);

    let task = ClusteringCompactionTask::new(
        plan,
        Config::default(),
        store.clone(),
        Arc::new(SequenceIdAllocator::new(10_000)),
    );

    let result = task.run()?;

    assert_eq!(90, task.counters().written_rows());
    assert_eq!(10, task.counters().deleted_rows());
    assert_eq!(0, task.counters().expired_rows());

    let output_pks = result
        .segments
        .iter()
        .flat_map(|segment| decode_output_rows(&store, &schema, segment))
        .map(|row| match row.pk {
            PrimaryKey::Int64(v) => v,
            PrimaryKey::VarChar(_) => panic!("unexpected pk type"),
        })
        .collect::<BTreeSet<_>>();

    assert_eq!(90, output_pks.len());

    // No deleted primary key made it through...
    for pk in 0..10i64 {
        assert!(!output_pks.contains(&pk), "pk {pk} should be deleted");
    }

    // ...but all upserted ones did
    for pk in 10..15i64 {
        assert!(output_pks.contains(&pk), "pk {pk} should survive its upsert");
    }

    Ok(())
}
