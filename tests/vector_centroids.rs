mod common;

use clustering_compaction::{
    binlog::{read_blob, write_blob, CentroidIdMapping, ClusteringCentroids},
    ClusteringCompactionTask, CollectionSchema, CompressionType, Config, DataType, FieldSchema,
    FieldValue, MemoryObjectStore, ObjectStore, PartitionStatsSnapshot, PrimaryKey, Row,
    ScalarValue, SequenceIdAllocator, StatsBounds,
};
use common::{base_plan, decode_output_rows, seed_segment};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use test_log::test;

fn vector_schema() -> CollectionSchema {
    CollectionSchema::new(vec![
        FieldSchema::new(100, "id", DataType::Int64).primary_key(),
        FieldSchema::new_vector(101, "emb", 2).clustering_key(),
    ])
}

fn vector_row(id: i64, centroid: usize) -> Row {
    let mut fields = FxHashMap::default();
    fields.insert(100, FieldValue::Scalar(ScalarValue::Int64(id)));
    fields.insert(
        101,
        FieldValue::FloatVector(vec![centroid as f32, id as f32]),
    );

    Row {
        row_id: id,
        timestamp: 1_000 + id as u64,
        pk: PrimaryKey::Int64(id),
        fields,
    }
}

// An analyze root without a parent directory publishes the snapshot
// at the top level instead of borrowing the scalar-mode stats prefix.
#[test]
fn vector_mode_single_segment_analyze_root() -> clustering_compaction::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let schema = vector_schema();

    let centroids = ClusteringCentroids {
        dim: 2,
        centroids: vec![vec![0.0, 0.0], vec![1.0, 1.0]],
    };

    store.upload(
        "analyze/1/2/101/centroids",
        write_blob(&centroids, CompressionType::None)?,
    )?;

    let rows = (0..10).map(|i| vector_row(i, (i % 2) as usize)).collect::<Vec<_>>();

    let mapping = CentroidIdMapping {
        assignments: (0..10).map(|i| i % 2).collect(),
    };

    store.upload(
        "analyze/1/2/101/1/offset_mapping",
        write_blob(&mapping, CompressionType::None)?,
    )?;

    let segment = seed_segment(&store, &schema, 1, &rows, &[], 5);

    let mut plan = base_plan(schema, vec![segment]);
    plan.analyze_root = Some("analyze".into());
    plan.analyzed_segments = [1].into_iter().collect();

    let task = ClusteringCompactionTask::new(
        plan,
        Config::default(),
        store.clone(),
        Arc::new(SequenceIdAllocator::new(10_000)),
    );

    let result = task.run()?;
    assert_eq!(2, result.segments.len());

    let blob = store
        .get("/partition_stats/1/2/ch-0/99")
        .expect("snapshot should be published under the root's parent");

    let snapshot: PartitionStatsSnapshot = read_blob(&blob)?;
    assert_eq!(99, snapshot.version);
    assert_eq!(2, snapshot.segment_stats.len());

    Ok(())
}

// Two input segments whose rows are assigned round-robin to four
// centroids end up in four output buckets of equal size, each
// carrying its centroid as field stats.
#[test]
fn vector_mode_follows_centroid_assignment() -> clustering_compaction::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let schema = vector_schema();

    let centroids = ClusteringCentroids {
        dim: 2,
        centroids: (0..4).map(|i| vec![i as f32, i as f32]).collect(),
    };

    store.upload(
        "analyze/1/1/2/101/centroids",
        write_blob(&centroids, CompressionType::None)?,
    )?;

    let mut segments = vec![];
    let mut next_id = 0i64;

    for segment_id in 1..=2u64 {
        let rows = (0..500)
            .map(|i| {
                next_id += 1;
                vector_row(next_id, i % 4)
            })
            .collect::<Vec<_>>();

        let mapping = CentroidIdMapping {
            assignments: (0..500).map(|i| i % 4).collect(),
        };

        store.upload(
            &format!("analyze/1/1/2/101/{segment_id}/offset_mapping"),
            write_blob(&mapping, CompressionType::None)?,
        )?;

        segments.push(seed_segment(&store, &schema, segment_id, &rows, &[], 100));
    }

    let mut plan = base_plan(schema.clone(), segments);
    plan.analyze_root = Some("analyze/1".into());
    plan.analyzed_segments = [1, 2].into_iter().collect();

    let task = ClusteringCompactionTask::new(
        plan,
        Config::default(),
        store.clone(),
        Arc::new(SequenceIdAllocator::new(10_000)),
    );

    let result = task.run()?;

    assert_eq!(4, result.segments.len());
    assert!(result.segments.iter().all(|s| s.row_count == 250));

    // Vector plans publish next to the analyze root
    let blob = store
        .get("analyze/partition_stats/1/2/ch-0/99")
        .expect("snapshot should be published");
    let snapshot: PartitionStatsSnapshot = read_blob(&blob)?;
    assert_eq!(99, snapshot.version);
    assert_eq!(4, snapshot.segment_stats.len());

    for segment in &result.segments {
        let stats = &snapshot.segment_stats[&segment.segment_id];
        assert_eq!(250, stats.row_count);

        // Exactly one centroid vector per bucket...
        assert_eq!(1, stats.field_stats.len());
        let StatsBounds::Centroid(centroid) = &stats.field_stats[0].bounds else {
            panic!("expected centroid stats");
        };

        // ...and every row of the segment belongs to it
        for row in decode_output_rows(&store, &schema, segment) {
            let Some(FieldValue::FloatVector(embedding)) = row.fields.get(&101) else {
                panic!("expected a vector value");
            };

            assert_eq!(centroid[0], embedding[0]);
        }
    }

    Ok(())
}
