// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Classifier;
use crate::{
    binlog::{read_blob, CentroidIdMapping, ClusteringCentroids},
    buffer::ClusterBuffer,
    plan::CompactionPlan,
    stats::FieldStats,
    storage::{IdAllocator, ObjectStore},
    value::{FieldId, SegmentId},
};
use std::sync::Arc;

/// Loads the pre-computed centroids and materializes one cluster
/// buffer per centroid, seeded with the centroid vector.
///
/// Per-segment offset mappings are loaded lazily by the mapping
/// workers, one segment at a time.
pub(crate) fn plan(
    store: &dyn ObjectStore,
    allocator: &dyn IdAllocator,
    plan: &CompactionPlan,
) -> crate::Result<(Classifier, Vec<ClusterBuffer>)> {
    let clustering = plan.schema.clustering_field()?.clone();

    let path = plan.centroids_path(clustering.field_id);
    let blobs = store.download(std::slice::from_ref(&path))?;

    let Some(blob) = blobs.first() else {
        return Err(crate::Error::Internal("download dropped a blob".into()));
    };

    let centroids: ClusteringCentroids = read_blob(blob)?;

    if centroids.centroids.is_empty() {
        return Err(crate::Error::IllegalPlan(
            "analyzer produced no centroids".into(),
        ));
    }

    log::info!(
        "Plan {}: loaded {} centroids of dimension {}",
        plan.plan_id,
        centroids.centroids.len(),
        centroids.dim,
    );

    let schema = Arc::new(plan.schema.clone());
    let mut buffers = Vec::with_capacity(centroids.centroids.len());

    for (bucket_id, centroid) in centroids.centroids.into_iter().enumerate() {
        buffers.push(ClusterBuffer::new(
            bucket_id,
            allocator.alloc_one()?,
            schema.clone(),
            clustering.field_id,
            FieldStats::new_centroid(clustering.field_id, centroid),
        ));
    }

    Ok((
        Classifier::Vector {
            field_id: clustering.field_id,
        },
        buffers,
    ))
}

/// Downloads and decodes one segment's row -> centroid mapping.
pub(crate) fn load_offset_mapping(
    store: &dyn ObjectStore,
    plan: &CompactionPlan,
    field_id: FieldId,
    segment_id: SegmentId,
) -> crate::Result<Vec<u32>> {
    let path = plan.offset_mapping_path(field_id, segment_id);
    let blobs = store.download(std::slice::from_ref(&path))?;

    let Some(blob) = blobs.first() else {
        return Err(crate::Error::Internal("download dropped a blob".into()));
    };

    let mapping: CentroidIdMapping = read_blob(blob)?;

    Ok(mapping.assignments)
}
