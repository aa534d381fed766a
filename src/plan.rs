// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    schema::CollectionSchema,
    value::{FieldId, PlanId, SegmentId, Timestamp},
};
use rustc_hash::{FxHashMap, FxHashSet};

/// Kind of compaction a plan describes
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompactionType {
    /// Merge small segments into larger ones, preserving order
    Merge,

    /// Reorganize rows by proximity of the clustering key
    Clustering,
}

/// A sealed input segment: per-field binlog paths plus delete logs
///
/// Every field's binlog list has the same length; rows are aligned
/// by binlog index.
#[derive(Clone, Debug)]
pub struct InputSegment {
    /// Segment identifier
    pub segment_id: SegmentId,

    /// Field ID -> ordered binlog blob paths
    pub insert_logs: FxHashMap<FieldId, Vec<String>>,

    /// Delete log blob paths
    pub delete_logs: Vec<String>,
}

/// Reference to one uploaded binlog blob
#[derive(Clone, Debug)]
pub struct BinlogDescriptor {
    /// Object store path of the blob
    pub path: String,

    /// Number of rows serialized into the blob
    pub row_count: u64,

    /// Size of the uploaded blob in bytes
    pub byte_size: u64,
}

/// All binlogs of one field of one output segment
#[derive(Clone, Debug)]
pub struct FieldBinlog {
    /// Field identifier
    pub field_id: FieldId,

    /// Ordered blob references
    pub binlogs: Vec<BinlogDescriptor>,
}

/// One output segment produced by the compaction
#[derive(Clone, Debug)]
pub struct CompactionSegment {
    /// Plan that produced this segment
    pub plan_id: PlanId,

    /// Segment identifier drawn from the ID allocator
    pub segment_id: SegmentId,

    /// Logical channel the segment belongs to
    pub channel: String,

    /// Total number of rows
    pub row_count: u64,

    /// Per-field insert binlogs, one entry per flush of the open writer
    pub insert_logs: Vec<FieldBinlog>,

    /// Single field-stats blob covering the whole segment
    pub stats_log: FieldBinlog,
}

/// Terminal state of a compaction plan
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompactionState {
    /// The plan ran to completion
    Completed,
}

/// The result of a completed clustering compaction
#[derive(Clone, Debug)]
pub struct CompactionResult {
    /// Terminal plan state
    pub state: CompactionState,

    /// The plan's identifier
    pub plan_id: PlanId,

    /// Output segments, in unspecified order
    pub segments: Vec<CompactionSegment>,

    /// The plan's compaction type
    pub compaction_type: CompactionType,

    /// Logical channel of the plan
    pub channel: String,
}

/// An immutable clustering compaction plan
#[derive(Clone, Debug)]
pub struct CompactionPlan {
    /// Plan identifier, also used as the partition stats version
    pub plan_id: PlanId,

    /// Collection the inputs belong to
    pub collection_id: u64,

    /// Partition the inputs belong to
    pub partition_id: u64,

    /// Logical channel name
    pub channel: String,

    /// Task deadline in seconds (0 = no deadline)
    pub timeout_secs: u64,

    /// Collection schema
    pub schema: CollectionSchema,

    /// Time-to-live delta in hybrid timestamp units (0 = disabled)
    pub ttl: Timestamp,

    /// Hard cap on rows per output segment
    pub max_segment_rows: u64,

    /// Preferred rows per output segment
    pub prefer_segment_rows: u64,

    /// Must be [`CompactionType::Clustering`]
    pub compaction_type: CompactionType,

    /// Sealed input segments
    pub segments: Vec<InputSegment>,

    /// Root path of the external centroid analyzer's output
    /// (vector mode only)
    pub analyze_root: Option<String>,

    /// Segment IDs whose row -> centroid mapping files exist
    /// (vector mode only)
    pub analyzed_segments: FxHashSet<SegmentId>,
}

impl CompactionPlan {
    /// Returns `true` if the clustering key is a vector field.
    ///
    /// # Errors
    ///
    /// Fails if the schema carries no clustering key.
    pub fn is_vector_mode(&self) -> crate::Result<bool> {
        Ok(self.schema.clustering_field()?.data_type.is_vector())
    }

    /// Validates the plan before any I/O happens.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::Error::IllegalPlan`] on a malformed plan.
    pub fn validate(&self) -> crate::Result<()> {
        if self.compaction_type != CompactionType::Clustering {
            return Err(crate::Error::IllegalPlan(format!(
                "unexpected compaction type {:?}",
                self.compaction_type,
            )));
        }

        self.schema.validate()?;

        if self.max_segment_rows == 0 {
            return Err(crate::Error::IllegalPlan(
                "maxSegmentRows must be positive".into(),
            ));
        }

        if self.prefer_segment_rows > self.max_segment_rows {
            return Err(crate::Error::IllegalPlan(
                "preferSegmentRows must not exceed maxSegmentRows".into(),
            ));
        }

        if self.is_vector_mode()? {
            if self.analyze_root.is_none() {
                return Err(crate::Error::IllegalPlan(
                    "vector clustering requires an analyze result root".into(),
                ));
            }

            for segment in &self.segments {
                if !self.analyzed_segments.contains(&segment.segment_id) {
                    return Err(crate::Error::IllegalPlan(format!(
                        "segment {} has no centroid mapping",
                        segment.segment_id,
                    )));
                }
            }
        }

        Ok(())
    }

    pub(crate) fn centroids_path(&self, field_id: FieldId) -> String {
        let root = self.analyze_root.as_deref().unwrap_or_default();
        format!(
            "{root}/{}/{}/{field_id}/centroids",
            self.collection_id, self.partition_id,
        )
    }

    pub(crate) fn offset_mapping_path(
        &self,
        field_id: FieldId,
        segment_id: SegmentId,
    ) -> String {
        let root = self.analyze_root.as_deref().unwrap_or_default();
        format!(
            "{root}/{}/{}/{field_id}/{segment_id}/offset_mapping",
            self.collection_id, self.partition_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, FieldSchema};
    use test_log::test;

    fn scalar_plan() -> CompactionPlan {
        CompactionPlan {
            plan_id: 1,
            collection_id: 10,
            partition_id: 20,
            channel: "ch-0".into(),
            timeout_secs: 60,
            schema: CollectionSchema::new(vec![
                FieldSchema::new(100, "id", DataType::Int64).primary_key(),
                FieldSchema::new(101, "age", DataType::Int32).clustering_key(),
            ]),
            ttl: 0,
            max_segment_rows: 1_000,
            prefer_segment_rows: 500,
            compaction_type: CompactionType::Clustering,
            segments: vec![],
            analyze_root: None,
            analyzed_segments: FxHashSet::default(),
        }
    }

    #[test]
    fn plan_valid() -> crate::Result<()> {
        scalar_plan().validate()
    }

    #[test]
    fn plan_rejects_wrong_type() {
        let mut plan = scalar_plan();
        plan.compaction_type = CompactionType::Merge;

        assert!(matches!(
            plan.validate(),
            Err(crate::Error::IllegalPlan(_))
        ));
    }

    #[test]
    fn plan_rejects_inverted_limits() {
        let mut plan = scalar_plan();
        plan.prefer_segment_rows = 2_000;

        assert!(matches!(
            plan.validate(),
            Err(crate::Error::IllegalPlan(_))
        ));
    }

    #[test]
    fn plan_rejects_unanalyzed_vector_segment() {
        let mut plan = scalar_plan();
        plan.schema = CollectionSchema::new(vec![
            FieldSchema::new(100, "id", DataType::Int64).primary_key(),
            FieldSchema::new_vector(101, "emb", 4).clustering_key(),
        ]);
        plan.analyze_root = Some("analyze/1".into());
        plan.segments = vec![InputSegment {
            segment_id: 7,
            insert_logs: FxHashMap::default(),
            delete_logs: vec![],
        }];

        assert!(matches!(
            plan.validate(),
            Err(crate::Error::IllegalPlan(_))
        ));
    }
}
