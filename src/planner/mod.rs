// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub(crate) mod scalar;
pub(crate) mod vector;

use crate::value::{BucketId, FieldId, Row, ScalarValue};
use rustc_hash::FxHashMap;

/// Routes each surviving row to its output bucket
pub(crate) enum Classifier {
    /// Scalar range-bucketing: exact membership of planner-emitted keys
    Scalar {
        field_id: FieldId,
        membership: FxHashMap<ScalarValue, BucketId>,
    },

    /// Vector centroid-bucketing: the external analyzer already
    /// assigned every row offset to a centroid
    Vector { field_id: FieldId },
}

impl Classifier {
    /// Classifies one row.
    ///
    /// `offset` is the row's index within its input segment (across
    /// all of the segment's binlogs); `mapping` is the segment's
    /// offset mapping in vector mode.
    pub(crate) fn classify(
        &self,
        row: &Row,
        offset: usize,
        mapping: Option<&[u32]>,
        bucket_count: usize,
    ) -> crate::Result<BucketId> {
        let bucket = match self {
            Self::Scalar {
                field_id,
                membership,
            } => {
                let key = row
                    .fields
                    .get(field_id)
                    .and_then(|v| v.as_scalar())
                    .ok_or_else(|| {
                        crate::Error::Internal(format!(
                            "row {} has no scalar clustering key",
                            row.row_id,
                        ))
                    })?;

                *membership.get(key).ok_or_else(|| {
                    crate::Error::Internal(format!(
                        "clustering key {key:?} is outside every bucket",
                    ))
                })?
            }

            Self::Vector { .. } => {
                let mapping = mapping.ok_or_else(|| {
                    crate::Error::Internal("vector classification without offset mapping".into())
                })?;

                let centroid = mapping.get(offset).ok_or_else(|| {
                    crate::Error::Internal(format!(
                        "row offset {offset} is outside the centroid mapping",
                    ))
                })?;

                *centroid as usize
            }
        };

        if bucket >= bucket_count {
            return Err(crate::Error::Internal(format!(
                "row offset {offset} maps to bucket {bucket}, only {bucket_count} exist",
            )));
        }

        Ok(bucket)
    }
}
