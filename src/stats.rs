// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    schema::DataType,
    value::{FieldId, PlanId, ScalarValue, SegmentId},
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Value bounds of a clustering key inside one bucket or segment
#[derive(Clone, Debug, PartialEq)]
pub enum StatsBounds {
    /// Scalar min/max range (inclusive); `None` until the first update
    Scalar {
        /// Smallest observed value
        min: Option<ScalarValue>,

        /// Largest observed value
        max: Option<ScalarValue>,
    },

    /// Centroid vector of the bucket (vector mode)
    Centroid(Vec<f32>),
}

/// Statistics of one field, used by the query planner for pruning
#[derive(Clone, Debug, PartialEq)]
pub struct FieldStats {
    /// Field identifier
    pub field_id: FieldId,

    /// Data type of the field
    pub data_type: DataType,

    /// Value bounds
    pub bounds: StatsBounds,
}

impl FieldStats {
    /// Creates empty scalar min/max stats.
    #[must_use]
    pub fn new_scalar(field_id: FieldId, data_type: DataType) -> Self {
        Self {
            field_id,
            data_type,
            bounds: StatsBounds::Scalar {
                min: None,
                max: None,
            },
        }
    }

    /// Creates centroid stats for a vector bucket.
    #[must_use]
    pub fn new_centroid(field_id: FieldId, centroid: Vec<f32>) -> Self {
        Self {
            field_id,
            data_type: DataType::FloatVector,
            bounds: StatsBounds::Centroid(centroid),
        }
    }

    /// Widens the scalar min/max range to include `value`.
    ///
    /// Has no effect on centroid stats.
    pub fn update_min_max(&mut self, value: &ScalarValue) {
        if let StatsBounds::Scalar { min, max } = &mut self.bounds {
            if min.as_ref().is_none_or(|m| value < m) {
                *min = Some(value.clone());
            }
            if max.as_ref().is_none_or(|m| value > m) {
                *max = Some(value.clone());
            }
        }
    }
}

impl Encode for FieldStats {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i64::<LittleEndian>(self.field_id)?;
        writer.write_u8(self.data_type.tag())?;

        match &self.bounds {
            StatsBounds::Scalar { min, max } => {
                writer.write_u8(0)?;

                for bound in [min, max] {
                    match bound {
                        Some(value) => {
                            writer.write_u8(1)?;
                            value.encode_into(writer)?;
                        }
                        None => writer.write_u8(0)?,
                    }
                }
            }
            StatsBounds::Centroid(centroid) => {
                writer.write_u8(1)?;
                writer.write_u64_varint(centroid.len() as u64)?;

                for x in centroid {
                    writer.write_f32::<LittleEndian>(*x)?;
                }
            }
        }

        Ok(())
    }
}

impl Decode for FieldStats {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let field_id = reader.read_i64::<LittleEndian>()?;
        let data_type = DataType::from_tag(reader.read_u8()?)?;

        let bounds = match reader.read_u8()? {
            0 => {
                let mut bounds = [None, None];

                for slot in &mut bounds {
                    if reader.read_u8()? == 1 {
                        *slot = Some(ScalarValue::decode_from(reader)?);
                    }
                }

                let [min, max] = bounds;
                StatsBounds::Scalar { min, max }
            }
            1 => {
                let dim = reader.read_u64_varint()? as usize;
                let mut centroid = Vec::with_capacity(dim);

                for _ in 0..dim {
                    centroid.push(reader.read_f32::<LittleEndian>()?);
                }

                StatsBounds::Centroid(centroid)
            }
            tag => return Err(DecodeError::InvalidTag(("StatsBounds", tag))),
        };

        Ok(Self {
            field_id,
            data_type,
            bounds,
        })
    }
}

/// Statistics of one output segment
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentStats {
    /// Per-field statistics (currently only the clustering key)
    pub field_stats: Vec<FieldStats>,

    /// Total row count of the segment
    pub row_count: u64,
}

impl Encode for SegmentStats {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<LittleEndian>(self.row_count)?;
        writer.write_u64_varint(self.field_stats.len() as u64)?;

        for stats in &self.field_stats {
            stats.encode_into(writer)?;
        }

        Ok(())
    }
}

impl Decode for SegmentStats {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let row_count = reader.read_u64::<LittleEndian>()?;
        let len = reader.read_u64_varint()? as usize;

        let mut field_stats = Vec::with_capacity(len);
        for _ in 0..len {
            field_stats.push(FieldStats::decode_from(reader)?);
        }

        Ok(Self {
            field_stats,
            row_count,
        })
    }
}

/// Partition-wide statistics snapshot published for the query planner
///
/// The version equals the producing plan's ID; the key set equals the
/// set of output segment IDs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionStatsSnapshot {
    /// Snapshot version (= plan ID)
    pub version: PlanId,

    /// Output segment ID -> segment statistics
    pub segment_stats: FxHashMap<SegmentId, SegmentStats>,
}

impl Encode for PartitionStatsSnapshot {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<LittleEndian>(self.version)?;
        writer.write_u64_varint(self.segment_stats.len() as u64)?;

        // NOTE: Sorted for a deterministic byte representation
        let mut ids = self.segment_stats.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();

        for id in ids {
            if let Some(stats) = self.segment_stats.get(&id) {
                writer.write_u64::<LittleEndian>(id)?;
                stats.encode_into(writer)?;
            }
        }

        Ok(())
    }
}

impl Decode for PartitionStatsSnapshot {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let version = reader.read_u64::<LittleEndian>()?;
        let len = reader.read_u64_varint()? as usize;

        let mut segment_stats = FxHashMap::default();
        for _ in 0..len {
            let id = reader.read_u64::<LittleEndian>()?;
            segment_stats.insert(id, SegmentStats::decode_from(reader)?);
        }

        Ok(Self {
            version,
            segment_stats,
        })
    }
}

/// Builds the versioned object store key of a partition stats snapshot.
#[must_use]
pub fn partition_stats_path(
    root: &str,
    collection_id: u64,
    partition_id: u64,
    channel: &str,
    version: PlanId,
) -> String {
    format!("{root}/partition_stats/{collection_id}/{partition_id}/{channel}/{version}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn min_max_widens() {
        let mut stats = FieldStats::new_scalar(101, DataType::Int64);

        stats.update_min_max(&ScalarValue::Int64(5));
        stats.update_min_max(&ScalarValue::Int64(-2));
        stats.update_min_max(&ScalarValue::Int64(3));

        assert_eq!(
            StatsBounds::Scalar {
                min: Some(ScalarValue::Int64(-2)),
                max: Some(ScalarValue::Int64(5)),
            },
            stats.bounds,
        );
    }

    #[test]
    fn min_max_ignores_centroid() {
        let mut stats = FieldStats::new_centroid(101, vec![1.0, 2.0]);
        stats.update_min_max(&ScalarValue::Int64(5));

        assert_eq!(StatsBounds::Centroid(vec![1.0, 2.0]), stats.bounds);
    }

    #[test]
    fn snapshot_roundtrip() -> crate::Result<()> {
        let mut stats = FieldStats::new_scalar(101, DataType::VarChar);
        stats.update_min_max(&ScalarValue::VarChar("a".into()));
        stats.update_min_max(&ScalarValue::VarChar("z".into()));

        let mut snapshot = PartitionStatsSnapshot {
            version: 42,
            ..Default::default()
        };
        snapshot.segment_stats.insert(
            7,
            SegmentStats {
                field_stats: vec![stats],
                row_count: 123,
            },
        );

        let bytes = snapshot.encode_into_vec();
        let decoded = PartitionStatsSnapshot::decode_from(&mut &bytes[..])?;

        assert_eq!(snapshot, decoded);

        Ok(())
    }

    #[test]
    fn stats_path_is_versioned() {
        assert_eq!(
            "stats/partition_stats/1/2/ch-0/99",
            partition_stats_path("stats", 1, 2, "ch-0", 99),
        );
    }
}
