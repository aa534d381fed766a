// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    schema::DataType,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Hybrid logical timestamp - a monotonically increasing 64-bit counter
///
/// Timestamps are unique per primary key per event; on upsert, the
/// delete event carries the same timestamp as the insert.
pub type Timestamp = u64;

/// Numeric field identifier inside a collection schema
pub type FieldId = i64;

/// Unique 64-bit segment identifier
pub type SegmentId = u64;

/// Unique 64-bit compaction plan identifier
pub type PlanId = u64;

/// Dense output bucket index in `[0, N)`
pub type BucketId = usize;

/// A scalar field value
///
/// Scalar values of the same data type sort in the type's natural order;
/// floats use their IEEE total order so values can also key hash maps.
#[derive(Clone, Debug)]
pub enum ScalarValue {
    /// Boolean value
    Bool(bool),

    /// 8-bit integer value
    Int8(i8),

    /// 16-bit integer value
    Int16(i16),

    /// 32-bit integer value
    Int32(i32),

    /// 64-bit integer value
    Int64(i64),

    /// 32-bit float value
    Float(f32),

    /// 64-bit float value
    Double(f64),

    /// UTF-8 string value
    VarChar(String),
}

impl ScalarValue {
    /// Returns the data type of this value.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::Int8(_) => DataType::Int8,
            Self::Int16(_) => DataType::Int16,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
            Self::VarChar(_) => DataType::VarChar,
        }
    }

    fn type_rank(&self) -> u8 {
        self.data_type().tag()
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl std::hash::Hash for ScalarValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u8(self.type_rank());

        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int8(v) => v.hash(state),
            Self::Int16(v) => v.hash(state),
            Self::Int32(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::VarChar(v) => v.hash(state),
        }
    }
}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int8(a), Self::Int8(b)) => a.cmp(b),
            (Self::Int16(a), Self::Int16(b)) => a.cmp(b),
            (Self::Int32(a), Self::Int32(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::VarChar(a), Self::VarChar(b)) => a.cmp(b),

            // NOTE: A clustering key column only ever holds one data
            // type, but Ord must be total
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl Encode for ScalarValue {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(self.data_type().tag())?;

        match self {
            Self::Bool(v) => writer.write_u8(u8::from(*v))?,
            Self::Int8(v) => writer.write_i8(*v)?,
            Self::Int16(v) => writer.write_i16::<LittleEndian>(*v)?,
            Self::Int32(v) => writer.write_i32::<LittleEndian>(*v)?,
            Self::Int64(v) => writer.write_i64::<LittleEndian>(*v)?,
            Self::Float(v) => writer.write_f32::<LittleEndian>(*v)?,
            Self::Double(v) => writer.write_f64::<LittleEndian>(*v)?,
            Self::VarChar(v) => {
                writer.write_u32_varint(v.len() as u32)?;
                writer.write_all(v.as_bytes())?;
            }
        }

        Ok(())
    }
}

impl Decode for ScalarValue {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;

        Ok(match DataType::from_tag(tag)? {
            DataType::Bool => Self::Bool(reader.read_u8()? != 0),
            DataType::Int8 => Self::Int8(reader.read_i8()?),
            DataType::Int16 => Self::Int16(reader.read_i16::<LittleEndian>()?),
            DataType::Int32 => Self::Int32(reader.read_i32::<LittleEndian>()?),
            DataType::Int64 => Self::Int64(reader.read_i64::<LittleEndian>()?),
            DataType::Float => Self::Float(reader.read_f32::<LittleEndian>()?),
            DataType::Double => Self::Double(reader.read_f64::<LittleEndian>()?),
            DataType::VarChar => {
                let len = reader.read_u32_varint()? as usize;
                let mut buf = vec![0; len];
                reader.read_exact(&mut buf)?;

                let s = String::from_utf8(buf)
                    .map_err(|_| DecodeError::InvalidHeader("non-utf8 varchar"))?;

                Self::VarChar(s)
            }
            DataType::FloatVector => {
                return Err(DecodeError::InvalidTag(("ScalarValue", tag)));
            }
        })
    }
}

/// A row's primary key, identifying its logical identity
/// for upsert and delete semantics
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum PrimaryKey {
    /// 64-bit integer primary key
    Int64(i64),

    /// UTF-8 string primary key
    VarChar(String),
}

impl PrimaryKey {
    /// Returns the data type of this primary key.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Int64(_) => DataType::Int64,
            Self::VarChar(_) => DataType::VarChar,
        }
    }

    pub(crate) fn from_scalar(value: ScalarValue) -> Option<Self> {
        match value {
            ScalarValue::Int64(v) => Some(Self::Int64(v)),
            ScalarValue::VarChar(v) => Some(Self::VarChar(v)),
            _ => None,
        }
    }
}

impl Encode for PrimaryKey {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::Int64(v) => ScalarValue::Int64(*v).encode_into(writer),
            Self::VarChar(v) => ScalarValue::VarChar(v.clone()).encode_into(writer),
        }
    }
}

impl Decode for PrimaryKey {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        match ScalarValue::decode_from(reader)? {
            ScalarValue::Int64(v) => Ok(Self::Int64(v)),
            ScalarValue::VarChar(v) => Ok(Self::VarChar(v)),
            other => Err(DecodeError::InvalidTag((
                "PrimaryKey",
                other.data_type().tag(),
            ))),
        }
    }
}

/// A field value (scalar or vector)
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Scalar value
    Scalar(ScalarValue),

    /// Dense 32-bit float vector
    FloatVector(Vec<f32>),
}

impl FieldValue {
    /// Returns the scalar inside, if this is a scalar value.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(v) => Some(v),
            Self::FloatVector(_) => None,
        }
    }

    /// Approximate heap + inline size in bytes, used for
    /// buffer memory accounting.
    #[must_use]
    pub fn memory_size(&self) -> u64 {
        match self {
            Self::Scalar(ScalarValue::VarChar(s)) => 24 + s.len() as u64,
            Self::Scalar(_) => 16,
            Self::FloatVector(v) => 24 + 4 * v.len() as u64,
        }
    }
}

/// A single row flowing through the compaction
///
/// The field map covers every schema field (the primary key value is
/// duplicated into it, keyed by the primary key field's ID).
#[derive(Clone, Debug)]
pub struct Row {
    /// Row ID assigned at ingestion time
    pub row_id: i64,

    /// Hybrid logical timestamp of the insert event
    pub timestamp: Timestamp,

    /// Primary key value
    pub pk: PrimaryKey,

    /// Field ID -> value mapping covering all schema fields
    pub fields: FxHashMap<FieldId, FieldValue>,
}

impl Row {
    /// Approximate in-memory size of the row in bytes.
    #[must_use]
    pub fn memory_size(&self) -> u64 {
        let pk_size = match &self.pk {
            PrimaryKey::Int64(_) => 8,
            PrimaryKey::VarChar(s) => 24 + s.len() as u64,
        };

        // row_id + timestamp + map entry overhead per field
        16 + pk_size
            + self
                .fields
                .values()
                .map(|v| 16 + v.memory_size())
                .sum::<u64>()
    }
}
