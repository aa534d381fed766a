// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Blob codec for binlogs, delete logs and analyzer artifacts.
//!
//! Every uploaded blob is framed as:
//!
//! `[magic u32][format version u8][compression u8][payload len varint]`
//! `[payload][xxh3-128 checksum]`
//!
//! The checksum covers the payload as stored (after compression).

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    schema::{CollectionSchema, DataType, ROW_ID_FIELD_ID, TIMESTAMP_FIELD_ID},
    value::{FieldId, FieldValue, PrimaryKey, Row, ScalarValue, Timestamp},
    Checksum, CompressionType,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

const BLOB_MAGIC: u32 = 0x636C_7374; // "clst"
const FORMAT_VERSION: u8 = 1;

/// Frames and uploads-ready-encodes an item into a standalone blob.
///
/// # Errors
///
/// Fails if serialization fails.
pub fn write_blob<T: Encode>(item: &T, compression: CompressionType) -> crate::Result<Vec<u8>> {
    let mut payload = vec![];
    item.encode_into(&mut payload)?;

    let payload = match compression {
        CompressionType::None => payload,

        #[cfg(feature = "lz4")]
        CompressionType::Lz4 => lz4_flex::compress_prepend_size(&payload),
    };

    let mut blob = Vec::with_capacity(payload.len() + 32);
    blob.write_u32::<LittleEndian>(BLOB_MAGIC).map_err(EncodeError::from)?;
    blob.write_u8(FORMAT_VERSION).map_err(EncodeError::from)?;
    compression.encode_into(&mut blob)?;
    blob.write_u64_varint(payload.len() as u64).map_err(EncodeError::from)?;
    blob.extend_from_slice(&payload);

    let checksum = Checksum::of(&payload);
    blob.write_u128::<LittleEndian>(checksum.into_u128())
        .map_err(EncodeError::from)?;

    Ok(blob)
}

/// Parses a framed blob back into an item, verifying its checksum.
///
/// # Errors
///
/// Fails on malformed framing, checksum mismatch or decode errors.
pub fn read_blob<T: Decode>(bytes: &[u8]) -> crate::Result<T> {
    let mut reader = bytes;

    let magic = reader
        .read_u32::<LittleEndian>()
        .map_err(DecodeError::from)?;

    if magic != BLOB_MAGIC {
        return Err(DecodeError::InvalidHeader("blob magic").into());
    }

    let version = reader.read_u8().map_err(DecodeError::from)?;

    if version != FORMAT_VERSION {
        return Err(DecodeError::InvalidHeader("format version").into());
    }

    let compression = CompressionType::decode_from(&mut reader)?;

    let len = reader.read_u64_varint().map_err(DecodeError::from)? as usize;

    if reader.len() < len + 16 {
        return Err(DecodeError::InvalidHeader("truncated payload").into());
    }

    let (payload, mut rest) = reader.split_at(len);

    let expected = Checksum::from_raw(
        rest.read_u128::<LittleEndian>().map_err(DecodeError::from)?,
    );
    Checksum::of(payload).check(expected)?;

    let payload = match compression {
        CompressionType::None => payload.to_vec(),

        #[cfg(feature = "lz4")]
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(payload)
            .map_err(|_| crate::Error::Decompress(compression))?,
    };

    T::decode_from(&mut &payload[..])
        .map_err(Into::into)
}

/// One field's values for a contiguous row range of one segment
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    /// Boolean column
    Bool(Vec<bool>),

    /// 8-bit integer column
    Int8(Vec<i8>),

    /// 16-bit integer column
    Int16(Vec<i16>),

    /// 32-bit integer column
    Int32(Vec<i32>),

    /// 64-bit integer column
    Int64(Vec<i64>),

    /// 32-bit float column
    Float(Vec<f32>),

    /// 64-bit float column
    Double(Vec<f64>),

    /// UTF-8 string column
    VarChar(Vec<String>),

    /// Dense float vector column (flattened row-major)
    FloatVector {
        /// Vector dimension
        dim: usize,

        /// `len * dim` floats
        data: Vec<f32>,
    },
}

impl Column {
    /// Creates an empty column of the given type.
    #[must_use]
    pub fn new(data_type: DataType, dim: usize) -> Self {
        match data_type {
            DataType::Bool => Self::Bool(vec![]),
            DataType::Int8 => Self::Int8(vec![]),
            DataType::Int16 => Self::Int16(vec![]),
            DataType::Int32 => Self::Int32(vec![]),
            DataType::Int64 => Self::Int64(vec![]),
            DataType::Float => Self::Float(vec![]),
            DataType::Double => Self::Double(vec![]),
            DataType::VarChar => Self::VarChar(vec![]),
            DataType::FloatVector => Self::FloatVector { dim, data: vec![] },
        }
    }

    /// Returns the column's data type.
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
            Self::FloatVector { .. } => DataType::FloatVector,
        }
    }

    /// Returns the number of rows in the column.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Int8(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::VarChar(v) => v.len(),
            Self::FloatVector { dim, data } => {
                if *dim == 0 {
                    0
                } else {
                    data.len() / dim
                }
            }
        }
    }

    /// Returns `true` if the column holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one value.
    ///
    /// # Errors
    ///
    /// Fails if the value's type does not match the column's type.
    pub fn push(&mut self, value: &FieldValue) -> crate::Result<()> {
        match (self, value) {
            (Self::Bool(v), FieldValue::Scalar(ScalarValue::Bool(x))) => v.push(*x),
            (Self::Int8(v), FieldValue::Scalar(ScalarValue::Int8(x))) => v.push(*x),
            (Self::Int16(v), FieldValue::Scalar(ScalarValue::Int16(x))) => v.push(*x),
            (Self::Int32(v), FieldValue::Scalar(ScalarValue::Int32(x))) => v.push(*x),
            (Self::Int64(v), FieldValue::Scalar(ScalarValue::Int64(x))) => v.push(*x),
            (Self::Float(v), FieldValue::Scalar(ScalarValue::Float(x))) => v.push(*x),
            (Self::Double(v), FieldValue::Scalar(ScalarValue::Double(x))) => v.push(*x),
            (Self::VarChar(v), FieldValue::Scalar(ScalarValue::VarChar(x))) => {
                v.push(x.clone());
            }
            (Self::FloatVector { dim, data }, FieldValue::FloatVector(x)) => {
                if x.len() != *dim {
                    return Err(crate::Error::Internal(format!(
                        "vector dimension mismatch: expected {dim}, got {}",
                        x.len(),
                    )));
                }
                data.extend_from_slice(x);
            }
            (column, value) => {
                return Err(crate::Error::Internal(format!(
                    "value {value:?} does not fit column of type {:?}",
                    column.data_type(),
                )));
            }
        }

        Ok(())
    }

    /// Returns the value at the given row index.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<FieldValue> {
        match self {
            Self::Bool(v) => v.get(idx).map(|x| FieldValue::Scalar(ScalarValue::Bool(*x))),
            Self::Int8(v) => v.get(idx).map(|x| FieldValue::Scalar(ScalarValue::Int8(*x))),
            Self::Int16(v) => v
                .get(idx)
                .map(|x| FieldValue::Scalar(ScalarValue::Int16(*x))),
            Self::Int32(v) => v
                .get(idx)
                .map(|x| FieldValue::Scalar(ScalarValue::Int32(*x))),
            Self::Int64(v) => v
                .get(idx)
                .map(|x| FieldValue::Scalar(ScalarValue::Int64(*x))),
            Self::Float(v) => v
                .get(idx)
                .map(|x| FieldValue::Scalar(ScalarValue::Float(*x))),
            Self::Double(v) => v
                .get(idx)
                .map(|x| FieldValue::Scalar(ScalarValue::Double(*x))),
            Self::VarChar(v) => v
                .get(idx)
                .map(|x| FieldValue::Scalar(ScalarValue::VarChar(x.clone()))),
            Self::FloatVector { dim, data } => data
                .get(idx * dim..(idx + 1) * dim)
                .map(|x| FieldValue::FloatVector(x.to_vec())),
        }
    }
}

impl Encode for Column {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(self.data_type().tag())?;
        writer.write_u64_varint(self.len() as u64)?;

        match self {
            Self::Bool(v) => {
                for x in v {
                    writer.write_u8(u8::from(*x))?;
                }
            }
            Self::Int8(v) => {
                for x in v {
                    writer.write_i8(*x)?;
                }
            }
            Self::Int16(v) => {
                for x in v {
                    writer.write_i16::<LittleEndian>(*x)?;
                }
            }
            Self::Int32(v) => {
                for x in v {
                    writer.write_i32::<LittleEndian>(*x)?;
                }
            }
            Self::Int64(v) => {
                for x in v {
                    writer.write_i64::<LittleEndian>(*x)?;
                }
            }
            Self::Float(v) => {
                for x in v {
                    writer.write_f32::<LittleEndian>(*x)?;
                }
            }
            Self::Double(v) => {
                for x in v {
                    writer.write_f64::<LittleEndian>(*x)?;
                }
            }
            Self::VarChar(v) => {
                for x in v {
                    writer.write_u32_varint(x.len() as u32)?;
                    writer.write_all(x.as_bytes())?;
                }
            }
            Self::FloatVector { dim, data } => {
                writer.write_u64_varint(*dim as u64)?;

                for x in data {
                    writer.write_f32::<LittleEndian>(*x)?;
                }
            }
        }

        Ok(())
    }
}

impl Decode for Column {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let data_type = DataType::from_tag(reader.read_u8()?)?;
        let len = reader.read_u64_varint()? as usize;

        Ok(match data_type {
            DataType::Bool => {
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(reader.read_u8()? != 0);
                }
                Self::Bool(v)
            }
            DataType::Int8 => {
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(reader.read_i8()?);
                }
                Self::Int8(v)
            }
            DataType::Int16 => {
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(reader.read_i16::<LittleEndian>()?);
                }
                Self::Int16(v)
            }
            DataType::Int32 => {
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(reader.read_i32::<LittleEndian>()?);
                }
                Self::Int32(v)
            }
            DataType::Int64 => {
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(reader.read_i64::<LittleEndian>()?);
                }
                Self::Int64(v)
            }
            DataType::Float => {
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(reader.read_f32::<LittleEndian>()?);
                }
                Self::Float(v)
            }
            DataType::Double => {
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(reader.read_f64::<LittleEndian>()?);
                }
                Self::Double(v)
            }
            DataType::VarChar => {
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    let str_len = reader.read_u32_varint()? as usize;
                    let mut buf = vec![0; str_len];
                    reader.read_exact(&mut buf)?;

                    v.push(
                        String::from_utf8(buf)
                            .map_err(|_| DecodeError::InvalidHeader("non-utf8 varchar"))?,
                    );
                }
                Self::VarChar(v)
            }
            DataType::FloatVector => {
                let dim = reader.read_u64_varint()? as usize;
                let mut data = Vec::with_capacity(len * dim);
                for _ in 0..len * dim {
                    data.push(reader.read_f32::<LittleEndian>()?);
                }
                Self::FloatVector { dim, data }
            }
        })
    }
}

/// A delete log: primary keys with the timestamps of their delete events
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteLog {
    /// `(primary key, delete timestamp)` records
    pub entries: Vec<(PrimaryKey, Timestamp)>,
}

impl Encode for DeleteLog {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64_varint(self.entries.len() as u64)?;

        for (pk, ts) in &self.entries {
            pk.encode_into(writer)?;
            writer.write_u64::<LittleEndian>(*ts)?;
        }

        Ok(())
    }
}

impl Decode for DeleteLog {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let len = reader.read_u64_varint()? as usize;
        let mut entries = Vec::with_capacity(len);

        for _ in 0..len {
            let pk = PrimaryKey::decode_from(reader)?;
            let ts = reader.read_u64::<LittleEndian>()?;
            entries.push((pk, ts));
        }

        Ok(Self { entries })
    }
}

/// Centroid vectors pre-computed by the external analyzer
#[derive(Clone, Debug, PartialEq)]
pub struct ClusteringCentroids {
    /// Vector dimension
    pub dim: usize,

    /// One centroid per output bucket
    pub centroids: Vec<Vec<f32>>,
}

impl Encode for ClusteringCentroids {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64_varint(self.centroids.len() as u64)?;
        writer.write_u64_varint(self.dim as u64)?;

        for centroid in &self.centroids {
            for x in centroid {
                writer.write_f32::<LittleEndian>(*x)?;
            }
        }

        Ok(())
    }
}

impl Decode for ClusteringCentroids {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let len = reader.read_u64_varint()? as usize;
        let dim = reader.read_u64_varint()? as usize;

        let mut centroids = Vec::with_capacity(len);

        for _ in 0..len {
            let mut centroid = Vec::with_capacity(dim);
            for _ in 0..dim {
                centroid.push(reader.read_f32::<LittleEndian>()?);
            }
            centroids.push(centroid);
        }

        Ok(Self { dim, centroids })
    }
}

/// Row index -> centroid index mapping of one input segment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CentroidIdMapping {
    /// One centroid index per row, in row order
    pub assignments: Vec<u32>,
}

impl Encode for CentroidIdMapping {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64_varint(self.assignments.len() as u64)?;

        for x in &self.assignments {
            writer.write_u32::<LittleEndian>(*x)?;
        }

        Ok(())
    }
}

impl Decode for CentroidIdMapping {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let len = reader.read_u64_varint()? as usize;
        let mut assignments = Vec::with_capacity(len);

        for _ in 0..len {
            assignments.push(reader.read_u32::<LittleEndian>()?);
        }

        Ok(Self { assignments })
    }
}

/// Transposes a row batch into per-field columns, system columns included.
///
/// # Errors
///
/// Fails if a row does not cover every schema field.
pub fn rows_to_columns(
    schema: &CollectionSchema,
    rows: &[Row],
) -> crate::Result<Vec<(FieldId, Column)>> {
    let mut columns = Vec::with_capacity(schema.fields.len() + 2);
    columns.push((ROW_ID_FIELD_ID, Column::new(DataType::Int64, 0)));
    columns.push((TIMESTAMP_FIELD_ID, Column::new(DataType::Int64, 0)));

    for field in &schema.fields {
        columns.push((field.field_id, Column::new(field.data_type, field.dim)));
    }

    for row in rows {
        for (field_id, column) in &mut columns {
            match *field_id {
                ROW_ID_FIELD_ID => {
                    column.push(&FieldValue::Scalar(ScalarValue::Int64(row.row_id)))?;
                }
                TIMESTAMP_FIELD_ID => {
                    #[allow(clippy::cast_possible_wrap)]
                    column.push(&FieldValue::Scalar(ScalarValue::Int64(
                        row.timestamp as i64,
                    )))?;
                }
                field_id => {
                    let value = row.fields.get(&field_id).ok_or_else(|| {
                        crate::Error::Internal(format!("row is missing field {field_id}"))
                    })?;

                    column.push(value)?;
                }
            }
        }
    }

    Ok(columns)
}
