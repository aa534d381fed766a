// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::DecodeError;

/// Reserved field ID of the row ID system column
pub const ROW_ID_FIELD_ID: crate::FieldId = 0;

/// Reserved field ID of the timestamp system column
pub const TIMESTAMP_FIELD_ID: crate::FieldId = 1;

/// Lowest field ID usable by user-defined fields
pub const START_OF_USER_FIELD_ID: crate::FieldId = 100;

/// Data type of a schema field
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataType {
    /// Boolean
    Bool,

    /// 8-bit integer
    Int8,

    /// 16-bit integer
    Int16,

    /// 32-bit integer
    Int32,

    /// 64-bit integer
    Int64,

    /// 32-bit float
    Float,

    /// 64-bit float
    Double,

    /// UTF-8 string
    VarChar,

    /// Dense 32-bit float vector (dimension lives on the field schema)
    FloatVector,
}

impl DataType {
    /// Returns the wire tag of this data type.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::Bool => 1,
            Self::Int8 => 2,
            Self::Int16 => 3,
            Self::Int32 => 4,
            Self::Int64 => 5,
            Self::Float => 10,
            Self::Double => 11,
            Self::VarChar => 21,
            Self::FloatVector => 101,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            1 => Ok(Self::Bool),
            2 => Ok(Self::Int8),
            3 => Ok(Self::Int16),
            4 => Ok(Self::Int32),
            5 => Ok(Self::Int64),
            10 => Ok(Self::Float),
            11 => Ok(Self::Double),
            21 => Ok(Self::VarChar),
            101 => Ok(Self::FloatVector),
            tag => Err(DecodeError::InvalidTag(("DataType", tag))),
        }
    }

    /// Returns `true` if this type may back a primary key field.
    #[must_use]
    pub fn is_primary_key_compatible(self) -> bool {
        matches!(self, Self::Int64 | Self::VarChar)
    }

    /// Returns `true` if this is a vector type.
    #[must_use]
    pub fn is_vector(self) -> bool {
        matches!(self, Self::FloatVector)
    }
}

/// A single field of a collection schema
#[derive(Clone, Debug)]
pub struct FieldSchema {
    /// Field identifier, unique inside the collection
    pub field_id: crate::FieldId,

    /// Human-readable field name
    pub name: String,

    /// Data type of the field
    pub data_type: DataType,

    /// Vector dimension (0 for scalar fields)
    pub dim: usize,

    /// Whether this field is the primary key
    pub is_primary_key: bool,

    /// Whether this field is the clustering key
    pub is_clustering_key: bool,
}

impl FieldSchema {
    /// Creates a scalar field schema.
    #[must_use]
    pub fn new(field_id: crate::FieldId, name: &str, data_type: DataType) -> Self {
        Self {
            field_id,
            name: name.into(),
            data_type,
            dim: 0,
            is_primary_key: false,
            is_clustering_key: false,
        }
    }

    /// Creates a float vector field schema.
    #[must_use]
    pub fn new_vector(field_id: crate::FieldId, name: &str, dim: usize) -> Self {
        Self {
            field_id,
            name: name.into(),
            data_type: DataType::FloatVector,
            dim,
            is_primary_key: false,
            is_clustering_key: false,
        }
    }

    /// Marks this field as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    /// Marks this field as the clustering key.
    #[must_use]
    pub fn clustering_key(mut self) -> Self {
        self.is_clustering_key = true;
        self
    }
}

/// The schema of the collection being compacted
#[derive(Clone, Debug)]
pub struct CollectionSchema {
    /// User-defined fields; system columns (row ID, timestamp) are implicit
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// Creates a schema from its fields.
    #[must_use]
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    /// Looks up a field by ID.
    #[must_use]
    pub fn field(&self, field_id: crate::FieldId) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }

    /// Returns the primary key field.
    ///
    /// # Errors
    ///
    /// Fails if the schema does not carry exactly one valid primary key.
    pub fn primary_field(&self) -> crate::Result<&FieldSchema> {
        let mut it = self.fields.iter().filter(|f| f.is_primary_key);

        match (it.next(), it.next()) {
            (Some(field), None) => Ok(field),
            _ => Err(crate::Error::IllegalPlan(
                "schema must have exactly one primary key field".into(),
            )),
        }
    }

    /// Returns the clustering key field.
    ///
    /// # Errors
    ///
    /// Fails if the schema does not carry exactly one clustering key.
    pub fn clustering_field(&self) -> crate::Result<&FieldSchema> {
        let mut it = self.fields.iter().filter(|f| f.is_clustering_key);

        match (it.next(), it.next()) {
            (Some(field), None) => Ok(field),
            _ => Err(crate::Error::IllegalPlan(
                "schema must have exactly one clustering key field".into(),
            )),
        }
    }

    /// Validates the schema for use in a clustering compaction plan.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::Error::IllegalPlan`] on a malformed schema.
    pub fn validate(&self) -> crate::Result<()> {
        if self.fields.is_empty() {
            return Err(crate::Error::IllegalPlan("schema has no fields".into()));
        }

        for field in &self.fields {
            if field.field_id < START_OF_USER_FIELD_ID {
                return Err(crate::Error::IllegalPlan(format!(
                    "field ID {} collides with the reserved system column range",
                    field.field_id,
                )));
            }

            if field.data_type.is_vector() && field.dim == 0 {
                return Err(crate::Error::IllegalPlan(format!(
                    "vector field {} has no dimension",
                    field.field_id,
                )));
            }

            if self
                .fields
                .iter()
                .filter(|f| f.field_id == field.field_id)
                .count()
                > 1
            {
                return Err(crate::Error::IllegalPlan(format!(
                    "duplicate field ID {}",
                    field.field_id,
                )));
            }
        }

        let pk = self.primary_field()?;

        if !pk.data_type.is_primary_key_compatible() {
            return Err(crate::Error::IllegalPlan(format!(
                "primary key field {} must be Int64 or VarChar",
                pk.field_id,
            )));
        }

        self.clustering_field()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn valid_schema() -> CollectionSchema {
        CollectionSchema::new(vec![
            FieldSchema::new(100, "id", DataType::Int64).primary_key(),
            FieldSchema::new(101, "age", DataType::Int32).clustering_key(),
        ])
    }

    #[test]
    fn schema_valid() -> crate::Result<()> {
        valid_schema().validate()
    }

    #[test]
    fn schema_rejects_missing_primary_key() {
        let schema = CollectionSchema::new(vec![FieldSchema::new(
            100,
            "age",
            DataType::Int32,
        )
        .clustering_key()]);

        assert!(matches!(
            schema.validate(),
            Err(crate::Error::IllegalPlan(_))
        ));
    }

    #[test]
    fn schema_rejects_system_field_id() {
        let schema = CollectionSchema::new(vec![
            FieldSchema::new(1, "id", DataType::Int64).primary_key(),
            FieldSchema::new(101, "age", DataType::Int32).clustering_key(),
        ]);

        assert!(matches!(
            schema.validate(),
            Err(crate::Error::IllegalPlan(_))
        ));
    }

    #[test]
    fn schema_rejects_vector_primary_key() {
        let schema = CollectionSchema::new(vec![
            FieldSchema::new_vector(100, "emb", 4).primary_key(),
            FieldSchema::new(101, "age", DataType::Int32).clustering_key(),
        ]);

        assert!(matches!(
            schema.validate(),
            Err(crate::Error::IllegalPlan(_))
        ));
    }

    #[test]
    fn schema_rejects_two_clustering_keys() {
        let schema = CollectionSchema::new(vec![
            FieldSchema::new(100, "id", DataType::Int64).primary_key(),
            FieldSchema::new(101, "a", DataType::Int32).clustering_key(),
            FieldSchema::new(102, "b", DataType::Int32).clustering_key(),
        ]);

        assert!(matches!(
            schema.validate(),
            Err(crate::Error::IllegalPlan(_))
        ));
    }
}
