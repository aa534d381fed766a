// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Row materialization over decoded per-field columns.

use crate::{
    binlog::Column,
    schema::{CollectionSchema, ROW_ID_FIELD_ID, TIMESTAMP_FIELD_ID},
    value::{FieldId, PrimaryKey, Row, Timestamp},
};
use rustc_hash::FxHashMap;

/// A decoded row range: one binlog per field, rows aligned by index
pub struct RowGroup {
    row_ids: Vec<i64>,
    timestamps: Vec<Timestamp>,
    fields: Vec<(FieldId, Column)>,
    pk_field_id: FieldId,
    len: usize,
}

impl RowGroup {
    /// Assembles a row group from per-field columns, validating that
    /// every schema field (and both system columns) is present and
    /// all columns have the same length.
    ///
    /// # Errors
    ///
    /// Fails if a column is missing, misaligned or mistyped.
    pub fn from_columns(
        schema: &CollectionSchema,
        mut columns: FxHashMap<FieldId, Column>,
    ) -> crate::Result<Self> {
        let pk_field_id = schema.primary_field()?.field_id;

        let row_ids = match columns.remove(&ROW_ID_FIELD_ID) {
            Some(Column::Int64(v)) => v,
            _ => {
                return Err(crate::Error::Decode(
                    crate::coding::DecodeError::InvalidHeader("row ID column"),
                ));
            }
        };

        #[allow(clippy::cast_sign_loss)]
        let timestamps = match columns.remove(&TIMESTAMP_FIELD_ID) {
            Some(Column::Int64(v)) => v.into_iter().map(|ts| ts as Timestamp).collect::<Vec<_>>(),
            _ => {
                return Err(crate::Error::Decode(
                    crate::coding::DecodeError::InvalidHeader("timestamp column"),
                ));
            }
        };

        let len = row_ids.len();

        if timestamps.len() != len {
            return Err(crate::Error::Internal(
                "timestamp column is misaligned".into(),
            ));
        }

        let mut fields = Vec::with_capacity(schema.fields.len());

        for field in &schema.fields {
            let column = columns.remove(&field.field_id).ok_or_else(|| {
                crate::Error::Internal(format!(
                    "binlog for field {} is missing",
                    field.field_id,
                ))
            })?;

            if column.data_type() != field.data_type {
                return Err(crate::Error::Internal(format!(
                    "field {} has type {:?}, expected {:?}",
                    field.field_id,
                    column.data_type(),
                    field.data_type,
                )));
            }

            if column.len() != len {
                return Err(crate::Error::Internal(format!(
                    "field {} column is misaligned",
                    field.field_id,
                )));
            }

            fields.push((field.field_id, column));
        }

        Ok(Self {
            row_ids,
            timestamps,
            fields,
            pk_field_id,
            len,
        })
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the row group holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Materializes the row at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if `offset` is out of bounds or the primary key value
    /// has an unusable type.
    pub fn row(&self, offset: usize) -> crate::Result<Row> {
        let row_id = *self
            .row_ids
            .get(offset)
            .ok_or_else(|| crate::Error::Internal(format!("row offset {offset} out of bounds")))?;

        let timestamp = *self
            .timestamps
            .get(offset)
            .ok_or_else(|| crate::Error::Internal(format!("row offset {offset} out of bounds")))?;

        let mut fields = FxHashMap::default();
        let mut pk = None;

        for (field_id, column) in &self.fields {
            let value = column.get(offset).ok_or_else(|| {
                crate::Error::Internal(format!("row offset {offset} out of bounds"))
            })?;

            if *field_id == self.pk_field_id {
                pk = value
                    .as_scalar()
                    .cloned()
                    .and_then(PrimaryKey::from_scalar);
            }

            fields.insert(*field_id, value);
        }

        let pk = pk.ok_or_else(|| {
            crate::Error::Internal("primary key value has an unusable type".into())
        })?;

        Ok(Row {
            row_id,
            timestamp,
            pk,
            fields,
        })
    }
}
