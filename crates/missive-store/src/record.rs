//! The record (model) contract.
//!
//! Domain types implement [`Model`] to become persistable. A hierarchy is a
//! closed enum: one Rust type covering every concrete model class, mapped to
//! one or more tables ([`Model::TABLES`], root first). Polymorphic tables
//! carry a `_type` discriminator column; [`Model::decode`] dispatches on it
//! to rebuild the right variant, so there is no open-ended runtime type
//! registry.
//!
//! Encoding is by column name through [`ColumnValues`]; the store binds the
//! table's column order. Lifecycle hooks (`before_insert`, `before_update`,
//! `after_delete`, `invalidate_derived`) are invoked by the record store at
//! the documented points.

use rusqlite::Row;
use rusqlite::types::Value as SqlValue;

use missive_core::{ColumnValues, FieldValue, RecordId};

use crate::catalog::TableInfo;
use crate::data::BlobStore;
use crate::errors::{Result, StoreError};

/// A persistable record hierarchy.
pub trait Model: Clone + Send + Sync + 'static {
    /// Tables backing this hierarchy, root table first.
    const TABLES: &'static [&'static str];

    /// Logical identifier (stable for the record's lifetime).
    fn id(&self) -> &RecordId;

    /// Database row key, once assigned. Used for blob addressing.
    fn row_key(&self) -> Option<i64> {
        None
    }

    /// Called when the store assigns a generated row key on insert.
    fn set_row_key(&mut self, key: i64) {
        let _ = key;
    }

    /// The hierarchy table this concrete value persists to.
    fn table_name(&self) -> &'static str;

    /// Discriminator value, when the backing table is polymorphic.
    fn discriminator(&self) -> Option<i64> {
        None
    }

    /// Encode fields into column values.
    fn encode(&self) -> Result<ColumnValues>;

    /// Reconstruct a record from `table`'s decoded column values.
    ///
    /// Implementations dispatch on the discriminator for polymorphic tables.
    fn decode(table: &str, values: &ColumnValues) -> Result<Self>;

    /// Hook: runs inside the insert transaction, before the row is written.
    fn before_insert(&mut self) -> Result<()> {
        Ok(())
    }

    /// Hook: runs inside the update transaction, before the row is written.
    fn before_update(&mut self) -> Result<()> {
        Ok(())
    }

    /// Hook: runs inside the delete transaction, after the row is removed.
    ///
    /// The context releases payload blobs owned by the deleted row in the
    /// same transaction.
    fn after_delete(&self, cx: &mut DeleteContext<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    /// Hook: stored field state changed — drop lazily computed data.
    fn invalidate_derived(&mut self) {}
}

/// Context handed to [`Model::after_delete`], scoped to the deleting
/// transaction.
pub struct DeleteContext<'a> {
    pub(crate) conn: &'a rusqlite::Connection,
    pub(crate) blobs: &'a BlobStore,
    pub(crate) released: Vec<(String, i64)>,
}

impl DeleteContext<'_> {
    /// Delete a payload blob row inside this transaction.
    ///
    /// The blob's validity token flips once the transaction commits; a
    /// rollback leaves the reference usable.
    pub fn release_blob(&mut self, table: &str, blob_id: i64) -> Result<()> {
        self.blobs.delete_row(self.conn, table, blob_id)?;
        self.released.push((table.to_owned(), blob_id));
        Ok(())
    }
}

/// Convert a [`FieldValue`] into the rusqlite binding value.
#[must_use]
pub fn to_sql(value: &FieldValue) -> SqlValue {
    match value {
        FieldValue::Null => SqlValue::Null,
        FieldValue::Integer(v) => SqlValue::Integer(*v),
        FieldValue::Real(v) => SqlValue::Real(*v),
        FieldValue::Text(v) => SqlValue::Text(v.clone()),
        FieldValue::Blob(v) => SqlValue::Blob(v.clone()),
    }
}

/// Convert a rusqlite value into a [`FieldValue`].
#[must_use]
pub fn from_sql(value: SqlValue) -> FieldValue {
    match value {
        SqlValue::Null => FieldValue::Null,
        SqlValue::Integer(v) => FieldValue::Integer(v),
        SqlValue::Real(v) => FieldValue::Real(v),
        SqlValue::Text(v) => FieldValue::Text(v),
        SqlValue::Blob(v) => FieldValue::Blob(v),
    }
}

/// Decode a full row (shaped by `table`'s column list) into column values.
pub fn row_values(table: &TableInfo, row: &Row<'_>) -> Result<ColumnValues> {
    let mut values = ColumnValues::new();
    for (i, column) in table.columns.iter().enumerate() {
        let value: SqlValue = row.get(i)?;
        let _ = values.insert(column.clone(), from_sql(value));
    }
    Ok(values)
}

/// Read the logical id out of encoded values, per `table`'s identifier.
pub fn id_of_values(table: &TableInfo, values: &ColumnValues) -> Result<RecordId> {
    let value = values.get(&table.id_column).ok_or_else(|| {
        StoreError::Codec(format!(
            "encoded values missing identifier column {}",
            table.id_column
        ))
    })?;
    table.id_from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_value_round_trip() {
        for v in [
            FieldValue::Null,
            FieldValue::Integer(7),
            FieldValue::Real(1.5),
            FieldValue::Text("hi".into()),
            FieldValue::Blob(vec![1, 2, 3]),
        ] {
            assert_eq!(from_sql(to_sql(&v)), v);
        }
    }
}
