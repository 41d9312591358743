//! Schema catalog: one-time table introspection.
//!
//! A [`TableInfo`] describes one table — ordered columns, identifier column,
//! optional `_type` discriminator, and precomputed SQL for the record store's
//! fixed statements. Descriptors are immutable and shared (`Arc`); the
//! [`SchemaCatalog`] memoizes one per table name for the life of the store.
//!
//! Conventions imposed on the (externally migrated) schema: every table has
//! exactly one PRIMARY KEY column, which is the identifier; a column named
//! `_type` is the discriminator when present; a declared `INTEGER PRIMARY
//! KEY` means the identifier is store-generated (rowid alias).

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::debug;

use missive_core::{FieldValue, RecordId};

use crate::errors::{Result, StoreError};
use crate::pool::ConnectionPool;

/// Name of the discriminator column in polymorphic tables.
pub const TYPE_COLUMN: &str = "_type";

/// Immutable descriptor for one table.
#[derive(Debug)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// All columns, in declaration order.
    pub columns: Vec<String>,
    /// Identifier column (single PRIMARY KEY).
    pub id_column: String,
    /// Discriminator column, when the table is polymorphic.
    pub type_column: Option<String>,
    /// Whether the identifier is store-generated (rowid alias).
    pub generated_id: bool,
    /// Columns bound by INSERT (excludes a generated identifier).
    pub insert_columns: Vec<String>,
    /// Columns in the UPDATE SET-list (excludes the identifier).
    pub update_columns: Vec<String>,
    /// `SELECT … WHERE id = ?1`
    pub fetch_sql: String,
    /// `SELECT …` over the whole table.
    pub fetch_all_sql: String,
    /// `INSERT INTO …`
    pub insert_sql: String,
    /// `INSERT … ON CONFLICT(id) DO UPDATE …`; absent for generated ids.
    pub upsert_sql: Option<String>,
    /// `UPDATE … WHERE id = ?n`
    pub update_sql: String,
    /// `DELETE FROM … WHERE id = ?1`
    pub delete_sql: String,
    /// `DELETE FROM …`
    pub delete_all_sql: String,
}

/// Double-quote an identifier for embedding in SQL text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl TableInfo {
    /// Introspect `table` on `conn`.
    pub fn load(conn: &Connection, table: &str) -> Result<Self> {
        let mut stmt =
            conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")?;
        let mut rows = stmt.query([table])?;

        let mut columns: Vec<String> = Vec::new();
        let mut pk_columns: Vec<(String, String)> = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let decl_type: String = row.get(1)?;
            let pk: i64 = row.get(2)?;
            if pk > 0 {
                pk_columns.push((name.clone(), decl_type));
            }
            columns.push(name);
        }

        if columns.is_empty() {
            return Err(StoreError::Schema(format!("no such table: {table}")));
        }
        let (id_column, id_type) = match pk_columns.as_slice() {
            [] => {
                return Err(StoreError::Schema(format!(
                    "table {table} has no identifier column"
                )));
            }
            [(name, decl_type)] => (name.clone(), decl_type.clone()),
            _ => {
                return Err(StoreError::Schema(format!(
                    "table {table} has a composite primary key"
                )));
            }
        };

        let generated_id = id_type.trim().eq_ignore_ascii_case("INTEGER");
        let type_column = columns
            .iter()
            .find(|c| *c == TYPE_COLUMN && **c != id_column)
            .cloned();

        let insert_columns: Vec<String> = columns
            .iter()
            .filter(|c| !(generated_id && **c == id_column))
            .cloned()
            .collect();
        let update_columns: Vec<String> =
            columns.iter().filter(|c| **c != id_column).cloned().collect();

        let info = Self::compose(
            table,
            columns,
            id_column,
            type_column,
            generated_id,
            insert_columns,
            update_columns,
        );
        debug!(table, id = %info.id_column, generated = info.generated_id, "table described");
        Ok(info)
    }

    #[allow(clippy::too_many_lines)]
    fn compose(
        table: &str,
        columns: Vec<String>,
        id_column: String,
        type_column: Option<String>,
        generated_id: bool,
        insert_columns: Vec<String>,
        update_columns: Vec<String>,
    ) -> Self {
        let qtable = quote_ident(table);
        let qid = quote_ident(&id_column);
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let fetch_all_sql = format!("SELECT {column_list} FROM {qtable}");
        let fetch_sql = format!("{fetch_all_sql} WHERE {qid} = ?1");

        let insert_list = insert_columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=insert_columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!("INSERT INTO {qtable} ({insert_list}) VALUES ({placeholders})");

        let upsert_sql = if generated_id {
            None
        } else if update_columns.is_empty() {
            Some(format!("{insert_sql} ON CONFLICT({qid}) DO NOTHING"))
        } else {
            let mut sql = format!("{insert_sql} ON CONFLICT({qid}) DO UPDATE SET ");
            for (i, column) in update_columns.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                let qc = quote_ident(column);
                let _ = write!(sql, "{qc} = excluded.{qc}");
            }
            Some(sql)
        };

        let mut update_sql = format!("UPDATE {qtable} SET ");
        for (i, column) in update_columns.iter().enumerate() {
            if i > 0 {
                update_sql.push_str(", ");
            }
            let _ = write!(update_sql, "{} = ?{}", quote_ident(column), i + 1);
        }
        let _ = write!(update_sql, " WHERE {qid} = ?{}", update_columns.len() + 1);

        let delete_all_sql = format!("DELETE FROM {qtable}");
        let delete_sql = format!("{delete_all_sql} WHERE {qid} = ?1");

        Self {
            name: table.to_owned(),
            columns,
            id_column,
            type_column,
            generated_id,
            insert_columns,
            update_columns,
            fetch_sql,
            fetch_all_sql,
            insert_sql,
            upsert_sql,
            update_sql,
            delete_sql,
            delete_all_sql,
        }
    }

    /// Whether this table carries `column`.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// The parameter value to bind when addressing a row by logical id.
    ///
    /// Generated identifiers are integers rendered into the id; everything
    /// else binds as text.
    #[must_use]
    pub fn bind_id(&self, id: &RecordId) -> FieldValue {
        if self.generated_id {
            if let Ok(n) = id.as_str().parse::<i64>() {
                return FieldValue::Integer(n);
            }
        }
        FieldValue::Text(id.as_str().to_owned())
    }

    /// The logical id corresponding to a stored identifier value.
    pub fn id_from_value(&self, value: &FieldValue) -> Result<RecordId> {
        match value {
            FieldValue::Integer(n) => Ok(RecordId::from_string(n.to_string())),
            FieldValue::Text(s) => Ok(RecordId::from(s.as_str())),
            other => Err(StoreError::Codec(format!(
                "table {}: identifier column holds {other:?}",
                self.name
            ))),
        }
    }
}

/// Memoizing catalog of [`TableInfo`] descriptors.
pub struct SchemaCatalog {
    pool: Arc<ConnectionPool>,
    tables: Mutex<HashMap<String, Arc<TableInfo>>>,
}

impl SchemaCatalog {
    /// New catalog over `pool`.
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Describe `table`, introspecting at most once per table name.
    pub fn describe(&self, table: &str) -> Result<Arc<TableInfo>> {
        if let Some(info) = self.tables.lock().get(table) {
            return Ok(info.clone());
        }
        let info = Arc::new(self.pool.with_reader(|conn| TableInfo::load(conn, table))?);
        let _ = self
            .tables
            .lock()
            .entry(table.to_owned())
            .or_insert_with(|| info.clone());
        Ok(info)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
