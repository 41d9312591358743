//! Predicate/query compiler.
//!
//! Translates a [`Predicate`] + sort + pagination request into parameterized
//! SQL over a hierarchy's table set. Parameters are always bound — never
//! interpolated — and the identifier column is appended as the final sort
//! key so every compiled ordering is deterministic.
//!
//! Two shapes come out of here:
//!
//! - **Row queries** ([`compile_rows`]): single-table full-row SELECTs.
//! - **Entry queries** ([`compile_entries`]): a `UNION ALL` of per-table
//!   projections of (id, sort keys, table ordinal), re-sorted and
//!   re-paginated over the union. Hierarchies with derived tables are
//!   always queried this way — row shapes differ per table — and the live
//!   query controller consumes exactly this projection for its snapshot.
//!
//! Per-table handling of fields a given table lacks: comparisons compile to
//! constant false, null checks to constant true, missing sort keys project
//! `NULL`. A field absent from *every* table is a [`StoreError::QueryCompile`].

use std::fmt::Write as _;
use std::sync::Arc;

use missive_core::{CompareOp, FieldValue, Predicate, SortKey};

use crate::catalog::{TableInfo, quote_ident};
use crate::errors::{Result, StoreError};

/// A compiled SQL statement and its bound parameters.
#[derive(Debug)]
pub struct CompiledQuery {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Values to bind, in placeholder order.
    pub params: Vec<FieldValue>,
}

/// Ensure every referenced field exists in at least one hierarchy table.
fn validate_fields(
    tables: &[Arc<TableInfo>],
    predicate: &Predicate,
    sort: &[SortKey],
) -> Result<()> {
    let known = |field: &str| tables.iter().any(|t| t.has_column(field));
    for field in predicate.fields() {
        if !known(&field) {
            return Err(StoreError::QueryCompile { field });
        }
    }
    for key in sort {
        if !known(&key.field) {
            return Err(StoreError::QueryCompile {
                field: key.field.clone(),
            });
        }
    }
    Ok(())
}

/// Render `predicate` as a WHERE expression for one table, appending bound
/// values to `params`.
fn predicate_sql(predicate: &Predicate, table: &TableInfo, params: &mut Vec<FieldValue>) -> String {
    match predicate {
        Predicate::True => "1".to_owned(),
        Predicate::Compare {
            field,
            compare,
            value,
        } => {
            if !table.has_column(field) {
                return "0".to_owned();
            }
            let op = match compare {
                CompareOp::Eq => "=",
                CompareOp::Ne => "!=",
                CompareOp::Lt => "<",
                CompareOp::Le => "<=",
                CompareOp::Gt => ">",
                CompareOp::Ge => ">=",
            };
            params.push(value.clone());
            format!("{} {op} ?", quote_ident(field))
        }
        Predicate::In { field, values } => {
            if !table.has_column(field) || values.is_empty() {
                return "0".to_owned();
            }
            params.extend(values.iter().cloned());
            let placeholders = vec!["?"; values.len()].join(", ");
            format!("{} IN ({placeholders})", quote_ident(field))
        }
        Predicate::Like { field, pattern } => {
            if !table.has_column(field) {
                return "0".to_owned();
            }
            params.push(FieldValue::Text(pattern.clone()));
            format!("{} LIKE ?", quote_ident(field))
        }
        Predicate::IsNull { field } => {
            if table.has_column(field) {
                format!("{} IS NULL", quote_ident(field))
            } else {
                "1".to_owned()
            }
        }
        Predicate::IsNotNull { field } => {
            if table.has_column(field) {
                format!("{} IS NOT NULL", quote_ident(field))
            } else {
                "0".to_owned()
            }
        }
        Predicate::And(children) => {
            if children.is_empty() {
                return "1".to_owned();
            }
            let parts: Vec<String> = children
                .iter()
                .map(|c| predicate_sql(c, table, params))
                .collect();
            format!("({})", parts.join(" AND "))
        }
        Predicate::Or(children) => {
            if children.is_empty() {
                return "0".to_owned();
            }
            let parts: Vec<String> = children
                .iter()
                .map(|c| predicate_sql(c, table, params))
                .collect();
            format!("({})", parts.join(" OR "))
        }
        Predicate::Not(child) => {
            format!("NOT ({})", predicate_sql(child, table, params))
        }
    }
}

fn push_pagination(sql: &mut String, offset: Option<u64>, limit: Option<u64>) {
    if offset.is_some() || limit.is_some() {
        let limit = limit.map_or(-1i64, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = offset.unwrap_or(0);
        let _ = write!(sql, " LIMIT {limit} OFFSET {offset}");
    }
}

/// Compile a single-table full-row query.
pub fn compile_rows(
    table: &Arc<TableInfo>,
    predicate: &Predicate,
    sort: &[SortKey],
    offset: Option<u64>,
    limit: Option<u64>,
) -> Result<CompiledQuery> {
    validate_fields(std::slice::from_ref(table), predicate, sort)?;

    let mut params = Vec::new();
    let mut sql = table.fetch_all_sql.clone();
    let _ = write!(sql, " WHERE {}", predicate_sql(predicate, table, &mut params));

    sql.push_str(" ORDER BY ");
    for key in sort {
        let direction = if key.ascending { "ASC" } else { "DESC" };
        let _ = write!(sql, "{} {direction}, ", quote_ident(&key.field));
    }
    let _ = write!(sql, "{} ASC", quote_ident(&table.id_column));

    push_pagination(&mut sql, offset, limit);
    Ok(CompiledQuery { sql, params })
}

/// Compile a hierarchy-wide entry query: ordered (id, sort keys, table
/// ordinal) tuples across all tables.
///
/// Result columns: `_id`, `_k0`‥`_kN`, `_tbl` (ordinal into `tables`).
pub fn compile_entries(
    tables: &[Arc<TableInfo>],
    predicate: &Predicate,
    sort: &[SortKey],
    offset: Option<u64>,
    limit: Option<u64>,
) -> Result<CompiledQuery> {
    validate_fields(tables, predicate, sort)?;

    let mut params = Vec::new();
    let mut selects = Vec::with_capacity(tables.len());
    for (ordinal, table) in tables.iter().enumerate() {
        let mut select = format!("SELECT {} AS _id", quote_ident(&table.id_column));
        for (i, key) in sort.iter().enumerate() {
            if table.has_column(&key.field) {
                let _ = write!(select, ", {} AS _k{i}", quote_ident(&key.field));
            } else {
                let _ = write!(select, ", NULL AS _k{i}");
            }
        }
        let _ = write!(select, ", {ordinal} AS _tbl FROM {}", quote_ident(&table.name));
        let _ = write!(
            select,
            " WHERE {}",
            predicate_sql(predicate, table, &mut params)
        );
        selects.push(select);
    }

    let mut sql = selects.join(" UNION ALL ");
    sql.push_str(" ORDER BY ");
    for (i, key) in sort.iter().enumerate() {
        let direction = if key.ascending { "ASC" } else { "DESC" };
        let _ = write!(sql, "_k{i} {direction}, ");
    }
    sql.push_str("_id ASC");

    push_pagination(&mut sql, offset, limit);
    Ok(CompiledQuery { sql, params })
}

/// Compile per-table `COUNT(*)` queries for a predicate.
pub fn compile_counts(
    tables: &[Arc<TableInfo>],
    predicate: &Predicate,
) -> Result<Vec<CompiledQuery>> {
    validate_fields(tables, predicate, &[])?;
    Ok(tables
        .iter()
        .map(|table| {
            let mut params = Vec::new();
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                quote_ident(&table.name),
                predicate_sql(predicate, table, &mut params)
            );
            CompiledQuery { sql, params }
        })
        .collect())
}

/// Compile a per-table DELETE for a predicate.
pub fn compile_delete(table: &Arc<TableInfo>, predicate: &Predicate) -> Result<CompiledQuery> {
    validate_fields(std::slice::from_ref(table), predicate, &[])?;
    let mut params = Vec::new();
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(&table.name),
        predicate_sql(predicate, table, &mut params)
    );
    Ok(CompiledQuery { sql, params })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
