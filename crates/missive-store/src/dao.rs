//! Generic record store.
//!
//! One [`RecordStore`] per model hierarchy: fetches construct (or reuse)
//! cached instances, writes run inside serialized writer transactions, and
//! every committed mutation is announced through the store's notification
//! hub strictly after commit, in commit order.
//!
//! Identity guarantee: while a record is cached, every fetch of its id hands
//! back the same `Arc` instance. Deletes and explicit invalidation evict;
//! LRU pressure can too (the cache is bounded).

use std::sync::Arc;

use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use tracing::instrument;

use missive_core::{ColumnValues, FieldValue, Predicate, RecordId, SortKey};

use crate::cache::RecordCache;
use crate::catalog::TableInfo;
use crate::compile;
use crate::config::StoreConfig;
use crate::data::BlobStore;
use crate::errors::{Result, StoreError};
use crate::notify::{Change, ChangeObserver, NotificationHub, SubscriptionId};
use crate::pool::ConnectionPool;
use crate::record::{DeleteContext, Model, id_of_values, row_values, to_sql};

/// One ordered result entry: logical id plus its sort-key values (sort
/// fields first, identifier last). The live query controller keeps its
/// snapshot in exactly this shape.
#[derive(Clone, Debug)]
pub(crate) struct OrderedRow {
    pub(crate) id: RecordId,
    pub(crate) key: Vec<FieldValue>,
}

/// Per-hierarchy façade: fetch, insert, update, upsert, delete, plus the
/// identity cache and change notifications.
pub struct RecordStore<M: Model> {
    pool: Arc<ConnectionPool>,
    blobs: BlobStore,
    tables: Vec<Arc<TableInfo>>,
    cache: RecordCache<M>,
    hub: NotificationHub<M>,
}

impl<M: Model> RecordStore<M> {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        blobs: BlobStore,
        tables: Vec<Arc<TableInfo>>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            pool,
            blobs,
            tables,
            cache: RecordCache::new(config.identity_cache_capacity),
            hub: NotificationHub::new(),
        }
    }

    pub(crate) fn table_named(&self, name: &str) -> Option<&Arc<TableInfo>> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn table_for(&self, record: &M) -> Result<Arc<TableInfo>> {
        let name = record.table_name();
        self.table_named(name).cloned().ok_or_else(|| {
            StoreError::Codec(format!("record table {name} is not part of this hierarchy"))
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Fetch one record by logical id.
    ///
    /// Cache hits never touch the database; misses fetch, decode, and cache
    /// the instance so later fetches return the same object.
    pub fn fetch_by_id(&self, id: &RecordId) -> Result<Option<Arc<M>>> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(Some(hit));
        }
        let found = self.pool.with_reader(|conn| {
            for table in &self.tables {
                let mut stmt = conn.prepare_cached(&table.fetch_sql)?;
                let mut rows = stmt.query([to_sql(&table.bind_id(id))])?;
                if let Some(row) = rows.next()? {
                    return Ok(Some((table.clone(), row_values(table, row)?)));
                }
            }
            Ok(None)
        })?;
        let Some((table, values)) = found else {
            return Ok(None);
        };
        let record = Arc::new(M::decode(&table.name, &values)?);
        Ok(Some(self.cache.get_or_insert(id.clone(), record)))
    }

    /// Fetch every record matching `predicate`, ordered and paginated.
    ///
    /// Always round-trips to storage; cached instances are reused per row
    /// during materialization.
    pub fn fetch_all(
        &self,
        predicate: &Predicate,
        sort: &[SortKey],
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<Arc<M>>> {
        if let [table] = self.tables.as_slice() {
            let query = compile::compile_rows(table, predicate, sort, offset, limit)?;
            let rows: Vec<(RecordId, ColumnValues)> = self.pool.with_reader(|conn| {
                let mut stmt = conn.prepare(&query.sql)?;
                let mut rows = stmt.query(params_from_iter(query.params.iter().map(to_sql)))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let values = row_values(table, row)?;
                    let id = id_of_values(table, &values)?;
                    out.push((id, values));
                }
                Ok(out)
            })?;
            return rows
                .into_iter()
                .map(|(id, values)| {
                    if let Some(hit) = self.cache.get(&id) {
                        return Ok(hit);
                    }
                    let record = Arc::new(M::decode(&table.name, &values)?);
                    Ok(self.cache.get_or_insert(id, record))
                })
                .collect();
        }

        // Derived tables: ordered id union, then per-row materialization.
        let entries = self.fetch_entries(predicate, sort, offset, limit)?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            // A row deleted between the two reads simply drops out.
            if let Some(record) = self.fetch_by_id(&entry.id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// First record matching `predicate` under `sort`, if any.
    pub fn fetch_one(&self, predicate: &Predicate, sort: &[SortKey]) -> Result<Option<Arc<M>>> {
        Ok(self.fetch_all(predicate, sort, None, Some(1))?.pop())
    }

    /// Ordered (id, sort-key) entries for `predicate` across the hierarchy.
    pub(crate) fn fetch_entries(
        &self,
        predicate: &Predicate,
        sort: &[SortKey],
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<OrderedRow>> {
        let query = compile::compile_entries(&self.tables, predicate, sort, offset, limit)?;
        self.pool.with_reader(|conn| {
            let mut stmt = conn.prepare(&query.sql)?;
            let mut rows = stmt.query(params_from_iter(query.params.iter().map(to_sql)))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let id_value = crate::record::from_sql(row.get::<_, SqlValue>(0)?);
                let mut key = Vec::with_capacity(sort.len() + 1);
                for i in 0..sort.len() {
                    key.push(crate::record::from_sql(row.get::<_, SqlValue>(1 + i)?));
                }
                key.push(id_value.clone());
                let ordinal: i64 = row.get(1 + sort.len())?;
                let table = usize::try_from(ordinal)
                    .ok()
                    .and_then(|i| self.tables.get(i))
                    .ok_or_else(|| {
                        StoreError::Codec(format!("query returned unknown table ordinal {ordinal}"))
                    })?;
                out.push(OrderedRow {
                    id: table.id_from_value(&id_value)?,
                    key,
                });
            }
            Ok(out)
        })
    }

    /// Number of records matching `predicate`.
    pub fn count(&self, predicate: &Predicate) -> Result<u64> {
        let queries = compile::compile_counts(&self.tables, predicate)?;
        self.pool.with_reader(|conn| {
            let mut total: u64 = 0;
            for query in &queries {
                let n: i64 = conn.query_row(
                    &query.sql,
                    params_from_iter(query.params.iter().map(to_sql)),
                    |row| row.get(0),
                )?;
                total += u64::try_from(n).unwrap_or(0);
            }
            Ok(total)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a new record.
    ///
    /// Fails with [`StoreError::DuplicateKey`] when the identifier already
    /// exists. On success the instance is cached and an `Inserted`
    /// notification delivers after commit.
    #[instrument(skip_all, fields(table = record.table_name()))]
    pub fn insert(&self, record: M) -> Result<Arc<M>> {
        let table = self.table_for(&record)?;
        let arc = self.pool.with_writer(|conn| {
            let mut record = record;
            record.before_insert()?;
            let values = record.encode()?;
            let tx = conn.transaction()?;
            let params: Vec<SqlValue> = table
                .insert_columns
                .iter()
                .map(|c| to_sql(values.get(c).unwrap_or(&FieldValue::Null)))
                .collect();
            {
                let mut stmt = tx.prepare_cached(&table.insert_sql)?;
                let _ = stmt
                    .execute(params_from_iter(params))
                    .map_err(|e| map_duplicate(e, record.id()))?;
            }
            record.set_row_key(tx.last_insert_rowid());
            tx.commit()?;
            let arc = Arc::new(record);
            self.hub.publish(vec![Change::Inserted(arc.clone())]);
            Ok(arc)
        })?;
        self.cache.insert(arc.id().clone(), arc.clone());
        self.hub.pump();
        Ok(arc)
    }

    /// Update an existing record.
    ///
    /// Fails with [`StoreError::NotFound`] when no row was affected — a
    /// silent no-op would hide a lost write.
    #[instrument(skip_all, fields(table = record.table_name()))]
    pub fn update(&self, record: M) -> Result<Arc<M>> {
        let table = self.table_for(&record)?;
        if table.update_columns.is_empty() {
            return Err(StoreError::Codec(format!(
                "table {} has no updatable columns",
                table.name
            )));
        }
        let arc = self.pool.with_writer(|conn| {
            let mut record = record;
            record.before_update()?;
            record.invalidate_derived();
            let values = record.encode()?;
            let id = record.id().clone();
            let tx = conn.transaction()?;
            let mut params: Vec<SqlValue> = table
                .update_columns
                .iter()
                .map(|c| to_sql(values.get(c).unwrap_or(&FieldValue::Null)))
                .collect();
            params.push(to_sql(&table.bind_id(&id)));
            let n = {
                let mut stmt = tx.prepare_cached(&table.update_sql)?;
                stmt.execute(params_from_iter(params))?
            };
            if n == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            tx.commit()?;
            let arc = Arc::new(record);
            self.hub.publish(vec![Change::Updated(arc.clone())]);
            Ok(arc)
        })?;
        self.cache.insert(arc.id().clone(), arc.clone());
        self.hub.pump();
        Ok(arc)
    }

    /// Insert-or-replace in one transaction.
    ///
    /// Notification policy: exactly one event per call — `Updated` when the
    /// row pre-existed (column values are not compared), `Inserted` when the
    /// call created it.
    #[instrument(skip_all, fields(table = record.table_name()))]
    pub fn upsert(&self, record: M) -> Result<Arc<M>> {
        let table = self.table_for(&record)?;
        let arc = self.pool.with_writer(|conn| {
            let mut record = record;
            let tx = conn.transaction()?;
            let existed: bool = tx.query_row(
                &format!(
                    "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
                    crate::catalog::quote_ident(&table.name),
                    crate::catalog::quote_ident(&table.id_column),
                ),
                [to_sql(&table.bind_id(record.id()))],
                |row| row.get(0),
            )?;
            if existed {
                record.before_update()?;
                record.invalidate_derived();
            } else {
                record.before_insert()?;
            }
            let values = record.encode()?;

            if let Some(upsert_sql) = &table.upsert_sql {
                let params: Vec<SqlValue> = table
                    .insert_columns
                    .iter()
                    .map(|c| to_sql(values.get(c).unwrap_or(&FieldValue::Null)))
                    .collect();
                let mut stmt = tx.prepare_cached(upsert_sql)?;
                let _ = stmt.execute(params_from_iter(params))?;
            } else if existed {
                // Generated identifier: plain update by key.
                let mut params: Vec<SqlValue> = table
                    .update_columns
                    .iter()
                    .map(|c| to_sql(values.get(c).unwrap_or(&FieldValue::Null)))
                    .collect();
                params.push(to_sql(&table.bind_id(record.id())));
                let mut stmt = tx.prepare_cached(&table.update_sql)?;
                let _ = stmt.execute(params_from_iter(params))?;
            } else {
                let params: Vec<SqlValue> = table
                    .insert_columns
                    .iter()
                    .map(|c| to_sql(values.get(c).unwrap_or(&FieldValue::Null)))
                    .collect();
                let mut stmt = tx.prepare_cached(&table.insert_sql)?;
                let _ = stmt.execute(params_from_iter(params))?;
                record.set_row_key(tx.last_insert_rowid());
            }
            tx.commit()?;
            let arc = Arc::new(record);
            let change = if existed {
                Change::Updated(arc.clone())
            } else {
                Change::Inserted(arc.clone())
            };
            self.hub.publish(vec![change]);
            Ok(arc)
        })?;
        self.cache.insert(arc.id().clone(), arc.clone());
        self.hub.pump();
        Ok(arc)
    }

    /// Delete a record.
    ///
    /// The [`Model::after_delete`] hook runs inside the same transaction and
    /// may release blobs the row owned; their handles invalidate once the
    /// commit lands. Fails with [`StoreError::NotFound`] when no row matched.
    #[instrument(skip_all, fields(table = record.table_name()))]
    pub fn delete(&self, record: &M) -> Result<()> {
        let table = self.table_for(record)?;
        let id = record.id().clone();
        let arc = Arc::new(record.clone());
        let released = self.pool.with_writer(|conn| {
            let tx = conn.transaction()?;
            let n = {
                let mut stmt = tx.prepare_cached(&table.delete_sql)?;
                stmt.execute([to_sql(&table.bind_id(&id))])?
            };
            if n == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            let conn_ref: &rusqlite::Connection = &tx;
            let mut cx = DeleteContext {
                conn: conn_ref,
                blobs: &self.blobs,
                released: Vec::new(),
            };
            record.after_delete(&mut cx)?;
            let released = cx.released;
            tx.commit()?;
            self.hub.publish(vec![Change::Deleted(arc.clone())]);
            Ok(released)
        })?;
        for (blob_table, blob_id) in released {
            self.blobs.invalidate(&blob_table, blob_id);
        }
        self.cache.remove(&id);
        self.hub.pump();
        Ok(())
    }

    /// Delete every record matching `predicate`; returns how many went.
    ///
    /// Matching rows are decoded first (for hooks and notifications), then
    /// removed in one transaction. Zero matches is a successful no-op.
    #[instrument(skip_all)]
    pub fn delete_all(&self, predicate: &Predicate) -> Result<u64> {
        let (doomed, released) = self.pool.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut doomed: Vec<Arc<M>> = Vec::new();
            for table in &self.tables {
                let query = compile::compile_rows(table, predicate, &[], None, None)?;
                {
                    let mut stmt = tx.prepare(&query.sql)?;
                    let mut rows =
                        stmt.query(params_from_iter(query.params.iter().map(to_sql)))?;
                    while let Some(row) = rows.next()? {
                        let values = row_values(table, row)?;
                        doomed.push(Arc::new(M::decode(&table.name, &values)?));
                    }
                }
                let delete = compile::compile_delete(table, predicate)?;
                let _ = tx.execute(
                    &delete.sql,
                    params_from_iter(delete.params.iter().map(to_sql)),
                )?;
            }
            let conn_ref: &rusqlite::Connection = &tx;
            let mut released = Vec::new();
            for record in &doomed {
                let mut cx = DeleteContext {
                    conn: conn_ref,
                    blobs: &self.blobs,
                    released: Vec::new(),
                };
                record.after_delete(&mut cx)?;
                released.extend(cx.released);
            }
            tx.commit()?;
            self.hub
                .publish(doomed.iter().map(|r| Change::Deleted(r.clone())).collect());
            Ok((doomed, released))
        })?;
        for (blob_table, blob_id) in released {
            self.blobs.invalidate(&blob_table, blob_id);
        }
        for record in &doomed {
            self.cache.remove(record.id());
        }
        self.hub.pump();
        Ok(doomed.len() as u64)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cache & notifications
    // ─────────────────────────────────────────────────────────────────────

    /// Drop every cached instance without touching storage. Later fetches
    /// reconstruct fresh objects.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Register a change observer; returns the handle to remove it again.
    pub fn subscribe(&self, observer: Arc<dyn ChangeObserver<M>>) -> SubscriptionId {
        self.hub.subscribe(observer)
    }

    /// Remove a previously registered observer.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.hub.unsubscribe(id);
    }

}

fn map_duplicate(e: rusqlite::Error, id: &RecordId) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.extended_code,
                rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            ) =>
        {
            StoreError::DuplicateKey(id.to_string())
        }
        _ => StoreError::Sqlite(e),
    }
}
