//! Database-blob payload backend.
//!
//! Blob payloads live in dedicated tables of the shape
//! `(id INTEGER PRIMARY KEY, data BLOB NOT NULL)`. A [`BlobDataRef`] is a
//! capability bound to one such row: it carries a validity token that flips
//! atomically once the owning row's delete commits, and every access checks
//! it — a reference to a deleted row fails with
//! [`StoreError::ReferenceInvalidated`] instead of reading stale bytes.
//!
//! Reads and writes go through SQLite's incremental blob I/O at arbitrary
//! offsets, so large payloads never need to be resident in memory at once.

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rusqlite::{Connection, DatabaseName};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::quote_ident;
use crate::errors::{Result, StoreError};
use crate::pool::ConnectionPool;

use super::{DataFilter, DataRef, copy_streams};

/// Manages blob tables and the validity tokens of handles into them.
#[derive(Clone)]
pub struct BlobStore {
    inner: Arc<BlobStoreInner>,
}

struct BlobStoreInner {
    pool: Arc<ConnectionPool>,
    tokens: Mutex<HashMap<(String, i64), Arc<AtomicBool>>>,
}

impl BlobStore {
    /// New blob store over `pool`.
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            inner: Arc::new(BlobStoreInner {
                pool,
                tokens: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create `table` as a blob table if it does not exist yet.
    pub fn ensure_table(&self, table: &str) -> Result<()> {
        self.inner.pool.with_writer(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, data BLOB NOT NULL)",
                quote_ident(table)
            ))?;
            Ok(())
        })
    }

    fn token(&self, table: &str, id: i64) -> Arc<AtomicBool> {
        self.inner
            .tokens
            .lock()
            .entry((table.to_owned(), id))
            .or_insert_with(|| Arc::new(AtomicBool::new(true)))
            .clone()
    }

    /// Flip the validity token for a blob row. Called after the deleting
    /// transaction commits.
    pub(crate) fn invalidate(&self, table: &str, id: i64) {
        let token = self
            .inner
            .tokens
            .lock()
            .remove(&(table.to_owned(), id));
        if let Some(token) = token {
            token.store(false, Ordering::Release);
        }
        debug!(table, id, "blob reference invalidated");
    }

    /// Delete a blob row on an existing (transaction) connection, without
    /// touching the validity token — the caller flips it after commit.
    pub(crate) fn delete_row(&self, conn: &Connection, table: &str, id: i64) -> Result<()> {
        let n = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", quote_ident(table)),
            [id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("blob {table}/{id}")));
        }
        Ok(())
    }

    /// Create a blob row of exactly `len` bytes, streaming its content from
    /// `reader`.
    pub fn create_from_reader(
        &self,
        table: &str,
        reader: &mut dyn Read,
        len: u64,
    ) -> Result<BlobDataRef> {
        let id = self.inner.pool.with_writer(|conn| {
            let tx = conn.transaction()?;
            let _ = tx.execute(
                &format!(
                    "INSERT INTO {} (data) VALUES (zeroblob(?1))",
                    quote_ident(table)
                ),
                [i64::try_from(len).map_err(|_| StoreError::Codec("blob too large".into()))?],
            )?;
            let id = tx.last_insert_rowid();
            {
                let mut blob =
                    tx.blob_open(DatabaseName::Main, table, "data", id, false)?;
                let _ = std::io::copy(reader, &mut blob)?;
            }
            tx.commit()?;
            Ok(id)
        })?;
        Ok(BlobDataRef {
            table: table.to_owned(),
            id,
            runtime: Some(Runtime {
                store: self.clone(),
                token: self.token(table, id),
            }),
        })
    }

    /// Stored length of a blob row.
    pub fn blob_len(&self, table: &str, id: i64) -> Result<u64> {
        let len: Option<i64> = self.inner.pool.with_reader(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT length(data) FROM {} WHERE id = ?1", quote_ident(table)),
                    [id],
                    |row| row.get(0),
                )
                .ok())
        })?;
        len.and_then(|l| u64::try_from(l).ok())
            .ok_or(StoreError::ReferenceInvalidated)
    }

    /// Read up to `buf.len()` bytes at `offset`; returns bytes read.
    pub fn read_at(&self, table: &str, id: i64, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.pool.with_reader(|conn| {
            let mut blob = conn
                .blob_open(DatabaseName::Main, table, "data", id, true)
                .map_err(|_| StoreError::ReferenceInvalidated)?;
            let _ = blob.seek(SeekFrom::Start(offset))?;
            Ok(blob.read(buf)?)
        })
    }

    /// Write `data` at `offset`. The write must stay inside the blob's
    /// fixed length (incremental blob I/O cannot grow a value).
    pub fn write_at(&self, table: &str, id: i64, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.pool.with_writer(|conn| {
            let mut blob = conn
                .blob_open(DatabaseName::Main, table, "data", id, false)
                .map_err(|_| StoreError::ReferenceInvalidated)?;
            let _ = blob.seek(SeekFrom::Start(offset))?;
            blob.write_all(data)?;
            Ok(())
        })
    }

    /// Delete a blob row and invalidate every handle to it.
    pub fn delete(&self, table: &str, id: i64) -> Result<()> {
        self.inner
            .pool
            .with_writer(|conn| self.delete_row(conn, table, id))?;
        self.invalidate(table, id);
        Ok(())
    }
}

#[derive(Clone)]
struct Runtime {
    store: BlobStore,
    token: Arc<AtomicBool>,
}

/// Capability handle to one blob row.
#[derive(Clone, Serialize, Deserialize)]
pub struct BlobDataRef {
    table: String,
    #[serde(rename = "blobId")]
    id: i64,
    #[serde(skip)]
    runtime: Option<Runtime>,
}

impl fmt::Debug for BlobDataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobDataRef")
            .field("table", &self.table)
            .field("id", &self.id)
            .field("attached", &self.runtime.is_some())
            .finish()
    }
}

impl BlobDataRef {
    /// Duplicate `source` into a new blob row in `table`, optionally through
    /// `filter`.
    ///
    /// The filtered payload spools through a temporary file so its final
    /// length is known before the blob row is sized.
    pub fn copy_from(
        source: &DataRef,
        store: &BlobStore,
        table: &str,
        filter: Option<&DataFilter>,
    ) -> Result<Self> {
        let mut input = source.open()?;
        let mut spool = tempfile::tempfile()?;
        copy_streams(&mut input, &mut spool, filter)?;
        let len = spool.metadata()?.len();
        let _ = spool.seek(SeekFrom::Start(0))?;
        store.create_from_reader(table, &mut spool, len)
    }

    /// Backing table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Blob row key.
    #[must_use]
    pub fn blob_id(&self) -> i64 {
        self.id
    }

    /// Bind a (deserialized) reference to its store.
    #[must_use]
    pub fn attach(mut self, store: &BlobStore) -> Self {
        self.runtime = Some(Runtime {
            store: store.clone(),
            token: store.token(&self.table, self.id),
        });
        self
    }

    fn runtime(&self) -> Result<&Runtime> {
        let rt = self
            .runtime
            .as_ref()
            .ok_or(StoreError::ReferenceInvalidated)?;
        if !rt.token.load(Ordering::Acquire) {
            return Err(StoreError::ReferenceInvalidated);
        }
        Ok(rt)
    }

    /// Stored payload length.
    pub fn size(&self) -> Result<Option<u64>> {
        let rt = self.runtime()?;
        Ok(Some(rt.store.blob_len(&self.table, self.id)?))
    }

    /// Open a chunked read stream over the blob.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        let rt = self.runtime()?;
        let len = rt.store.blob_len(&self.table, self.id)?;
        Ok(Box::new(BlobReader {
            store: rt.store.clone(),
            table: self.table.clone(),
            id: self.id,
            token: rt.token.clone(),
            pos: 0,
            len,
        }))
    }

    /// Random-offset read.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let rt = self.runtime()?;
        rt.store.read_at(&self.table, self.id, offset, buf)
    }

    /// Random-offset write, inside the blob's fixed length.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let rt = self.runtime()?;
        rt.store.write_at(&self.table, self.id, offset, data)
    }

    /// Delete the blob row and invalidate every handle to it.
    pub fn delete(&self) -> Result<()> {
        let rt = self.runtime()?;
        rt.store.delete(&self.table, self.id)
    }
}

/// Chunked reader over a blob row; each read re-checks validity.
struct BlobReader {
    store: BlobStore,
    table: String,
    id: i64,
    token: Arc<AtomicBool>,
    pos: u64,
    len: u64,
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.token.load(Ordering::Acquire) {
            return Err(std::io::Error::other("data reference invalidated"));
        }
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let remaining = usize::try_from(self.len - self.pos).unwrap_or(usize::MAX);
        let want = buf.len().min(remaining);
        let n = self
            .store
            .read_at(&self.table, self.id, self.pos, &mut buf[..want])
            .map_err(std::io::Error::other)?;
        self.pos += n as u64;
        Ok(n)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
