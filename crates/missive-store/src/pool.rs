//! Connection pool: one serialized writer, bounded read-only readers.
//!
//! The pool owns every connection to one database file. Reads run on
//! independent read-only connections drawn from an `r2d2` pool; WAL mode
//! gives each reader a consistent snapshot while a write is in progress.
//! Writes run on a single dedicated connection behind a timed lock, so at
//! most one write transaction is ever in flight.
//!
//! Acquisition waits are cooperative (parked threads with a configured
//! timeout, no spinning). After [`ConnectionPool::close`], every access
//! fails with [`StoreError::PoolClosed`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags, Transaction};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::errors::{Result, StoreError};

/// Outcome of a transactional callback: commit or roll back, carrying the
/// callback's value either way.
pub enum TxOutcome<T> {
    /// Commit the transaction and return the value.
    Commit(T),
    /// Roll the transaction back and return the value.
    Rollback(T),
}

/// Read-only connection customizer: pragmas applied to each new reader.
#[derive(Debug)]
struct ReaderPragmas {
    busy_timeout_ms: u32,
    cache_size_kib: i64,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ReaderPragmas {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};\
             PRAGMA cache_size = -{};\
             PRAGMA query_only = ON;",
            self.busy_timeout_ms, self.cache_size_kib
        ))
    }
}

/// Pool of connections against one database file.
pub struct ConnectionPool {
    path: PathBuf,
    readers: r2d2::Pool<SqliteConnectionManager>,
    writer: Mutex<Option<Connection>>,
    acquire_timeout: Duration,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Open (creating if needed) the database at `path`.
    ///
    /// The writer connection is opened first so the file and its WAL exist
    /// before any read-only reader connects.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("create dir: {e}")))?;
        }

        let writer =
            Connection::open(path).map_err(|e| StoreError::Open(format!("{path:?}: {e}")))?;
        writer
            .execute_batch(&format!(
                "PRAGMA journal_mode = WAL;\
                 PRAGMA busy_timeout = {};\
                 PRAGMA foreign_keys = ON;\
                 PRAGMA cache_size = -{};\
                 PRAGMA synchronous = NORMAL;",
                config.busy_timeout_ms, config.cache_size_kib
            ))
            .map_err(|e| StoreError::Open(format!("pragmas: {e}")))?;

        let manager = SqliteConnectionManager::file(path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        let readers = r2d2::Pool::builder()
            .max_size(config.reader_pool_size)
            .min_idle(Some(0))
            .connection_timeout(config.acquire_timeout())
            .connection_customizer(Box::new(ReaderPragmas {
                busy_timeout_ms: config.busy_timeout_ms,
                cache_size_kib: config.cache_size_kib,
            }))
            .build(manager)?;

        info!(path = %path.display(), readers = config.reader_pool_size, "database opened");

        Ok(Self {
            path: path.to_owned(),
            readers,
            writer: Mutex::new(Some(writer)),
            acquire_timeout: config.acquire_timeout(),
            closed: AtomicBool::new(false),
        })
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        Ok(())
    }

    /// Run `f` on a read-only pooled connection.
    ///
    /// Blocks the calling thread until a reader is free, up to the
    /// acquisition timeout.
    pub fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.check_open()?;
        let conn = self.readers.get().map_err(|_| StoreError::PoolTimeout)?;
        f(&conn)
    }

    /// Run `f` on the single writer connection.
    ///
    /// Writers are fully serialized; acquisition waits up to the timeout.
    pub fn with_writer<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        self.check_open()?;
        let mut guard = self
            .writer
            .try_lock_for(self.acquire_timeout)
            .ok_or(StoreError::PoolTimeout)?;
        let Some(conn) = guard.as_mut() else {
            return Err(StoreError::PoolClosed);
        };
        f(conn)
    }

    /// Run `f` inside a write transaction.
    ///
    /// Commits unless the callback asks for rollback; an error from the
    /// callback rolls back and propagates.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<TxOutcome<T>>,
    ) -> Result<T> {
        self.with_writer(|conn| {
            let mut tx = conn.transaction()?;
            match f(&mut tx)? {
                TxOutcome::Commit(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                TxOutcome::Rollback(value) => {
                    tx.rollback()?;
                    Ok(value)
                }
            }
        })
    }

    /// Shut the pool down.
    ///
    /// Waits for the in-flight writer (if any) to finish, then closes the
    /// writer connection. Checked-out readers drain naturally; no new
    /// acquisition succeeds afterwards.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut guard = self.writer.lock();
        if let Some(conn) = guard.take() {
            drop(conn);
            debug!(path = %self.path.display(), "writer connection closed");
        }
    }
}

/// Run `f` inside a savepoint nested in `tx`.
///
/// This is the only sanctioned way to nest transactions — the writer lock is
/// never acquired recursively.
pub fn nested<T>(
    tx: &mut Transaction<'_>,
    f: impl FnOnce(&mut rusqlite::Savepoint<'_>) -> Result<TxOutcome<T>>,
) -> Result<T> {
    let mut sp = tx.savepoint()?;
    match f(&mut sp)? {
        TxOutcome::Commit(value) => {
            sp.commit()?;
            Ok(value)
        }
        TxOutcome::Rollback(value) => {
            sp.rollback()?;
            Ok(value)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
