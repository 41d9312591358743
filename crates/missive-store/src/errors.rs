//! Error types for the store.
//!
//! [`StoreError`] is the single error taxonomy returned by every fallible
//! store operation. Variants are specific enough for exhaustive matching at
//! call sites while keeping the surface small.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be opened.
    #[error("open failed: {0}")]
    Open(String),

    /// No connection became available within the acquisition timeout.
    #[error("connection pool timed out")]
    PoolTimeout,

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,

    /// A table is missing or its shape is unusable.
    #[error("schema error: {0}")]
    Schema(String),

    /// A predicate or sort referenced a field no hierarchy table carries.
    #[error("unknown field in query: {field}")]
    QueryCompile {
        /// The offending field name.
        field: String,
    },

    /// The targeted row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An insert collided with an existing identifier.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// A data reference whose owning row has been deleted (or which was
    /// never attached to a store) was accessed.
    #[error("data reference is no longer valid")]
    ReferenceInvalidated,

    /// The live query controller has been closed.
    #[error("live query controller is closed")]
    ControllerClosed,

    /// Stream or filesystem failure on a data reference backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Reader pool management error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A record failed to encode or decode its fields.
    #[error("record codec error: {0}")]
    Codec(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_are_stable() {
        assert_eq!(StoreError::PoolTimeout.to_string(), "connection pool timed out");
        assert_eq!(
            StoreError::PoolClosed.to_string(),
            "connection pool is closed"
        );
        assert_eq!(
            StoreError::QueryCompile {
                field: "senderr".into()
            }
            .to_string(),
            "unknown field in query: senderr"
        );
        assert_eq!(
            StoreError::DuplicateKey("msg-1".into()).to_string(),
            "duplicate key: msg-1"
        );
    }

    #[test]
    fn from_rusqlite_error() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn from_io_error() {
        let err: StoreError = std::io::Error::other("boom").into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
