//! # missive-store
//!
//! The persistence core of the Missive messaging client: an embedded,
//! schema-aware object store over a single SQLite file.
//!
//! Subsystems:
//!
//! - **Connection pool**: one serialized writer plus a bounded pool of
//!   read-only connections (WAL snapshot reads)
//! - **Schema catalog**: one-time table introspection with precomputed SQL
//! - **Query compiler**: predicate/sort/pagination trees to parameterized
//!   SQL, across class-hierarchy table sets
//! - **Record store**: per-hierarchy fetch/insert/update/upsert/delete with
//!   an identity cache and post-commit change notifications
//! - **Live queries**: ordered result windows kept current via incremental
//!   diffs (insert/delete/move/update)
//! - **Data references**: one handle type over memory, file, database-blob,
//!   and external-URL payload bytes
//!
//! The [`Store`] façade ties these together: open a database, hand out
//! record stores per model hierarchy, shut down cleanly.

#![deny(unsafe_code)]

pub mod cache;
pub mod catalog;
pub mod compile;
pub mod config;
pub mod dao;
pub mod data;
pub mod errors;
pub mod live;
pub mod notify;
pub mod pool;
pub mod record;
pub mod store;

pub use config::StoreConfig;
pub use dao::RecordStore;
pub use data::{BlobDataRef, BlobStore, DataRef, FileDataRef, MemoryDataRef, UrlDataRef};
pub use errors::{Result, StoreError};
pub use live::{FetchRequest, LiveObserver, LiveResults, ResultChange};
pub use notify::{ChangeObserver, SubscriptionId};
pub use pool::{ConnectionPool, TxOutcome};
pub use record::{DeleteContext, Model};
pub use store::Store;

pub use missive_core::{ColumnValues, CompareOp, FieldValue, Predicate, RecordId, SortKey};
