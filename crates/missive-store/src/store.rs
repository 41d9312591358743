//! The store façade.
//!
//! A [`Store`] owns everything attached to one database file: the
//! connection pool, the schema catalog, the blob store, and one memoized
//! [`RecordStore`] per model hierarchy. Domain code opens a store per
//! database "kind", asks for record stores by type, and shuts the store
//! down when done.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::catalog::SchemaCatalog;
use crate::config::StoreConfig;
use crate::dao::RecordStore;
use crate::data::BlobStore;
use crate::errors::{Result, StoreError};
use crate::live::{FetchRequest, LiveResults};
use crate::pool::ConnectionPool;
use crate::record::Model;

/// One open database: pool, catalog, blobs, and per-hierarchy record stores.
pub struct Store {
    pool: Arc<ConnectionPool>,
    catalog: SchemaCatalog,
    blobs: BlobStore,
    config: StoreConfig,
    stores: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Store {
    /// Open the database at `path`.
    ///
    /// The schema is expected to exist already (migrations run before the
    /// store opens).
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::open(path, &config)?);
        let catalog = SchemaCatalog::new(pool.clone());
        let blobs = BlobStore::new(pool.clone());
        Ok(Self {
            pool,
            catalog,
            blobs,
            config,
            stores: Mutex::new(HashMap::new()),
        })
    }

    /// The record store for hierarchy `M`, created on first use.
    ///
    /// Memoized per type: every caller shares one store and therefore one
    /// identity cache and one notification hub.
    pub fn record_store<M: Model>(&self) -> Result<Arc<RecordStore<M>>> {
        let key = TypeId::of::<M>();
        if let Some(existing) = self.stores.lock().get(&key) {
            return downcast::<M>(existing.clone());
        }

        if M::TABLES.is_empty() {
            return Err(StoreError::Schema(
                "model hierarchy declares no tables".into(),
            ));
        }
        let tables = M::TABLES
            .iter()
            .map(|t| self.catalog.describe(t))
            .collect::<Result<Vec<_>>>()?;
        let store = Arc::new(RecordStore::<M>::new(
            self.pool.clone(),
            self.blobs.clone(),
            tables,
            &self.config,
        ));

        let mut stores = self.stores.lock();
        let entry = stores
            .entry(key)
            .or_insert_with(|| store.clone() as Arc<dyn Any + Send + Sync>);
        downcast::<M>(entry.clone())
    }

    /// A live query controller over hierarchy `M`.
    pub fn live_query<M: Model>(&self, request: FetchRequest) -> Result<LiveResults<M>> {
        Ok(LiveResults::new(
            self.record_store::<M>()?,
            request,
            self.config.live_row_cache_capacity,
        ))
    }

    /// The payload blob store.
    #[must_use]
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// The connection pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    /// Drain in-flight operations and close every connection. Operations
    /// after shutdown fail with [`StoreError::PoolClosed`].
    pub fn shutdown(&self) {
        info!(path = %self.path().display(), "store shutting down");
        self.pool.close();
    }
}

fn downcast<M: Model>(any: Arc<dyn Any + Send + Sync>) -> Result<Arc<RecordStore<M>>> {
    any.downcast::<RecordStore<M>>()
        .map_err(|_| StoreError::Codec("record store type confusion".into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
