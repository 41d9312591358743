//! Store configuration.
//!
//! Plain serde-deserializable knobs with compiled defaults, so embedding
//! applications can load them from their own settings files.

use serde::Deserialize;

/// Configuration for an open [`crate::Store`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Maximum concurrent reader connections (default: 4).
    pub reader_pool_size: u32,
    /// How long reader/writer acquisition may wait, in milliseconds
    /// (default: 5000).
    pub acquire_timeout_ms: u64,
    /// SQLite busy timeout in milliseconds (default: 30000).
    pub busy_timeout_ms: u32,
    /// SQLite page cache size in KiB per connection (default: 8192 = 8 MB).
    pub cache_size_kib: i64,
    /// Identity cache capacity per record store (default: 512 records).
    pub identity_cache_capacity: usize,
    /// Row cache capacity per live query controller (default: 64 records).
    pub live_row_cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reader_pool_size: 4,
            acquire_timeout_ms: 5_000,
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
            identity_cache_capacity: 512,
            live_row_cache_capacity: 64,
        }
    }
}

impl StoreConfig {
    /// Reader/writer acquisition timeout as a [`std::time::Duration`].
    #[must_use]
    pub fn acquire_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = StoreConfig::default();
        assert_eq!(config.reader_pool_size, 4);
        assert_eq!(config.acquire_timeout_ms, 5_000);
        assert_eq!(config.busy_timeout_ms, 30_000);
        assert_eq!(config.cache_size_kib, 8192);
        assert_eq!(config.identity_cache_capacity, 512);
    }

    #[test]
    fn deserializes_partial_json() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"readerPoolSize": 2, "acquireTimeoutMs": 100}"#).unwrap();
        assert_eq!(config.reader_pool_size, 2);
        assert_eq!(config.acquire_timeout_ms, 100);
        // Untouched knobs keep their defaults.
        assert_eq!(config.busy_timeout_ms, 30_000);
    }
}
