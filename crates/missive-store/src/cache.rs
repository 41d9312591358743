//! Identity cache.
//!
//! One [`RecordCache`] per record store maps logical ids to the live
//! in-memory instance (`Arc`) for that id, so repeated fetches hand back the
//! same object. Bounded LRU: the least recently touched entry is evicted
//! when the cache is full. The lock is the cache's own — reads never block
//! on database I/O.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use missive_core::RecordId;

struct Entry<M> {
    record: Arc<M>,
    last_used: u64,
}

struct Inner<M> {
    map: HashMap<RecordId, Entry<M>>,
    capacity: usize,
    tick: u64,
}

/// LRU-bounded map from logical id to cached record instance.
pub struct RecordCache<M> {
    inner: Mutex<Inner<M>>,
}

impl<M> RecordCache<M> {
    /// New cache holding at most `capacity` records (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                capacity: capacity.max(1),
                tick: 0,
            }),
        }
    }

    /// Fetch the cached instance for `id`, marking it recently used.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<Arc<M>> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.map.get_mut(id).map(|entry| {
            entry.last_used = tick;
            entry.record.clone()
        })
    }

    /// Insert or replace the instance for `id`, evicting the least recently
    /// used entry if the cache is full.
    pub fn insert(&self, id: RecordId, record: Arc<M>) {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        if !inner.map.contains_key(&id) && inner.map.len() >= inner.capacity {
            if let Some(oldest) = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                let _ = inner.map.remove(&oldest);
            }
        }
        let _ = inner.map.insert(
            id,
            Entry {
                record,
                last_used: tick,
            },
        );
    }

    /// Return the cached instance for `id`, inserting `record` only when
    /// nothing is cached yet. Keeps concurrent fetch misses from handing out
    /// two different instances of the same record.
    #[must_use]
    pub fn get_or_insert(&self, id: RecordId, record: Arc<M>) -> Arc<M> {
        if let Some(existing) = self.get(&id) {
            return existing;
        }
        self.insert(id, record.clone());
        record
    }

    /// Drop the entry for `id`, if present.
    pub fn remove(&self, id: &RecordId) {
        let _ = self.inner.lock().map.remove(id);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.lock().map.clear();
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_same_instance() {
        let cache = RecordCache::new(4);
        let id = RecordId::from("a");
        let record = Arc::new("payload".to_owned());
        cache.insert(id.clone(), record.clone());

        let hit = cache.get(&id).unwrap();
        assert!(Arc::ptr_eq(&hit, &record));
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = RecordCache::new(2);
        cache.insert(RecordId::from("a"), Arc::new(1));
        cache.insert(RecordId::from("b"), Arc::new(2));
        // Touch "a" so "b" is the LRU entry.
        let _ = cache.get(&RecordId::from("a"));
        cache.insert(RecordId::from("c"), Arc::new(3));

        assert!(cache.get(&RecordId::from("a")).is_some());
        assert!(cache.get(&RecordId::from("b")).is_none());
        assert!(cache.get(&RecordId::from("c")).is_some());
    }

    #[test]
    fn remove_and_clear() {
        let cache = RecordCache::new(4);
        cache.insert(RecordId::from("a"), Arc::new(1));
        cache.insert(RecordId::from("b"), Arc::new(2));
        cache.remove(&RecordId::from("a"));
        assert!(cache.get(&RecordId::from("a")).is_none());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn replacing_does_not_evict_others() {
        let cache = RecordCache::new(2);
        cache.insert(RecordId::from("a"), Arc::new(1));
        cache.insert(RecordId::from("b"), Arc::new(2));
        // Same key: replacement, not growth.
        cache.insert(RecordId::from("b"), Arc::new(20));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&RecordId::from("a")).is_some());
    }
}
