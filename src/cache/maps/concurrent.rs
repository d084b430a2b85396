//! Thread-safe map backed by `DashMap`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::ports::{BackingMap, CacheKey, CacheValue};

/// Concurrent map with per-shard locking.
pub struct ConcurrentMap<K, V> {
    inner: DashMap<K, V>,
}

impl<K: CacheKey, V: CacheValue> ConcurrentMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }
}

impl<K: CacheKey, V: CacheValue> Default for ConcurrentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: CacheValue> BackingMap<K, V> for ConcurrentMap<K, V> {
    fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        match self.inner.entry(key) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(value);
                None
            }
        }
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key).map(|(_, value)| value)
    }

    fn clear(&self) {
        self.inner.clear();
    }

    fn entries(&self) -> Vec<(K, V)> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn strategy_name(&self) -> &'static str {
        "concurrent"
    }
}
