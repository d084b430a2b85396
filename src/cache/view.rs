//! Live read-only view over a cache's backing map.

use crate::domain::ports::{BackingMap, CacheKey, CacheValue};

/// Read-only window onto the backing map.
///
/// Reads go straight to the map, so inserts and invalidations made through
/// the cache are visible immediately. Lookups through the view never count
/// as accesses for LRU/TTL tracking. Obtain a fresh view per use instead of
/// storing one.
pub struct CacheView<'a, K: CacheKey, V: CacheValue> {
    map: &'a dyn BackingMap<K, V>,
}

impl<'a, K: CacheKey, V: CacheValue> CacheView<'a, K, V> {
    pub fn new(map: &'a dyn BackingMap<K, V>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.map.peek(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Number of the given keys that are currently cached.
    pub fn count_cached(&self, keys: &[K]) -> usize {
        keys.iter().filter(|key| self.map.contains_key(key)).count()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.map.keys()
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        self.map.entries()
    }
}
