//! Single-lock map for caches that did not ask for thread-safety.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::domain::ports::{BackingMap, CacheKey, CacheValue};

/// `HashMap` behind one mutex.
///
/// The lock keeps the type `Sync` so it can sit behind the same `Arc<dyn
/// Cache>` as the other strategies; it is uncontended in single-threaded use.
pub struct PlainMap<K, V> {
    map: Mutex<HashMap<K, V>>,
}

impl<K: CacheKey, V: CacheValue> PlainMap<K, V> {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }
}

impl<K: CacheKey, V: CacheValue> Default for PlainMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: CacheValue> BackingMap<K, V> for PlainMap<K, V> {
    fn get(&self, key: &K) -> Option<V> {
        self.map.lock().get(key).cloned()
    }

    fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        let mut map = self.map.lock();
        if let Some(existing) = map.get(&key) {
            return Some(existing.clone());
        }
        map.insert(key, value);
        None
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.map.lock().remove(key)
    }

    fn clear(&self) {
        self.map.lock().clear();
    }

    fn entries(&self) -> Vec<(K, V)> {
        self.map
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.map.lock().len()
    }

    fn strategy_name(&self) -> &'static str {
        "plain"
    }
}
