//! Registry of constructed caches, keyed by cache id.
//!
//! The registry is an ordinary value owned by the application and handed to
//! [`CacheBuilder::build`](crate::cache::CacheBuilder::build); there is no
//! process-global instance. Caches of different key/value types live side by
//! side; typed lookups check the types and fail with
//! [`Error::CacheTypeMismatch`] on a mismatch.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::filter::EntryFilter;
use crate::cache::metrics::MetricsSnapshot;
use crate::domain::ports::{Cache, CacheKey, CacheValue};
use crate::error::{Error, Result};

/// Type-erased operations available on every registered cache.
pub trait ErasedCache: Send + Sync {
    fn cache_id(&self) -> &str;
    fn label(&self) -> Option<&str>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn metrics(&self) -> MetricsSnapshot;
    fn invalidate_all(&self, propagate: bool);
}

struct TypedHandle<K: CacheKey, V: CacheValue> {
    cache: Arc<dyn Cache<K, V>>,
}

impl<K: CacheKey, V: CacheValue> ErasedCache for TypedHandle<K, V> {
    fn cache_id(&self) -> &str {
        self.cache.cache_id()
    }

    fn label(&self) -> Option<&str> {
        self.cache.label()
    }

    fn len(&self) -> usize {
        self.cache.unmodifiable_view().len()
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.cache.metrics()
    }

    fn invalidate_all(&self, propagate: bool) {
        self.cache.invalidate(&EntryFilter::All, propagate);
    }
}

#[derive(Clone)]
struct RegisteredCache {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedCache>,
}

impl RegisteredCache {
    fn new<K: CacheKey, V: CacheValue>(cache: Arc<dyn Cache<K, V>>) -> Self {
        let handle = Arc::new(TypedHandle { cache });
        Self {
            typed: handle.clone(),
            erased: handle,
        }
    }

    fn downcast<K: CacheKey, V: CacheValue>(&self) -> Option<Arc<dyn Cache<K, V>>> {
        self.typed
            .clone()
            .downcast::<TypedHandle<K, V>>()
            .ok()
            .map(|handle| Arc::clone(&handle.cache))
    }
}

/// Cache id → cache mapping.
#[derive(Default)]
pub struct CacheRegistry {
    caches: DashMap<String, RegisteredCache>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache. Fails if the id is taken.
    pub fn register<K: CacheKey, V: CacheValue>(&self, cache: Arc<dyn Cache<K, V>>) -> Result<()> {
        let cache_id = cache.cache_id().to_string();
        match self.caches.entry(cache_id) {
            Entry::Occupied(entry) => Err(Error::CacheAlreadyExists {
                cache_id: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                info!(cache_id = %entry.key(), "Cache registered");
                entry.insert(RegisteredCache::new(cache));
                Ok(())
            }
        }
    }

    /// Register a cache, replacing any cache with the same id. Returns true
    /// if a cache was replaced.
    pub fn register_and_replace<K: CacheKey, V: CacheValue>(
        &self,
        cache: Arc<dyn Cache<K, V>>,
    ) -> bool {
        let cache_id = cache.cache_id().to_string();
        let replaced = self
            .caches
            .insert(cache_id.clone(), RegisteredCache::new(cache))
            .is_some();
        if replaced {
            info!(cache_id = %cache_id, "Cache replaced");
        } else {
            info!(cache_id = %cache_id, "Cache registered");
        }
        replaced
    }

    /// Register a cache unless the id is taken; returns whichever cache is
    /// registered afterwards. Racing callers all receive the same instance.
    pub fn register_if_absent<K: CacheKey, V: CacheValue>(
        &self,
        cache: Arc<dyn Cache<K, V>>,
    ) -> Result<Arc<dyn Cache<K, V>>> {
        let cache_id = cache.cache_id().to_string();
        match self.caches.entry(cache_id) {
            Entry::Occupied(entry) => {
                entry
                    .get()
                    .downcast::<K, V>()
                    .ok_or_else(|| Error::CacheTypeMismatch {
                        cache_id: entry.key().clone(),
                    })
            }
            Entry::Vacant(entry) => {
                info!(cache_id = %entry.key(), "Cache registered");
                entry.insert(RegisteredCache::new(Arc::clone(&cache)));
                Ok(cache)
            }
        }
    }

    /// Typed lookup. Fails if the id is unknown or has other key/value types.
    pub fn get<K: CacheKey, V: CacheValue>(&self, cache_id: &str) -> Result<Arc<dyn Cache<K, V>>> {
        let registered = self
            .caches
            .get(cache_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::CacheNotFound {
                cache_id: cache_id.to_string(),
            })?;
        registered
            .downcast::<K, V>()
            .ok_or_else(|| Error::CacheTypeMismatch {
                cache_id: cache_id.to_string(),
            })
    }

    /// Typed lookup that returns `None` instead of failing.
    pub fn opt<K: CacheKey, V: CacheValue>(&self, cache_id: &str) -> Option<Arc<dyn Cache<K, V>>> {
        let registered = self.caches.get(cache_id)?.value().clone();
        let cache = registered.downcast::<K, V>();
        if cache.is_none() {
            warn!(cache_id, "Cache registered with different key/value types");
        }
        cache
    }

    /// Type-erased lookup.
    pub fn erased(&self, cache_id: &str) -> Option<Arc<dyn ErasedCache>> {
        self.caches
            .get(cache_id)
            .map(|entry| Arc::clone(&entry.value().erased))
    }

    pub fn contains(&self, cache_id: &str) -> bool {
        self.caches.contains_key(cache_id)
    }

    /// Registered ids, sorted.
    pub fn cache_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.caches.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// All registered caches, sorted by id.
    pub fn caches(&self) -> Vec<Arc<dyn ErasedCache>> {
        let mut caches: Vec<Arc<dyn ErasedCache>> = self
            .caches
            .iter()
            .map(|entry| Arc::clone(&entry.value().erased))
            .collect();
        caches.sort_by(|a, b| a.cache_id().cmp(b.cache_id()));
        caches
    }

    /// Clear a cache without knowing its key/value types.
    pub fn invalidate_all(&self, cache_id: &str, propagate: bool) -> Result<()> {
        let cache = self.erased(cache_id).ok_or_else(|| Error::CacheNotFound {
            cache_id: cache_id.to_string(),
        })?;
        cache.invalidate_all(propagate);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::basic::BasicCache;
    use crate::cache::maps::ConcurrentMap;
    use crate::domain::ports::FnResolver;
    use assert_matches::assert_matches;

    fn cache(id: &str) -> Arc<dyn Cache<u32, String>> {
        Arc::new(BasicCache::new(
            id,
            Arc::new(FnResolver::new(|key: &u32| Ok(Some(key.to_string())))),
            Arc::new(ConcurrentMap::new()),
        ))
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = CacheRegistry::new();
        registry.register(cache("a")).unwrap();
        assert_matches!(
            registry.register(cache("a")),
            Err(Error::CacheAlreadyExists { cache_id }) if cache_id == "a"
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_and_replace() {
        let registry = CacheRegistry::new();
        let first = cache("a");
        let second = cache("a");

        assert!(!registry.register_and_replace(first.clone()));
        assert!(registry.register_and_replace(second.clone()));

        let found = registry.get::<u32, String>("a").unwrap();
        assert!(Arc::ptr_eq(&found, &second));
    }

    #[test]
    fn test_register_if_absent_returns_existing() {
        let registry = CacheRegistry::new();
        let first = cache("a");
        let winner = registry.register_if_absent(first.clone()).unwrap();
        assert!(Arc::ptr_eq(&winner, &first));

        let loser = registry.register_if_absent(cache("a")).unwrap();
        assert!(Arc::ptr_eq(&loser, &first));
    }

    #[test]
    fn test_get_and_opt() {
        let registry = CacheRegistry::new();
        registry.register(cache("a")).unwrap();

        assert!(registry.opt::<u32, String>("a").is_some());
        assert!(registry.opt::<u32, String>("missing").is_none());
        assert_matches!(
            registry.get::<u32, String>("missing"),
            Err(Error::CacheNotFound { .. })
        );
        assert_matches!(
            registry.get::<String, String>("a"),
            Err(Error::CacheTypeMismatch { .. })
        );
        assert!(registry.opt::<String, String>("a").is_none());
    }

    #[test]
    fn test_erased_operations() {
        let registry = CacheRegistry::new();
        let typed = cache("b");
        registry.register(typed.clone()).unwrap();
        registry.register(cache("a")).unwrap();
        typed.get_all(&[1, 2]).unwrap();

        assert_eq!(registry.cache_ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.erased("b").unwrap().len(), 2);

        registry.invalidate_all("b", false).unwrap();
        assert!(typed.cache_map().is_empty());
        assert_matches!(
            registry.invalidate_all("zzz", false),
            Err(Error::CacheNotFound { .. })
        );

        let ids: Vec<String> = registry
            .caches()
            .iter()
            .map(|c| c.cache_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_register_if_absent_race_single_winner() {
        let registry = Arc::new(CacheRegistry::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.register_if_absent(cache("race")).unwrap()
                })
            })
            .collect();

        let winners: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for winner in &winners {
            assert!(Arc::ptr_eq(winner, &winners[0]));
        }
    }
}
