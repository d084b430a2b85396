//! Wrapper that caps the number of resolves running at once.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::cache::metrics::MetricsSnapshot;
use crate::domain::ports::{Cache, CacheKey, CacheValue};
use crate::error::Result;

use super::permits::ResolvePermits;
use super::CacheWrapper;

/// Bounds concurrent cache misses with a counting permit.
///
/// Cached keys are served without touching the permits. A miss takes one
/// permit for the duration of the delegate's `get`; a batch with any miss
/// takes one permit for the whole batch.
pub struct BoundedResolveCacheWrapper<K: CacheKey, V: CacheValue> {
    delegate: Arc<dyn Cache<K, V>>,
    permits: ResolvePermits,
}

impl<K: CacheKey, V: CacheValue> BoundedResolveCacheWrapper<K, V> {
    pub fn new(delegate: Arc<dyn Cache<K, V>>, max_concurrent_resolve: usize) -> Self {
        Self {
            delegate,
            permits: ResolvePermits::new(max_concurrent_resolve),
        }
    }

    pub fn permits(&self) -> &ResolvePermits {
        &self.permits
    }
}

impl<K: CacheKey, V: CacheValue> CacheWrapper<K, V> for BoundedResolveCacheWrapper<K, V> {
    fn delegate(&self) -> &Arc<dyn Cache<K, V>> {
        &self.delegate
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        if self.delegate.unmodifiable_view().contains_key(key) {
            return self.delegate.get(key);
        }

        let _permit = self.permits.acquire();
        trace!(cache_id = %self.delegate.cache_id(), key = ?key, "Resolving under permit");
        self.delegate.get(key)
    }

    fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>> {
        let cached = self.delegate.unmodifiable_view().count_cached(keys);
        if cached == keys.len() {
            return self.delegate.get_all(keys);
        }

        let _permit = self.permits.acquire();
        self.delegate.get_all(keys)
    }

    fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.delegate.metrics();
        snapshot.permit_waits += self.permits.waits();
        snapshot.permit_bypasses += self.permits.bypasses();
        snapshot
    }
}
