//! Default cache implementation.
//!
//! Read-through cache over a backing map. A miss calls the resolver and
//! publishes the result with put-if-absent, so when two threads resolve the
//! same key concurrently both resolver calls run, the first insert wins and
//! both callers return the winning value.

use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::filter::EntryFilter;
use crate::cache::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
use crate::cache::view::CacheView;
use crate::domain::ports::{BackingMap, Cache, CacheKey, CacheValue, ValueResolver};
use crate::error::Result;

/// Lazily evaluated display name.
pub type LabelSupplier = Arc<dyn Fn() -> String + Send + Sync>;

/// Resolve-on-miss cache over a [`BackingMap`].
pub struct BasicCache<K: CacheKey, V: CacheValue> {
    cache_id: String,
    label_supplier: Option<LabelSupplier>,
    label: OnceCell<Option<String>>,
    resolver: Arc<dyn ValueResolver<K, V>>,
    map: Arc<dyn BackingMap<K, V>>,
    metrics: CacheMetrics,
}

impl<K: CacheKey, V: CacheValue> BasicCache<K, V> {
    pub fn new(
        cache_id: impl Into<String>,
        resolver: Arc<dyn ValueResolver<K, V>>,
        map: Arc<dyn BackingMap<K, V>>,
    ) -> Self {
        Self {
            cache_id: cache_id.into(),
            label_supplier: None,
            label: OnceCell::new(),
            resolver,
            map,
            metrics: CacheMetrics::new(),
        }
    }

    pub fn with_label_supplier(mut self, supplier: LabelSupplier) -> Self {
        self.label_supplier = Some(supplier);
        self
    }

    pub fn backing_map(&self) -> &Arc<dyn BackingMap<K, V>> {
        &self.map
    }

    fn ensure_transaction_member(&self) {
        if let Some(transactional) = self.map.as_transactional() {
            transactional.ensure_transaction_member();
        }
    }

    fn mark_inserts_dirty(&self) {
        if let Some(transactional) = self.map.as_transactional() {
            transactional.mark_inserts_dirty();
            self.metrics.record_dirty_mark();
        }
    }

    fn resolve(&self, key: &K) -> Result<Option<V>> {
        let tracker = LatencyTracker::start();
        match self.resolver.resolve(key) {
            Ok(resolved) => {
                self.metrics.record_resolve(tracker.elapsed());
                Ok(resolved)
            }
            Err(err) => {
                self.metrics.record_resolve_error();
                debug!(cache_id = %self.cache_id, key = ?key, error = %err, "Resolve failed");
                Err(err)
            }
        }
    }

    fn resolve_all(&self, keys: &HashSet<K>) -> Result<HashMap<K, Option<V>>> {
        let tracker = LatencyTracker::start();
        match self.resolver.resolve_all(keys) {
            Ok(resolved) => {
                self.metrics.record_resolve(tracker.elapsed());
                Ok(resolved)
            }
            Err(err) => {
                self.metrics.record_resolve_error();
                debug!(cache_id = %self.cache_id, keys = keys.len(), error = %err, "Batch resolve failed");
                Err(err)
            }
        }
    }

    /// Insert unless present; return whichever value ended up in the map.
    fn publish(&self, key: K, value: V) -> V {
        match self.map.put_if_absent(key, value.clone()) {
            Some(existing) => {
                self.metrics.record_lost_race();
                existing
            }
            None => value,
        }
    }
}

impl<K: CacheKey, V: CacheValue> Cache<K, V> for BasicCache<K, V> {
    fn cache_id(&self) -> &str {
        &self.cache_id
    }

    fn label(&self) -> Option<&str> {
        self.label
            .get_or_init(|| self.label_supplier.as_ref().map(|supplier| supplier()))
            .as_deref()
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        if let Some(value) = self.map.get(key) {
            self.metrics.record_hit();
            return Ok(Some(value));
        }
        self.metrics.record_miss();

        // Join the transaction before resolving so an invalidation that
        // happens during the resolve marks this insert stale.
        self.ensure_transaction_member();

        match self.resolve(key)? {
            Some(value) => {
                trace!(cache_id = %self.cache_id, key = ?key, "Resolved value");
                Ok(Some(self.publish(key.clone(), value)))
            }
            None => {
                self.metrics.record_absent_resolve();
                Ok(None)
            }
        }
    }

    fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>> {
        let mut result = HashMap::with_capacity(keys.len());
        let mut missing = HashSet::new();

        for key in keys {
            if result.contains_key(key) || missing.contains(key) {
                continue;
            }
            match self.map.get(key) {
                Some(value) => {
                    self.metrics.record_hit();
                    result.insert(key.clone(), value);
                }
                None => {
                    self.metrics.record_miss();
                    missing.insert(key.clone());
                }
            }
        }

        if missing.is_empty() {
            return Ok(result);
        }

        self.ensure_transaction_member();
        let resolved = self.resolve_all(&missing)?;
        debug!(
            cache_id = %self.cache_id,
            requested = missing.len(),
            resolved = resolved.len(),
            "Batch resolved"
        );

        // The resolver may deliver keys that were not asked for; those are
        // cached and returned as well.
        for (key, value) in resolved {
            match value {
                Some(value) => {
                    let value = self.publish(key.clone(), value);
                    result.insert(key, value);
                }
                None => self.metrics.record_absent_resolve(),
            }
        }
        Ok(result)
    }

    fn invalidate(&self, filter: &EntryFilter<K, V>, propagate: bool) {
        match filter {
            EntryFilter::All => self.map.clear(),
            EntryFilter::Keys(keys) => {
                let mut all_present = true;
                for key in keys.iter() {
                    if self.map.remove(key).is_none() {
                        all_present = false;
                    }
                }
                // An absent key may be in flight in another transaction
                if !all_present {
                    self.mark_inserts_dirty();
                }
            }
            EntryFilter::Custom(custom) => {
                for (key, value) in self.map.entries() {
                    if custom.accept(&key, &value) {
                        self.map.remove(&key);
                    }
                }
                self.mark_inserts_dirty();
            }
        }
        self.metrics.record_invalidation();
        debug!(
            cache_id = %self.cache_id,
            filter = ?filter.kind(),
            propagate,
            "Cache invalidated"
        );
    }

    fn cached_value(&self, key: &K) -> Option<V> {
        self.map.peek(key)
    }

    fn cache_map(&self) -> HashMap<K, V> {
        self.map.entries().into_iter().collect()
    }

    fn unmodifiable_view(&self) -> CacheView<'_, K, V> {
        CacheView::new(self.map.as_ref())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.map.len(), self.map.strategy_name())
    }
}
