//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions the caching engine consumes from its owner. Resolvers supply
//! values on a miss, invalidation channels carry "what was invalidated" to
//! other nodes or sessions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Caching Engine                          │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │        ValueResolver │ InvalidationChannel           │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  LoggingChannel │ CoalescingChannel │ ClusterTransport │ │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::cache::filter::EntryFilter;
use crate::cache::metrics::MetricsSnapshot;
use crate::cache::view::CacheView;
use crate::error::Result;

use super::events::InvalidationNotification;

// =============================================================================
// Key / Value Bounds
// =============================================================================

/// Bound for cache keys.
pub trait CacheKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Bound for cache values.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

// =============================================================================
// Cache Port
// =============================================================================

/// Keyed resolve-on-miss cache.
///
/// Implemented by [`BasicCache`](crate::cache::BasicCache) and by every
/// wrapper in the builder's chain. Wrappers forward each operation they do
/// not override to their delegate.
pub trait Cache<K: CacheKey, V: CacheValue>: Send + Sync {
    /// Registry id of this cache.
    fn cache_id(&self) -> &str;

    /// Display name, computed once from the label supplier.
    fn label(&self) -> Option<&str>;

    /// Return the cached value or resolve it on a miss.
    fn get(&self, key: &K) -> Result<Option<V>>;

    /// Return values for all resolvable keys. Unresolvable keys are absent
    /// from the result.
    fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>>;

    /// Remove entries accepted by `filter`. `propagate` is forwarded to
    /// invalidation channels.
    fn invalidate(&self, filter: &EntryFilter<K, V>, propagate: bool);

    /// Lookup without resolving.
    fn cached_value(&self, key: &K) -> Option<V>;

    /// Independent snapshot of the current contents.
    fn cache_map(&self) -> HashMap<K, V>;

    /// Live read-only view over the backing map.
    fn unmodifiable_view(&self) -> CacheView<'_, K, V>;

    fn metrics(&self) -> MetricsSnapshot;
}

impl<K: CacheKey, V: CacheValue> Debug for dyn Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("cache_id", &self.cache_id())
            .field("label", &self.label())
            .finish()
    }
}

// =============================================================================
// Backing Map Port
// =============================================================================

/// Storage behind a [`BasicCache`](crate::cache::BasicCache).
///
/// All strategies share this contract; concurrency and eviction differ.
pub trait BackingMap<K: CacheKey, V: CacheValue>: Send + Sync {
    /// Lookup that counts as an access (refreshes LRU/TTL where tracked).
    fn get(&self, key: &K) -> Option<V>;

    /// Lookup that leaves access tracking untouched.
    fn peek(&self, key: &K) -> Option<V> {
        self.get(key)
    }

    fn contains_key(&self, key: &K) -> bool {
        self.peek(key).is_some()
    }

    /// Insert unless a value is present. Returns the present value if the
    /// insert lost.
    fn put_if_absent(&self, key: K, value: V) -> Option<V>;

    fn remove(&self, key: &K) -> Option<V>;

    fn clear(&self);

    /// Snapshot of all live entries.
    fn entries(&self) -> Vec<(K, V)>;

    fn keys(&self) -> Vec<K> {
        self.entries().into_iter().map(|(key, _)| key).collect()
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short strategy name for logs and metrics.
    fn strategy_name(&self) -> &'static str;

    /// Transactional capability, if this map has one.
    fn as_transactional(&self) -> Option<&dyn TransactionalCapability> {
        None
    }
}

/// Capability of transaction-aware backing maps.
pub trait TransactionalCapability {
    /// Join the current transaction, if any. Called before resolving so a
    /// conflicting invalidation that happens during the resolve is detected.
    fn ensure_transaction_member(&self);

    /// Treat pending inserts of concurrent transactions as stale.
    fn mark_inserts_dirty(&self);
}

// =============================================================================
// Value Resolver Port
// =============================================================================

/// Resolves values for keys that are missing from a cache.
///
/// `Ok(None)` means the key has no value; such keys are never cached.
/// Errors are returned unchanged to the caller of `get`/`get_all`.
pub trait ValueResolver<K: CacheKey, V: CacheValue>: Send + Sync {
    /// Resolve a single key.
    fn resolve(&self, key: &K) -> Result<Option<V>>;

    /// Resolve a batch of keys.
    ///
    /// The default resolves each key independently. Implementations backed
    /// by a batch-capable source should override this. Entries for keys that
    /// were not requested are accepted and cached as well.
    fn resolve_all(&self, keys: &HashSet<K>) -> Result<HashMap<K, Option<V>>> {
        let mut resolved = HashMap::with_capacity(keys.len());
        for key in keys {
            resolved.insert(key.clone(), self.resolve(key)?);
        }
        Ok(resolved)
    }
}

/// Adapts a closure into a [`ValueResolver`].
pub struct FnResolver<K, V, F> {
    resolve: F,
    _types: PhantomData<fn(&K) -> V>,
}

impl<K, V, F> FnResolver<K, V, F>
where
    K: CacheKey,
    V: CacheValue,
    F: Fn(&K) -> Result<Option<V>> + Send + Sync,
{
    /// Wrap a resolve function.
    pub fn new(resolve: F) -> Self {
        Self {
            resolve,
            _types: PhantomData,
        }
    }
}

impl<K, V, F> ValueResolver<K, V> for FnResolver<K, V, F>
where
    K: CacheKey,
    V: CacheValue,
    F: Fn(&K) -> Result<Option<V>> + Send + Sync,
{
    fn resolve(&self, key: &K) -> Result<Option<V>> {
        (self.resolve)(key)
    }
}

// =============================================================================
// Invalidation Channel Port
// =============================================================================

/// Receives invalidation notifications for propagation.
///
/// The transport (in-process listeners, cluster messaging) is up to the
/// implementation. Delivery is best-effort.
pub trait InvalidationChannel<K: CacheKey, V: CacheValue>: Send + Sync {
    /// Publish a single notification.
    fn publish(&self, notification: InvalidationNotification<K, V>) -> Result<()>;

    /// Publish several notifications in order.
    fn publish_all(&self, notifications: Vec<InvalidationNotification<K, V>>) -> Result<()> {
        for notification in notifications {
            self.publish(notification)?;
        }
        Ok(())
    }
}
