//! Cache wrappers
//!
//! Wrappers implement [`CacheWrapper`] around an inner `Arc<dyn Cache>`.
//! Every operation forwards to the delegate unless the wrapper overrides it;
//! [`WrappedCache`] exposes a wrapper as a [`Cache`]. The builder stacks
//! them in a fixed order:
//!
//! ```text
//! custom wrappers (registration order, outermost last)
//!   └─ InvalidationNotifyingCacheWrapper   (if a channel is configured)
//!        └─ BoundedResolveCacheWrapper     (if max concurrent resolve is set)
//!             └─ BasicCache
//! ```

mod bounded;
mod notify;
mod permits;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cache::filter::EntryFilter;
use crate::cache::metrics::MetricsSnapshot;
use crate::cache::view::CacheView;
use crate::domain::ports::{Cache, CacheKey, CacheValue};
use crate::error::Result;

pub use bounded::BoundedResolveCacheWrapper;
pub use notify::InvalidationNotifyingCacheWrapper;
pub use permits::{ResolvePermit, ResolvePermits};

// =============================================================================
// Forwarding Base
// =============================================================================

/// Base for cache decorators.
///
/// Only [`delegate`](CacheWrapper::delegate) is required; override the
/// operations the wrapper changes and [`into_cache`](CacheWrapper::into_cache)
/// turns the result into a [`Cache`].
pub trait CacheWrapper<K: CacheKey, V: CacheValue>: Send + Sync {
    /// The wrapped cache.
    fn delegate(&self) -> &Arc<dyn Cache<K, V>>;

    fn into_cache(self) -> Arc<dyn Cache<K, V>>
    where
        Self: Sized + 'static,
    {
        Arc::new(WrappedCache::new(self))
    }

    fn cache_id(&self) -> &str {
        self.delegate().cache_id()
    }

    fn label(&self) -> Option<&str> {
        self.delegate().label()
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        self.delegate().get(key)
    }

    fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>> {
        self.delegate().get_all(keys)
    }

    fn invalidate(&self, filter: &EntryFilter<K, V>, propagate: bool) {
        self.delegate().invalidate(filter, propagate);
    }

    fn cached_value(&self, key: &K) -> Option<V> {
        self.delegate().cached_value(key)
    }

    fn cache_map(&self) -> HashMap<K, V> {
        self.delegate().cache_map()
    }

    fn unmodifiable_view(&self) -> CacheView<'_, K, V> {
        self.delegate().unmodifiable_view()
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.delegate().metrics()
    }
}

/// Adapts a [`CacheWrapper`] into a [`Cache`].
pub struct WrappedCache<W> {
    wrapper: W,
}

impl<W> WrappedCache<W> {
    pub fn new(wrapper: W) -> Self {
        Self { wrapper }
    }

    /// The adapted wrapper, for wrapper-specific accessors.
    pub fn inner(&self) -> &W {
        &self.wrapper
    }
}

impl<K, V, W> Cache<K, V> for WrappedCache<W>
where
    K: CacheKey,
    V: CacheValue,
    W: CacheWrapper<K, V>,
{
    fn cache_id(&self) -> &str {
        self.wrapper.cache_id()
    }

    fn label(&self) -> Option<&str> {
        self.wrapper.label()
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        self.wrapper.get(key)
    }

    fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>> {
        self.wrapper.get_all(keys)
    }

    fn invalidate(&self, filter: &EntryFilter<K, V>, propagate: bool) {
        self.wrapper.invalidate(filter, propagate);
    }

    fn cached_value(&self, key: &K) -> Option<V> {
        self.wrapper.cached_value(key)
    }

    fn cache_map(&self) -> HashMap<K, V> {
        self.wrapper.cache_map()
    }

    fn unmodifiable_view(&self) -> CacheView<'_, K, V> {
        self.wrapper.unmodifiable_view()
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.wrapper.metrics()
    }
}

// =============================================================================
// Custom Wrappers
// =============================================================================

/// Builds a wrapper around the cache constructed so far.
pub type WrapperFactory<K, V> =
    Arc<dyn Fn(Arc<dyn Cache<K, V>>) -> Result<Arc<dyn Cache<K, V>>> + Send + Sync>;

/// Named custom wrapper registered on a builder.
pub struct CustomWrapper<K: CacheKey, V: CacheValue> {
    name: String,
    factory: WrapperFactory<K, V>,
}

impl<K: CacheKey, V: CacheValue> CustomWrapper<K, V> {
    pub fn new(name: impl Into<String>, factory: WrapperFactory<K, V>) -> Self {
        Self {
            name: name.into(),
            factory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, inner: Arc<dyn Cache<K, V>>) -> Result<Arc<dyn Cache<K, V>>> {
        (self.factory)(inner)
    }
}

impl<K: CacheKey, V: CacheValue> Clone for CustomWrapper<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for CustomWrapper<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomWrapper")
            .field("name", &self.name)
            .finish()
    }
}
