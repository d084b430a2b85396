//! Cache builder
//!
//! Collects cache options, picks a backing map, stacks wrappers and
//! registers the result.
//!
//! # Example
//!
//! ```ignore
//! let registry = CacheRegistry::new();
//! let cache = CacheBuilder::<String, Country>::new()
//!     .with_cache_id("countries")
//!     .with_resolve_fn(|code| Ok(load_country(code)))
//!     .with_max_concurrent_resolve(4)?
//!     .build(&registry)?;
//! ```

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::basic::{BasicCache, LabelSupplier};
use crate::cache::maps::{ConcurrentMap, ExpiringMap, PlainMap, TransactionalMap, TransactionalStore};
use crate::cache::registry::CacheRegistry;
use crate::cache::wrapper::{
    BoundedResolveCacheWrapper, CacheWrapper, CustomWrapper, InvalidationNotifyingCacheWrapper,
    WrapperFactory,
};
use crate::domain::events::CacheEvent;
use crate::domain::ports::{
    BackingMap, Cache, CacheKey, CacheValue, FnResolver, InvalidationChannel, ValueResolver,
};
use crate::error::{Error, Result};

// =============================================================================
// Map Strategy
// =============================================================================

/// Backing map chosen for a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapStrategy {
    /// Time-to-live and/or LRU size bound.
    Expiring {
        time_to_live: Option<Duration>,
        size_bound: Option<NonZeroUsize>,
        touch_on_get: bool,
    },
    /// Transactional map; inserts published at commit unless fast-forward.
    Transactional {
        store: TransactionalStore,
        fast_forward: bool,
    },
    /// Concurrent hash map.
    Concurrent,
    /// Single-lock map.
    Plain,
}

impl MapStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MapStrategy::Expiring { .. } => "expiring",
            MapStrategy::Transactional {
                store: TransactionalStore::CopyOnWrite,
                ..
            } => "transactional-copy-on-write",
            MapStrategy::Transactional {
                store: TransactionalStore::Concurrent,
                ..
            } => "transactional-concurrent",
            MapStrategy::Concurrent => "concurrent",
            MapStrategy::Plain => "plain",
        }
    }

    /// Construct the backing map. `singleton` sizes the plain map for one
    /// entry.
    pub fn create_map<K: CacheKey, V: CacheValue>(&self, singleton: bool) -> Arc<dyn BackingMap<K, V>> {
        match *self {
            MapStrategy::Expiring {
                time_to_live,
                size_bound,
                touch_on_get,
            } => Arc::new(ExpiringMap::new(time_to_live, size_bound, touch_on_get)),
            MapStrategy::Transactional {
                store,
                fast_forward,
            } => Arc::new(TransactionalMap::new(store, fast_forward)),
            MapStrategy::Concurrent => Arc::new(ConcurrentMap::new()),
            MapStrategy::Plain if singleton => Arc::new(PlainMap::with_capacity(1)),
            MapStrategy::Plain => Arc::new(PlainMap::new()),
        }
    }
}

impl fmt::Display for MapStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What `build` does when the cache id is already registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Fail with [`Error::CacheAlreadyExists`].
    Throw,
    /// Overwrite the registered cache.
    Replace,
    /// Return the registered cache instead of building a new one.
    CreateIfAbsent,
}

// =============================================================================
// Builder
// =============================================================================

/// Declarative cache configuration.
pub struct CacheBuilder<K: CacheKey, V: CacheValue> {
    cache_id: Option<String>,
    label_supplier: Option<LabelSupplier>,
    resolver: Option<Arc<dyn ValueResolver<K, V>>>,
    shared: bool,
    thread_safe: bool,
    transactional: bool,
    transactional_fast_forward: bool,
    singleton: bool,
    time_to_live: Option<Duration>,
    touch_on_get: bool,
    size_bound: Option<NonZeroUsize>,
    max_concurrent_resolve: Option<NonZeroUsize>,
    throw_if_exists: bool,
    replace_if_exists: bool,
    invalidation_channel: Option<Arc<dyn InvalidationChannel<K, V>>>,
    custom_wrappers: Vec<CustomWrapper<K, V>>,
}

impl<K: CacheKey, V: CacheValue> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self {
            cache_id: None,
            label_supplier: None,
            resolver: None,
            shared: false,
            thread_safe: true,
            transactional: false,
            transactional_fast_forward: false,
            singleton: false,
            time_to_live: None,
            touch_on_get: false,
            size_bound: None,
            max_concurrent_resolve: None,
            throw_if_exists: true,
            replace_if_exists: false,
            invalidation_channel: None,
            custom_wrappers: Vec::new(),
        }
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for CacheBuilder<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("cache_id", &self.cache_id)
            .field("has_resolver", &self.resolver.is_some())
            .field("strategy", &self.map_strategy())
            .field("max_concurrent_resolve", &self.max_concurrent_resolve)
            .field("collision_policy", &self.collision_policy())
            .field("custom_wrappers", &self.custom_wrappers)
            .finish()
    }
}

impl<K: CacheKey, V: CacheValue> CacheBuilder<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_id(mut self, cache_id: impl Into<String>) -> Self {
        self.cache_id = Some(cache_id.into());
        self
    }

    pub fn with_label_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.label_supplier = Some(Arc::new(supplier));
        self
    }

    pub fn with_value_resolver<R>(mut self, resolver: R) -> Self
    where
        R: ValueResolver<K, V> + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_shared_value_resolver(mut self, resolver: Arc<dyn ValueResolver<K, V>>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_resolve_fn<F>(self, resolve: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>> + Send + Sync + 'static,
    {
        self.with_value_resolver(FnResolver::new(resolve))
    }

    /// Mark the cache as visible to both tiers of a client/server split.
    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn with_thread_safe(mut self, thread_safe: bool) -> Self {
        self.thread_safe = thread_safe;
        self
    }

    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn with_transactional_fast_forward(mut self, fast_forward: bool) -> Self {
        self.transactional_fast_forward = fast_forward;
        self
    }

    /// Hint that the cache holds at most one entry.
    pub fn with_singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    /// Expire entries `time_to_live` after insertion, or after the last read
    /// when `touch_on_get` is set. A zero time-to-live still selects the
    /// expiring map but disables time-based expiry.
    pub fn with_time_to_live(mut self, time_to_live: Duration, touch_on_get: bool) -> Self {
        self.time_to_live = Some(time_to_live);
        self.touch_on_get = touch_on_get;
        self
    }

    /// Approximate LRU target size. Not enforced strictly.
    pub fn with_size_bound(mut self, size_bound: usize) -> Result<Self> {
        let bound = NonZeroUsize::new(size_bound).ok_or(Error::InvalidSizeBound { value: 0 })?;
        self.size_bound = Some(bound);
        Ok(self)
    }

    pub fn with_max_concurrent_resolve(mut self, max: usize) -> Result<Self> {
        let max = NonZeroUsize::new(max).ok_or(Error::InvalidMaxConcurrentResolve { value: 0 })?;
        self.max_concurrent_resolve = Some(max);
        Ok(self)
    }

    pub fn with_throw_if_exists(mut self, throw_if_exists: bool) -> Self {
        self.throw_if_exists = throw_if_exists;
        self
    }

    pub fn with_replace_if_exists(mut self, replace_if_exists: bool) -> Self {
        self.replace_if_exists = replace_if_exists;
        self
    }

    /// Publish propagated invalidations to `channel`.
    pub fn with_invalidation_channel(mut self, channel: Arc<dyn InvalidationChannel<K, V>>) -> Self {
        self.invalidation_channel = Some(channel);
        self
    }

    /// Append a wrapper to the chain. Wrappers are applied in registration
    /// order after the built-in ones.
    pub fn with_additional_custom_wrapper<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Arc<dyn Cache<K, V>>) -> Result<Arc<dyn Cache<K, V>>> + Send + Sync + 'static,
    {
        let factory: WrapperFactory<K, V> = Arc::new(factory);
        self.custom_wrappers.push(CustomWrapper::new(name, factory));
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn cache_id(&self) -> Option<&str> {
        self.cache_id.as_deref()
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    pub fn max_concurrent_resolve(&self) -> Option<usize> {
        self.max_concurrent_resolve.map(NonZeroUsize::get)
    }

    pub fn custom_wrappers(&self) -> &[CustomWrapper<K, V>] {
        &self.custom_wrappers
    }

    pub fn collision_policy(&self) -> CollisionPolicy {
        if self.replace_if_exists {
            CollisionPolicy::Replace
        } else if self.throw_if_exists {
            CollisionPolicy::Throw
        } else {
            CollisionPolicy::CreateIfAbsent
        }
    }

    /// Backing map selection, in priority order: expiring, transactional,
    /// concurrent, plain. A size bound always enables touch-on-get because
    /// LRU eviction needs access tracking.
    pub fn map_strategy(&self) -> MapStrategy {
        if self.size_bound.is_some() || self.time_to_live.is_some() {
            return MapStrategy::Expiring {
                time_to_live: self.time_to_live,
                size_bound: self.size_bound,
                touch_on_get: self.touch_on_get || self.size_bound.is_some(),
            };
        }
        if self.transactional {
            let store = if self.transactional_fast_forward && !self.singleton {
                TransactionalStore::Concurrent
            } else {
                TransactionalStore::CopyOnWrite
            };
            return MapStrategy::Transactional {
                store,
                fast_forward: self.transactional_fast_forward,
            };
        }
        if self.thread_safe {
            MapStrategy::Concurrent
        } else {
            MapStrategy::Plain
        }
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Build the cache and register it in `registry`.
    pub fn build(&self, registry: &CacheRegistry) -> Result<Arc<dyn Cache<K, V>>> {
        let cache_id = match self.cache_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(Error::MissingCacheId),
        };
        let resolver = self
            .resolver
            .clone()
            .ok_or_else(|| Error::MissingValueResolver {
                cache_id: cache_id.clone(),
            })?;

        let policy = self.collision_policy();
        if policy == CollisionPolicy::CreateIfAbsent {
            if let Some(existing) = registry.opt::<K, V>(&cache_id) {
                debug!(cache_id = %cache_id, "Returning existing cache");
                return Ok(existing);
            }
        }

        let strategy = self.map_strategy();
        let map = strategy.create_map::<K, V>(self.singleton);
        let mut basic = BasicCache::new(cache_id.clone(), resolver, map);
        if let Some(supplier) = &self.label_supplier {
            basic = basic.with_label_supplier(Arc::clone(supplier));
        }
        let cache = self.add_wrappers(Arc::new(basic))?;

        let cache = match policy {
            CollisionPolicy::Throw => {
                registry.register(Arc::clone(&cache))?;
                log_event(&CacheEvent::cache_registered(&cache_id, strategy.name()));
                cache
            }
            CollisionPolicy::Replace => {
                let event = if registry.register_and_replace(Arc::clone(&cache)) {
                    CacheEvent::cache_replaced(&cache_id, strategy.name())
                } else {
                    CacheEvent::cache_registered(&cache_id, strategy.name())
                };
                log_event(&event);
                cache
            }
            CollisionPolicy::CreateIfAbsent => registry.register_if_absent(cache)?,
        };

        info!(
            cache_id = %cache_id,
            strategy = %strategy,
            shared = self.shared,
            bounded = self.max_concurrent_resolve.is_some(),
            wrappers = self.custom_wrappers.len(),
            "Cache built"
        );
        Ok(cache)
    }

    fn add_wrappers(&self, cache: Arc<dyn Cache<K, V>>) -> Result<Arc<dyn Cache<K, V>>> {
        let mut cache = cache;

        if let Some(max) = self.max_concurrent_resolve {
            cache = BoundedResolveCacheWrapper::new(cache, max.get()).into_cache();
        }

        if let Some(channel) = &self.invalidation_channel {
            cache = InvalidationNotifyingCacheWrapper::new(cache, Arc::clone(channel)).into_cache();
        }

        for wrapper in &self.custom_wrappers {
            cache = wrapper.apply(cache).map_err(|err| match err {
                Error::WrapperConstruction { .. } => err,
                other => Error::WrapperConstruction {
                    wrapper: wrapper.name().to_string(),
                    reason: other.to_string(),
                },
            })?;
        }

        Ok(cache)
    }
}

fn log_event(event: &CacheEvent) {
    match serde_json::to_string(event) {
        Ok(json) => debug!(event_type = event.event_type(), "{}", json),
        Err(err) => debug!(event_type = event.event_type(), error = %err, "Failed to serialize event"),
    }
}
