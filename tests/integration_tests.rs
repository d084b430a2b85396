//! memocache Integration Tests
//!
//! Covers the public surface end to end:
//! - Resolve-on-miss and invalidation through built caches
//! - Bounded concurrent resolution
//! - Registry collision policies
//! - Backing-map strategies (expiring, transactional)
//! - Invalidation propagation (channels, cluster transport)
//! - Declarative settings and Prometheus exposition

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use crossbeam::channel::unbounded;

use memocache::cache::builder::MapStrategy;
use memocache::{Cache, CacheBuilder, CacheRegistry, EntryFilter, Error, Result, ValueResolver};

fn v_resolver(key: &u32) -> Result<Option<String>> {
    Ok(Some(format!("v{}", key)))
}

// =============================================================================
// Resolve and Invalidate Tests
// =============================================================================

mod resolve_tests {
    use super::*;

    #[test]
    fn test_end_to_end_scenario() {
        let registry = CacheRegistry::new();
        let cache = CacheBuilder::<u32, String>::new()
            .with_cache_id("e2e")
            .with_resolve_fn(v_resolver)
            .with_max_concurrent_resolve(2)
            .unwrap()
            .build(&registry)
            .unwrap();

        let all = cache.get_all(&[1, 2, 3]).unwrap();
        let expected: HashMap<u32, String> = [(1, "v1"), (2, "v2"), (3, "v3")]
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        assert_eq!(all, expected);

        cache.invalidate(&EntryFilter::keys([2]), false);
        assert_eq!(cache.cached_value(&2), None);
        assert_eq!(cache.cached_value(&1), Some("v1".to_string()));
        assert_eq!(cache.cached_value(&3), Some("v3".to_string()));

        assert_eq!(cache.get(&2).unwrap(), Some("v2".to_string()));
        assert_eq!(cache.cached_value(&2), Some("v2".to_string()));
    }

    #[test]
    fn test_concurrent_misses_converge() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CacheRegistry::new();
        let cache = {
            let calls = Arc::clone(&calls);
            CacheBuilder::<u32, usize>::new()
                .with_cache_id("converge")
                .with_resolve_fn(move |_key: &u32| {
                    // Every invocation produces a distinct value
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    Ok(Some(n))
                })
                .build(&registry)
                .unwrap()
        };

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get(&7).unwrap().unwrap()
                })
            })
            .collect();
        let results: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let retained = cache.cached_value(&7).unwrap();
        assert!(results.iter().all(|r| *r == retained));
        assert!(calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(cache.cache_map().len(), 1);
    }

    #[test]
    fn test_absent_values_not_cached() {
        let registry = CacheRegistry::new();
        let cache = CacheBuilder::<u32, String>::new()
            .with_cache_id("absent")
            .with_resolve_fn(|key: &u32| Ok((*key % 2 == 0).then(|| format!("v{}", key))))
            .build(&registry)
            .unwrap();

        assert_eq!(cache.get(&1).unwrap(), None);
        let all = cache.get_all(&[1, 2, 3, 4, 4]).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key(&2) && all.contains_key(&4));
        assert_eq!(cache.cached_value(&1), None);
        assert_eq!(cache.metrics().absent_resolves, 3);
    }

    #[test]
    fn test_resolver_error_propagates() {
        let registry = CacheRegistry::new();
        let cache = CacheBuilder::<u32, String>::new()
            .with_cache_id("failing")
            .with_resolve_fn(|_key: &u32| {
                Err(Error::resolver(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "backend timed out",
                )))
            })
            .build(&registry)
            .unwrap();

        assert_matches!(cache.get(&1), Err(Error::Resolver(_)));
        assert_matches!(cache.get_all(&[1, 2]), Err(Error::Resolver(_)));
        assert!(cache.cache_map().is_empty());
        assert_eq!(cache.metrics().resolve_errors, 2);
    }

    #[test]
    fn test_invalidate_all_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CacheRegistry::new();
        let cache = {
            let calls = Arc::clone(&calls);
            CacheBuilder::<u32, String>::new()
                .with_cache_id("idempotent")
                .with_resolve_fn(move |key: &u32| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    v_resolver(key)
                })
                .build(&registry)
                .unwrap()
        };

        cache.get_all(&[1, 2]).unwrap();
        cache.invalidate(&EntryFilter::all(), false);
        assert!(cache.cache_map().is_empty());
        cache.invalidate(&EntryFilter::all(), false);
        assert!(cache.cache_map().is_empty());

        cache.get(&1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_key_set_invalidation_is_precise() {
        let registry = CacheRegistry::new();
        let cache = CacheBuilder::<u32, String>::new()
            .with_cache_id("precise")
            .with_resolve_fn(v_resolver)
            .build(&registry)
            .unwrap();

        cache.get_all(&[1, 2, 3, 4]).unwrap();
        // 9 was never cached
        cache.invalidate(&EntryFilter::keys([1, 2, 9]), false);

        let mut remaining: Vec<u32> = cache.cache_map().into_keys().collect();
        remaining.sort();
        assert_eq!(remaining, vec![3, 4]);
    }

    #[test]
    fn test_custom_filter_invalidation() {
        let registry = CacheRegistry::new();
        let cache = CacheBuilder::<u32, String>::new()
            .with_cache_id("custom")
            .with_resolve_fn(v_resolver)
            .build(&registry)
            .unwrap();

        cache.get_all(&[1, 2, 3, 4]).unwrap();
        cache.invalidate(
            &EntryFilter::predicate("odd", |key: &u32, _value: &String| key % 2 == 1),
            false,
        );

        let view = cache.unmodifiable_view();
        assert!(!view.contains_key(&1));
        assert!(view.contains_key(&2));
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_over_delivering_batch_resolver() {
        struct Prefetching;

        impl ValueResolver<u32, String> for Prefetching {
            fn resolve(&self, key: &u32) -> Result<Option<String>> {
                v_resolver(key)
            }

            fn resolve_all(&self, keys: &HashSet<u32>) -> Result<HashMap<u32, Option<String>>> {
                let mut resolved: HashMap<u32, Option<String>> =
                    keys.iter().map(|k| (*k, Some(format!("v{}", k)))).collect();
                resolved.insert(100, Some("v100".to_string()));
                Ok(resolved)
            }
        }

        let registry = CacheRegistry::new();
        let cache = CacheBuilder::<u32, String>::new()
            .with_cache_id("prefetch")
            .with_value_resolver(Prefetching)
            .build(&registry)
            .unwrap();

        let all = cache.get_all(&[1]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(cache.cached_value(&100), Some("v100".to_string()));
    }

    #[test]
    fn test_label_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CacheRegistry::new();

        let unlabeled = CacheBuilder::<u32, String>::new()
            .with_cache_id("unlabeled")
            .with_resolve_fn(v_resolver)
            .build(&registry)
            .unwrap();
        assert_eq!(unlabeled.label(), None);

        let labeled = {
            let calls = Arc::clone(&calls);
            CacheBuilder::<u32, String>::new()
                .with_cache_id("labeled")
                .with_resolve_fn(v_resolver)
                .with_label_supplier(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "Country codes".to_string()
                })
                .build(&registry)
                .unwrap()
        };
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(labeled.label(), Some("Country codes"));
        assert_eq!(labeled.label(), Some("Country codes"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

// =============================================================================
// Bounded Resolve Tests
// =============================================================================

mod bounded_tests {
    use super::*;
    use memocache::cache::maps::ConcurrentMap;
    use memocache::cache::{BoundedResolveCacheWrapper, WrappedCache};
    use memocache::{BasicCache, FnResolver};

    #[test]
    fn test_second_resolve_starts_after_first_completes() {
        let (entered_tx, entered_rx) = unbounded::<u32>();
        let (release_tx, release_rx) = unbounded::<()>();
        let events = Arc::new(Mutex::new(Vec::new()));

        let registry = CacheRegistry::new();
        let cache = {
            let events = Arc::clone(&events);
            CacheBuilder::<u32, String>::new()
                .with_cache_id("one-at-a-time")
                .with_resolve_fn(move |key: &u32| {
                    if *key == 0 {
                        return v_resolver(key);
                    }
                    events.lock().unwrap().push(format!("enter {}", key));
                    entered_tx.send(*key).unwrap();
                    release_rx.recv().unwrap();
                    events.lock().unwrap().push(format!("exit {}", key));
                    v_resolver(key)
                })
                .with_max_concurrent_resolve(1)
                .unwrap()
                .build(&registry)
                .unwrap()
        };
        cache.get(&0).unwrap();

        let first = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(&1).unwrap())
        };
        assert_eq!(entered_rx.recv().unwrap(), 1);

        let second = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(&2).unwrap())
        };
        assert!(entered_rx.recv_timeout(Duration::from_millis(100)).is_err());

        // Cached keys bypass the bound while the permit is held
        assert_eq!(cache.get(&0).unwrap(), Some("v0".to_string()));
        assert_eq!(cache.get_all(&[0]).unwrap().len(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(entered_rx.recv().unwrap(), 2);
        release_tx.send(()).unwrap();

        assert_eq!(first.join().unwrap(), Some("v1".to_string()));
        assert_eq!(second.join().unwrap(), Some("v2".to_string()));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["enter 1", "exit 1", "enter 2", "exit 2"]
        );
        assert_eq!(cache.metrics().permit_waits, 1);
    }

    #[test]
    fn test_interrupted_wait_proceeds_without_permit() {
        let (entered_tx, entered_rx) = unbounded::<u32>();
        let (release_tx, release_rx) = unbounded::<()>();

        let resolver = FnResolver::new(move |key: &u32| {
            if *key == 1 {
                entered_tx.send(*key).unwrap();
                release_rx.recv().unwrap();
            }
            Ok(Some(*key))
        });
        let basic: Arc<dyn Cache<u32, u32>> = Arc::new(BasicCache::new(
            "interruptible",
            Arc::new(resolver),
            Arc::new(ConcurrentMap::new()),
        ));
        let bounded = Arc::new(WrappedCache::new(BoundedResolveCacheWrapper::new(basic, 1)));

        let holder = {
            let bounded = Arc::clone(&bounded);
            thread::spawn(move || bounded.get(&1).unwrap())
        };
        entered_rx.recv().unwrap();

        let waiter = {
            let bounded = Arc::clone(&bounded);
            thread::spawn(move || bounded.get(&2).unwrap())
        };
        while bounded.inner().permits().waits() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        bounded.inner().permits().interrupt_waiters();
        assert_eq!(waiter.join().unwrap(), Some(2));
        assert_eq!(bounded.metrics().permit_bypasses, 1);

        release_tx.send(()).unwrap();
        assert_eq!(holder.join().unwrap(), Some(1));
        assert_eq!(bounded.inner().permits().available(), 1);
    }
}

// =============================================================================
// Custom Wrapper Tests
// =============================================================================

mod wrapper_tests {
    use super::*;
    use crossbeam::channel::Sender;
    use memocache::cache::CacheWrapper;

    /// Records every `get` on entry and every invalidation's propagate flag.
    struct AuditingCacheWrapper {
        delegate: Arc<dyn Cache<u32, String>>,
        entered: Sender<u32>,
        invalidations: Arc<Mutex<Vec<bool>>>,
    }

    impl CacheWrapper<u32, String> for AuditingCacheWrapper {
        fn delegate(&self) -> &Arc<dyn Cache<u32, String>> {
            &self.delegate
        }

        fn get(&self, key: &u32) -> Result<Option<String>> {
            let _ = self.entered.send(*key);
            self.delegate.get(key)
        }

        fn invalidate(&self, filter: &EntryFilter<u32, String>, propagate: bool) {
            self.invalidations.lock().unwrap().push(propagate);
            self.delegate.invalidate(filter, propagate);
        }
    }

    #[test]
    fn test_custom_wrapper_intercepts_outside_bounded_resolve() {
        let (entered_tx, entered_rx) = unbounded::<u32>();
        let (resolving_tx, resolving_rx) = unbounded::<u32>();
        let (release_tx, release_rx) = unbounded::<()>();
        let invalidations = Arc::new(Mutex::new(Vec::new()));

        let registry = CacheRegistry::new();
        let cache = {
            let invalidations = Arc::clone(&invalidations);
            CacheBuilder::<u32, String>::new()
                .with_cache_id("audited")
                .with_resolve_fn(move |key: &u32| {
                    resolving_tx.send(*key).unwrap();
                    let _ = release_rx.recv();
                    v_resolver(key)
                })
                .with_max_concurrent_resolve(1)
                .unwrap()
                .with_additional_custom_wrapper("audit", move |inner: Arc<dyn Cache<u32, String>>| {
                    let wrapper = AuditingCacheWrapper {
                        delegate: inner,
                        entered: entered_tx.clone(),
                        invalidations: Arc::clone(&invalidations),
                    };
                    Ok(wrapper.into_cache())
                })
                .build(&registry)
                .unwrap()
        };
        assert_eq!(cache.cache_id(), "audited");

        let first = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(&1))
        };
        assert_eq!(entered_rx.recv().unwrap(), 1);
        assert_eq!(resolving_rx.recv().unwrap(), 1);

        // The custom wrapper sees the call before the bounded wrapper parks it
        let second = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(&2))
        };
        assert_eq!(entered_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        assert!(resolving_rx.recv_timeout(Duration::from_millis(50)).is_err());

        drop(release_tx);
        assert_eq!(first.join().unwrap().unwrap(), Some("v1".to_string()));
        assert_eq!(second.join().unwrap().unwrap(), Some("v2".to_string()));
        assert_eq!(resolving_rx.recv().unwrap(), 2);

        cache.invalidate(&EntryFilter::key(1), true);
        cache.invalidate(&EntryFilter::all(), false);
        assert_eq!(*invalidations.lock().unwrap(), vec![true, false]);
        assert!(cache.cache_map().is_empty());
        assert_eq!(cache.metrics().permit_waits, 1);
    }
}

// =============================================================================
// Registry Tests
// =============================================================================

mod registry_tests {
    use super::*;

    fn builder(id: &str) -> CacheBuilder<u32, String> {
        CacheBuilder::new().with_cache_id(id).with_resolve_fn(v_resolver)
    }

    #[test]
    fn test_collision_policies_through_builder() {
        let registry = CacheRegistry::new();
        let original = builder("codes").build(&registry).unwrap();

        let err = builder("codes").build(&registry).unwrap_err();
        assert_matches!(err, Error::CacheAlreadyExists { .. });
        assert!(err.is_config());

        let replacement = builder("codes")
            .with_replace_if_exists(true)
            .build(&registry)
            .unwrap();
        let found = registry.get::<u32, String>("codes").unwrap();
        assert!(Arc::ptr_eq(&found, &replacement));
        assert!(!Arc::ptr_eq(&found, &original));
    }

    #[test]
    fn test_create_if_absent_race_returns_one_instance() {
        let registry = Arc::new(CacheRegistry::new());
        let barrier = Arc::new(Barrier::new(6));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    builder("raced")
                        .with_throw_if_exists(false)
                        .build(&registry)
                        .unwrap()
                })
            })
            .collect();

        let caches: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for cache in &caches {
            assert!(Arc::ptr_eq(cache, &caches[0]));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_by_id() {
        let registry = CacheRegistry::new();
        let cache = builder("lookup").build(&registry).unwrap();
        cache.get(&1).unwrap();

        let found = registry.opt::<u32, String>("lookup").unwrap();
        assert_eq!(found.cached_value(&1), Some("v1".to_string()));
        assert!(registry.opt::<u32, String>("nope").is_none());
        assert_matches!(
            registry.get::<u32, String>("nope"),
            Err(Error::CacheNotFound { .. })
        );
        assert_eq!(registry.erased("lookup").unwrap().len(), 1);
    }
}

// =============================================================================
// Backing Map Strategy Tests
// =============================================================================

mod strategy_tests {
    use super::*;
    use memocache::cache::maps::TransactionalStore;
    use memocache::run_in_transaction;

    #[test]
    fn test_size_bound_forces_touch_on_get() {
        let registry = CacheRegistry::new();
        let builder = CacheBuilder::<u32, String>::new()
            .with_cache_id("lru")
            .with_resolve_fn(v_resolver)
            .with_time_to_live(Duration::from_secs(60), false)
            .with_size_bound(2)
            .unwrap();
        assert_matches!(
            builder.map_strategy(),
            MapStrategy::Expiring { touch_on_get: true, .. }
        );

        let cache = builder.build(&registry).unwrap();
        cache.get(&1).unwrap();
        cache.get(&2).unwrap();
        // Reading 1 refreshes it, so 2 is the eviction candidate
        cache.get(&1).unwrap();
        cache.get(&3).unwrap();

        assert!(cache.cached_value(&1).is_some());
        assert!(cache.cached_value(&2).is_none());
        assert!(cache.cached_value(&3).is_some());
        assert_eq!(cache.metrics().strategy, "expiring");
    }

    #[test]
    fn test_time_to_live_expires_entries() {
        let registry = CacheRegistry::new();
        let cache = CacheBuilder::<u32, String>::new()
            .with_cache_id("ttl")
            .with_resolve_fn(v_resolver)
            .with_time_to_live(Duration::from_millis(30), false)
            .build(&registry)
            .unwrap();

        cache.get(&1).unwrap();
        assert!(cache.cached_value(&1).is_some());
        thread::sleep(Duration::from_millis(60));
        assert!(cache.cached_value(&1).is_none());
    }

    #[test]
    fn test_plain_strategy_when_not_thread_safe() {
        let registry = CacheRegistry::new();
        let cache = CacheBuilder::<u32, String>::new()
            .with_cache_id("plain")
            .with_resolve_fn(v_resolver)
            .with_thread_safe(false)
            .with_singleton(true)
            .build(&registry)
            .unwrap();
        cache.get(&1).unwrap();
        assert_eq!(cache.metrics().strategy, "plain");
    }

    fn transactional(id: &str, fast_forward: bool) -> CacheBuilder<u32, String> {
        CacheBuilder::new()
            .with_cache_id(id)
            .with_resolve_fn(v_resolver)
            .with_transactional(true)
            .with_transactional_fast_forward(fast_forward)
    }

    #[test]
    fn test_transactional_inserts_published_at_commit() {
        let registry = CacheRegistry::new();
        let builder = transactional("tx-cow", false);
        assert_eq!(
            builder.map_strategy(),
            MapStrategy::Transactional {
                store: TransactionalStore::CopyOnWrite,
                fast_forward: false
            }
        );
        let cache = builder.build(&registry).unwrap();

        run_in_transaction(|| -> Result<()> {
            assert_eq!(cache.get(&1)?, Some("v1".to_string()));
            let other = Arc::clone(&cache);
            let seen = thread::spawn(move || other.cached_value(&1)).join().unwrap();
            assert_eq!(seen, None);
            Ok(())
        })
        .unwrap();

        assert_eq!(cache.cached_value(&1), Some("v1".to_string()));
    }

    #[test]
    fn test_transactional_rollback_discards_inserts() {
        let registry = CacheRegistry::new();
        let cache = transactional("tx-rollback", false)
            .build(&registry)
            .unwrap();

        let result = run_in_transaction(|| -> Result<()> {
            cache.get(&1)?;
            Err(Error::Resolve("abort".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(cache.cached_value(&1), None);
    }

    #[test]
    fn test_invalidate_during_resolve_drops_stale_insert() {
        let registry = CacheRegistry::new();
        let slot: Arc<OnceLock<Arc<dyn Cache<u32, String>>>> = Arc::new(OnceLock::new());
        let invalidated = Arc::new(AtomicBool::new(false));

        let cache = {
            let slot = Arc::clone(&slot);
            let invalidated = Arc::clone(&invalidated);
            CacheBuilder::<u32, String>::new()
                .with_cache_id("tx-stale")
                .with_resolve_fn(move |key: &u32| {
                    // A concurrent transaction invalidates the key mid-resolve
                    if !invalidated.swap(true, Ordering::SeqCst) {
                        let other = Arc::clone(slot.get().unwrap());
                        let key = *key;
                        thread::spawn(move || {
                            run_in_transaction(|| -> Result<()> {
                                other.invalidate(&EntryFilter::key(key), false);
                                Ok(())
                            })
                        })
                        .join()
                        .unwrap()?;
                    }
                    Ok(Some("stale".to_string()))
                })
                .with_transactional(true)
                .with_transactional_fast_forward(true)
                .build(&registry)
                .unwrap()
        };
        assert!(slot.set(Arc::clone(&cache)).is_ok());

        run_in_transaction(|| -> Result<()> {
            assert_eq!(cache.get(&1)?, Some("stale".to_string()));
            Ok(())
        })
        .unwrap();

        // Neither fast-forwarded nor committed
        assert_eq!(cache.cached_value(&1), None);
        assert!(cache.metrics().dirty_marks >= 1);
    }

    #[test]
    fn test_reading_transaction_sees_committed_values() {
        let registry = CacheRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = {
            let calls = Arc::clone(&calls);
            CacheBuilder::<u32, String>::new()
                .with_cache_id("tx-reader")
                .with_resolve_fn(move |key: &u32| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    v_resolver(key)
                })
                .with_transactional(true)
                .with_transactional_fast_forward(true)
                .build(&registry)
                .unwrap()
        };

        run_in_transaction(|| -> Result<()> {
            // Joins the transaction and fast-forwards key 1
            cache.get(&1)?;

            let other = Arc::clone(&cache);
            thread::spawn(move || other.get(&2)).join().unwrap()?;

            assert_eq!(cache.get(&2)?, Some("v2".to_string()));
            Ok(())
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.cached_value(&1), Some("v1".to_string()));
    }
}

// =============================================================================
// Transaction Tests
// =============================================================================

mod transaction_tests {
    use super::*;
    use memocache::run_in_transaction;

    type ResolveFn = Arc<dyn Fn(&u32) -> String + Send + Sync>;

    /// Resolver whose behavior can be swapped while a resolve is running,
    /// standing in for a data source that changes underneath the cache.
    #[derive(Clone)]
    struct SwappableResolver {
        current: Arc<Mutex<ResolveFn>>,
    }

    impl SwappableResolver {
        fn new(resolve: impl Fn(&u32) -> String + Send + Sync + 'static) -> Self {
            Self {
                current: Arc::new(Mutex::new(Arc::new(resolve))),
            }
        }

        fn set(&self, resolve: impl Fn(&u32) -> String + Send + Sync + 'static) -> ResolveFn {
            std::mem::replace(&mut *self.current.lock().unwrap(), Arc::new(resolve))
        }

        fn restore(&self, previous: ResolveFn) {
            *self.current.lock().unwrap() = previous;
        }

        fn resolve(&self, key: &u32) -> Result<Option<String>> {
            let resolve = Arc::clone(&*self.current.lock().unwrap());
            Ok(Some(resolve(key)))
        }
    }

    fn transactional_cache(
        id: &str,
        fast_forward: bool,
        resolver: &SwappableResolver,
        registry: &CacheRegistry,
    ) -> Arc<dyn Cache<u32, String>> {
        let resolver = resolver.clone();
        CacheBuilder::new()
            .with_cache_id(id)
            .with_resolve_fn(move |key: &u32| resolver.resolve(key))
            .with_transactional(true)
            .with_transactional_fast_forward(fast_forward)
            .build(registry)
            .unwrap()
    }

    fn in_tx<T>(f: impl FnOnce() -> Result<T>) -> T {
        run_in_transaction(f).unwrap()
    }

    fn load(cache: &Arc<dyn Cache<u32, String>>, batch: Option<&[u32]>) -> Result<Option<String>> {
        match batch {
            Some(keys) => Ok(cache.get_all(keys)?.remove(&1)),
            None => cache.get(&1),
        }
    }

    fn invalidation_filter(all: bool) -> EntryFilter<u32, String> {
        if all {
            EntryFilter::all()
        } else {
            EntryFilter::key(1)
        }
    }

    fn blocking_old_values(
        resolver: &SwappableResolver,
    ) -> (crossbeam::channel::Receiver<u32>, crossbeam::channel::Sender<()>) {
        let (started_tx, started_rx) = unbounded::<u32>();
        let (release_tx, release_rx) = unbounded::<()>();
        resolver.set(move |key: &u32| {
            let _ = started_tx.send(*key);
            // Returns once the sender is dropped
            let _ = release_rx.recv();
            format!("oldValue_{}", key)
        });
        (started_rx, release_tx)
    }

    fn assert_new_values_only(cache: &Arc<dyn Cache<u32, String>>, batch: bool, case: &str) {
        let batch_keys: &[u32] = &[1, 4, 5];
        let value = in_tx(|| load(cache, batch.then_some(batch_keys)));
        assert_eq!(value.as_deref(), Some("newValue_1"), "{}", case);
        for key in 2..=5u32 {
            assert_eq!(
                in_tx(|| cache.get(&key)),
                Some(format!("newValue_{}", key)),
                "{}",
                case
            );
        }
    }

    fn cases() -> Vec<(bool, bool, bool, bool)> {
        let mut cases = Vec::new();
        for fast_forward in [true, false] {
            for second_load in [false, true] {
                for invalidate_all in [false, true] {
                    for batch in [false, true] {
                        cases.push((fast_forward, second_load, invalidate_all, batch));
                    }
                }
            }
        }
        cases
    }

    fn invalidate_during_resolve(fast_forward: bool, second_load: bool, invalidate_all: bool, batch: bool) {
        let case = format!(
            "fast_forward={} second_load={} invalidate_all={} batch={}",
            fast_forward, second_load, invalidate_all, batch
        );
        let registry = CacheRegistry::new();
        let resolver = SwappableResolver::new(|key: &u32| format!("oldValue_{}", key));
        let cache = transactional_cache("tx-during", fast_forward, &resolver, &registry);
        let (started_rx, release_tx) = blocking_old_values(&resolver);

        let loader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let batch_keys: &[u32] = &[1, 3, 5];
                run_in_transaction(|| load(&cache, batch.then_some(batch_keys)))
            })
        };
        started_rx.recv().unwrap();

        // The source changes and the writing transaction invalidates
        resolver.set(|key: &u32| format!("newValue_{}", key));
        in_tx(|| {
            cache.invalidate(&invalidation_filter(invalidate_all), true);
            Ok(())
        });

        if second_load {
            let batch_keys: &[u32] = &[1, 2, 3];
            let value = in_tx(|| load(&cache, batch.then_some(batch_keys)));
            assert_eq!(value.as_deref(), Some("newValue_1"), "{}", case);
        }

        drop(release_tx);
        loader.join().unwrap().unwrap();

        assert_new_values_only(&cache, batch, &case);
    }

    fn invalidate_before_and_during_resolve(
        fast_forward: bool,
        second_load: bool,
        invalidate_all: bool,
        batch: bool,
    ) {
        let case = format!(
            "fast_forward={} second_load={} invalidate_all={} batch={}",
            fast_forward, second_load, invalidate_all, batch
        );
        let registry = CacheRegistry::new();
        let resolver = SwappableResolver::new(|key: &u32| format!("oldValue_{}", key));
        let cache = transactional_cache("tx-before", fast_forward, &resolver, &registry);

        // The writing transaction invalidates first and commits later
        let (invalidated_tx, invalidated_rx) = unbounded::<()>();
        let (commit_tx, commit_rx) = unbounded::<()>();
        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                run_in_transaction(|| -> Result<()> {
                    cache.invalidate(&invalidation_filter(invalidate_all), true);
                    invalidated_tx.send(()).unwrap();
                    let _ = commit_rx.recv();
                    Ok(())
                })
            })
        };
        invalidated_rx.recv().unwrap();

        let (started_rx, release_tx) = blocking_old_values(&resolver);
        let loader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let batch_keys: &[u32] = &[1, 3, 5];
                run_in_transaction(|| load(&cache, batch.then_some(batch_keys)))
            })
        };
        started_rx.recv().unwrap();

        resolver.set(|key: &u32| format!("newValue_{}", key));
        drop(commit_tx);
        writer.join().unwrap().unwrap();

        if second_load {
            let batch_keys: &[u32] = &[1, 2, 3];
            let value = in_tx(|| load(&cache, batch.then_some(batch_keys)));
            assert_eq!(value.as_deref(), Some("newValue_1"), "{}", case);
        }

        drop(release_tx);
        loader.join().unwrap().unwrap();

        assert_new_values_only(&cache, batch, &case);
    }

    #[test]
    fn test_invalidate_during_resolve_matrix() {
        for (fast_forward, second_load, invalidate_all, batch) in cases() {
            invalidate_during_resolve(fast_forward, second_load, invalidate_all, batch);
        }
    }

    #[test]
    fn test_invalidate_before_and_during_resolve_matrix() {
        for (fast_forward, second_load, invalidate_all, batch) in cases() {
            invalidate_before_and_during_resolve(fast_forward, second_load, invalidate_all, batch);
        }
    }

    #[test]
    fn test_transactional_invalidation_sequence() {
        for fast_forward in [true, false] {
            let registry = CacheRegistry::new();
            let resolver = SwappableResolver::new(|key: &u32| format!("value_{}", key));
            let cache = transactional_cache("tx-sequence", fast_forward, &resolver, &registry);

            assert_eq!(in_tx(|| cache.get(&1)), Some("value_1".to_string()));

            let mut expected: HashMap<u32, String> =
                (1..=3).map(|key| (key, format!("value_{}", key))).collect();
            assert_eq!(in_tx(|| cache.get_all(&[1, 2, 3])), expected);

            in_tx(|| {
                cache.invalidate(&EntryFilter::key(1), true);
                Ok(())
            });
            expected.remove(&1);
            assert_eq!(cache.cache_map(), expected);

            in_tx(|| {
                cache.invalidate(&EntryFilter::keys([1, 2]), true);
                Ok(())
            });
            expected.remove(&2);
            assert_eq!(cache.cache_map(), expected);

            assert_eq!(in_tx(|| cache.get(&2)), Some("value_2".to_string()));

            in_tx(|| {
                cache.invalidate(&EntryFilter::all(), true);
                Ok(())
            });
            assert!(cache.cache_map().is_empty());
        }
    }

    /// Reload inside a transaction that invalidated, with `value` as the
    /// source's current answer.
    fn reload(
        cache: &Arc<dyn Cache<u32, String>>,
        resolver: &SwappableResolver,
        value: &'static str,
    ) -> Result<Option<String>> {
        resolver.set(move |key: &u32| format!("{}_{}", value, key));
        cache.invalidate(&EntryFilter::all(), true);
        cache.get(&1)
    }

    #[test]
    fn test_dirty_inserts_are_not_fast_forwarded() {
        let registry = CacheRegistry::new();
        let resolver = SwappableResolver::new(|key: &u32| format!("val_A_{}", key));
        let cache = transactional_cache("tx-dirty", true, &resolver, &registry);

        assert_eq!(in_tx(|| cache.get(&1)), Some("val_A_1".to_string()));

        assert_eq!(
            in_tx(|| reload(&cache, &resolver, "val_AA")),
            Some("val_AA_1".to_string())
        );
        assert_eq!(in_tx(|| cache.get(&1)), Some("val_AA_1".to_string()));

        in_tx(|| {
            cache.invalidate(&EntryFilter::all(), true);
            Ok(())
        });
        assert_eq!(
            in_tx(|| reload(&cache, &resolver, "val_B")),
            Some("val_B_1".to_string())
        );
        assert_eq!(cache.cached_value(&1), Some("val_B_1".to_string()));
        assert_eq!(in_tx(|| cache.get(&1)), Some("val_B_1".to_string()));

        // Rolled back while the old value is still cached
        let rolled_back = run_in_transaction(|| -> Result<()> {
            let previous = resolver.set(|key: &u32| format!("val_C_{}", key));
            cache.invalidate(&EntryFilter::all(), true);
            assert_eq!(cache.get(&1)?, Some("val_C_1".to_string()));
            resolver.restore(previous);
            Err(Error::Resolve("rollback".to_string()))
        });
        assert!(rolled_back.is_err());
        assert_eq!(in_tx(|| cache.get(&1)), Some("val_B_1".to_string()));

        // Rolled back on an empty cache
        in_tx(|| {
            cache.invalidate(&EntryFilter::all(), true);
            Ok(())
        });
        let rolled_back = run_in_transaction(|| -> Result<()> {
            let previous = resolver.set(|key: &u32| format!("val_CC_{}", key));
            cache.invalidate(&EntryFilter::all(), true);
            assert_eq!(cache.get(&1)?, Some("val_CC_1".to_string()));
            resolver.restore(previous);
            Err(Error::Resolve("rollback".to_string()))
        });
        assert!(rolled_back.is_err());
        assert!(cache.cache_map().is_empty());
        assert_eq!(in_tx(|| cache.get(&1)), Some("val_B_1".to_string()));
    }

    #[test]
    fn test_reading_only_transaction_sees_current_values() {
        let registry = CacheRegistry::new();
        let resolver = SwappableResolver::new(|key: &u32| format!("val_A_{}", key));
        let cache = transactional_cache("tx-reading", true, &resolver, &registry);
        assert_eq!(in_tx(|| cache.get(&1)), Some("val_A_1".to_string()));

        let barrier = Arc::new(Barrier::new(2));
        let reader = {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                run_in_transaction(|| -> Result<_> {
                    let before = (cache.get(&1)?, cache.get(&2)?);
                    barrier.wait();
                    // Writer has committed
                    barrier.wait();
                    let after = (cache.get(&1)?, cache.get(&2)?);
                    Ok((before, after))
                })
            })
        };

        barrier.wait();
        let written = in_tx(|| {
            resolver.set(|key: &u32| format!("val_B_{}", key));
            cache.invalidate(&EntryFilter::all(), true);
            cache.get(&2)
        });
        assert_eq!(written, Some("val_B_2".to_string()));
        barrier.wait();

        let (before, after) = reader.join().unwrap().unwrap();
        assert_eq!(before, (Some("val_A_1".to_string()), Some("val_A_2".to_string())));
        assert_eq!(after, (Some("val_B_1".to_string()), Some("val_B_2".to_string())));
    }
}

// =============================================================================
// Propagation Tests
// =============================================================================

mod propagation_tests {
    use super::*;
    use memocache::adapters::{
        ClusterTransport, CoalescingInvalidationChannel, CompositeInvalidationChannel,
        InMemoryInvalidationCollector,
    };
    use memocache::cache::FilterKind;
    use memocache::InvalidationChannel;

    #[test]
    fn test_cluster_and_audit_fan_out() {
        let transport = ClusterTransport::<u32, String>::new();
        let node_a = transport.join(Arc::new(CacheRegistry::new()));
        let node_b = transport.join(Arc::new(CacheRegistry::new()));
        let audit = Arc::new(InMemoryInvalidationCollector::<u32, String>::new());

        let channel: Arc<dyn InvalidationChannel<u32, String>> = Arc::new(
            CompositeInvalidationChannel::new()
                .with_channel(node_a.channel())
                .with_channel(audit.clone()),
        );
        let cache_a = CacheBuilder::<u32, String>::new()
            .with_cache_id("countries")
            .with_resolve_fn(v_resolver)
            .with_invalidation_channel(channel)
            .build(node_a.registry())
            .unwrap();
        let cache_b = CacheBuilder::<u32, String>::new()
            .with_cache_id("countries")
            .with_resolve_fn(v_resolver)
            .with_invalidation_channel(node_b.channel())
            .build(node_b.registry())
            .unwrap();

        cache_a.get_all(&[1, 2, 3]).unwrap();
        cache_b.get_all(&[1, 2, 3]).unwrap();

        cache_a.invalidate(&EntryFilter::keys([1, 3]), true);
        assert_eq!(node_b.process_pending().unwrap(), 1);

        let mut left: Vec<u32> = cache_b.cache_map().into_keys().collect();
        left.sort();
        assert_eq!(left, vec![2]);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit.notifications()[0].filter().kind(), FilterKind::Keys);
    }

    #[test]
    fn test_coalesced_notifications_flush_as_one() {
        let sink = Arc::new(InMemoryInvalidationCollector::<u32, String>::new());
        let coalescing = Arc::new(CoalescingInvalidationChannel::new(sink.clone()));

        let registry = CacheRegistry::new();
        let cache = CacheBuilder::<u32, String>::new()
            .with_cache_id("batched")
            .with_resolve_fn(v_resolver)
            .with_invalidation_channel(coalescing.clone())
            .build(&registry)
            .unwrap();

        cache.invalidate(&EntryFilter::key(1), true);
        cache.invalidate(&EntryFilter::key(2), true);
        cache.invalidate(&EntryFilter::key(3), false);
        assert_eq!(coalescing.pending_len(), 1);

        assert_eq!(coalescing.flush().unwrap(), 1);
        let sent = sink.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].filter().key_set().unwrap().len(), 2);
    }
}

// =============================================================================
// Configuration and Observability Tests
// =============================================================================

mod config_tests {
    use super::*;
    use memocache::{CacheSettings, PrometheusExporter};

    #[test]
    fn test_settings_build_bounded_cache() {
        let settings = CacheSettings::from_json(
            r#"{
                "cache_id": "from-json",
                "label": "Configured",
                "max_concurrent_resolve": 2,
                "size_bound": 100
            }"#,
        )
        .unwrap();

        let registry = CacheRegistry::new();
        let cache = settings
            .apply(CacheBuilder::<u32, String>::new().with_resolve_fn(v_resolver))
            .unwrap()
            .build(&registry)
            .unwrap();

        assert_eq!(cache.cache_id(), "from-json");
        assert_eq!(cache.label(), Some("Configured"));
        assert_eq!(cache.get(&4).unwrap(), Some("v4".to_string()));
        assert_eq!(cache.metrics().strategy, "expiring");
    }

    #[test]
    fn test_negative_settings_rejected_before_build() {
        let err = CacheSettings::from_json(r#"{"cache_id": "x", "time_to_live_ms": -10}"#).unwrap_err();
        assert_matches!(err, Error::InvalidTimeToLive { millis: -10 });
        assert!(err.is_config());
    }

    #[test]
    fn test_prometheus_exposition() {
        let registry = CacheRegistry::new();
        let cache = CacheBuilder::<u32, String>::new()
            .with_cache_id("exported")
            .with_resolve_fn(v_resolver)
            .with_max_concurrent_resolve(1)
            .unwrap()
            .build(&registry)
            .unwrap();
        cache.get_all(&[1, 2]).unwrap();
        cache.get(&1).unwrap();

        let text = PrometheusExporter::new().unwrap().render(&registry).unwrap();
        assert!(text.contains("memocache_entries{cache_id=\"exported\"} 2"));
        assert!(text.contains("memocache_hits{cache_id=\"exported\"} 1"));
        assert!(text.contains("memocache_permit_waits{cache_id=\"exported\"} 0"));
    }
}
