//! Expiring, optionally size-bounded map.
//!
//! Entries carry the instant they were last touched. An entry older than the
//! time-to-live is treated as absent and purged when it is next seen. With a
//! size bound the map evicts the least recently used entry once the bound is
//! exceeded; with touch-on-get every read refreshes both the LRU position
//! and the expiry clock. A zero time-to-live disables time-based expiry.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::domain::ports::{BackingMap, CacheKey, CacheValue};

struct Timed<V> {
    value: V,
    touched_at: Instant,
}

impl<V> Timed<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            touched_at: Instant::now(),
        }
    }
}

/// Map with time-to-live expiry and LRU size bounding.
pub struct ExpiringMap<K, V> {
    entries: Mutex<LruCache<K, Timed<V>>>,
    time_to_live: Option<Duration>,
    size_bound: Option<NonZeroUsize>,
    touch_on_get: bool,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K: CacheKey, V: CacheValue> ExpiringMap<K, V> {
    pub fn new(
        time_to_live: Option<Duration>,
        size_bound: Option<NonZeroUsize>,
        touch_on_get: bool,
    ) -> Self {
        let entries = match size_bound {
            Some(bound) => LruCache::new(bound),
            None => LruCache::unbounded(),
        };
        Self {
            entries: Mutex::new(entries),
            time_to_live: time_to_live.filter(|ttl| !ttl.is_zero()),
            size_bound,
            touch_on_get,
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        self.time_to_live
    }

    pub fn size_bound(&self) -> Option<NonZeroUsize> {
        self.size_bound
    }

    pub fn touch_on_get(&self) -> bool {
        self.touch_on_get
    }

    /// Entries dropped to honor the size bound.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Entries dropped because their time-to-live elapsed.
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    fn is_expired(&self, entry: &Timed<V>, now: Instant) -> bool {
        match self.time_to_live {
            Some(ttl) => now.saturating_duration_since(entry.touched_at) >= ttl,
            None => false,
        }
    }

    fn purge(&self, entries: &mut LruCache<K, Timed<V>>, key: &K) {
        if entries.pop(key).is_some() {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop expired entries from the cold end of the LRU order.
    fn sweep(&self, entries: &mut LruCache<K, Timed<V>>, now: Instant) {
        if self.time_to_live.is_none() {
            return;
        }
        while let Some((_, oldest)) = entries.peek_lru() {
            if !self.is_expired(oldest, now) {
                break;
            }
            entries.pop_lru();
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<K: CacheKey, V: CacheValue> BackingMap<K, V> for ExpiringMap<K, V> {
    fn get(&self, key: &K) -> Option<V> {
        if !self.touch_on_get {
            return self.peek(key);
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = match entries.get_mut(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                entry.touched_at = now;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.purge(&mut entries, key);
        }
        None
    }

    fn peek(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = match entries.peek(key) {
            Some(entry) if !self.is_expired(entry, now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.purge(&mut entries, key);
        }
        None
    }

    fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);

        let expired = match entries.peek(&key) {
            Some(existing) if !self.is_expired(existing, now) => {
                return Some(existing.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.purge(&mut entries, &key);
        }

        if let Some((evicted, _)) = entries.push(key.clone(), Timed::new(value)) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        None
    }

    fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let removed = self.entries.lock().pop(key)?;
        if self.is_expired(&removed, now) {
            return None;
        }
        Some(removed.value)
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn entries(&self) -> Vec<(K, V)> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);
        entries
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry, now))
            .map(|(k, entry)| (k.clone(), entry.value.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);
        entries
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry, now))
            .count()
    }

    fn strategy_name(&self) -> &'static str {
        "expiring"
    }
}
