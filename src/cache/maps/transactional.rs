//! Transaction-aware backing map.
//!
//! Outside a transaction every operation goes straight to the shared store.
//! Inside [`run_in_transaction`](crate::transaction::run_in_transaction) the
//! map registers a member that buffers the transaction's inserts and
//! removals until commit.
//!
//! # Stale-insert detection
//!
//! The shared state carries a dirty epoch. It is bumped whenever a
//! transaction invalidates something that another transaction might be
//! resolving right now (an explicit dirty mark, or a commit that removed
//! entries). A member remembers the epoch it started from; if the epoch
//! moved by the time it commits, its pending inserts were computed from data
//! that may have been invalidated and are dropped.
//!
//! ```text
//!  tx A: member(epoch 4) ── resolve(k) ─────────────── commit: epoch 5 ≠ 4, drop insert
//!  tx B:           invalidate(k) ── mark dirty: epoch 5 ── commit
//! ```
//!
//! # Fast-forward
//!
//! In fast-forward mode a member publishes inserts to the shared store
//! immediately instead of at commit, as long as it has no pending removals
//! and the epoch has not moved since it started. Reading-only transactions
//! therefore see values committed by other transactions.
//!
//! # Publish lock
//!
//! Every step that compares the epoch and then publishes, and every step
//! that removes from the shared store and then bumps the epoch, runs under
//! the shared publish lock. A stale insert can therefore never land after
//! the invalidation that made it stale.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::domain::ports::{BackingMap, CacheKey, CacheValue, TransactionalCapability};
use crate::transaction::{Transaction, TransactionMember};

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(1);

/// Shared committed state layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionalStore {
    /// Readers take an `Arc` snapshot; writers copy the map if a snapshot is
    /// outstanding. Suited to small, read-mostly caches.
    CopyOnWrite,
    /// Concurrent hash map.
    Concurrent,
}

enum SharedStore<K, V> {
    CopyOnWrite(RwLock<Arc<HashMap<K, V>>>),
    Concurrent(DashMap<K, V>),
}

impl<K: CacheKey, V: CacheValue> SharedStore<K, V> {
    fn new(layout: TransactionalStore) -> Self {
        match layout {
            TransactionalStore::CopyOnWrite => {
                SharedStore::CopyOnWrite(RwLock::new(Arc::new(HashMap::new())))
            }
            TransactionalStore::Concurrent => SharedStore::Concurrent(DashMap::new()),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        match self {
            SharedStore::CopyOnWrite(map) => map.read().get(key).cloned(),
            SharedStore::Concurrent(map) => map.get(key).map(|entry| entry.value().clone()),
        }
    }

    fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        match self {
            SharedStore::CopyOnWrite(map) => {
                let mut guard = map.write();
                if let Some(existing) = guard.get(&key) {
                    return Some(existing.clone());
                }
                Arc::make_mut(&mut *guard).insert(key, value);
                None
            }
            SharedStore::Concurrent(map) => match map.entry(key) {
                dashmap::mapref::entry::Entry::Occupied(entry) => Some(entry.get().clone()),
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    entry.insert(value);
                    None
                }
            },
        }
    }

    fn remove(&self, key: &K) -> Option<V> {
        match self {
            SharedStore::CopyOnWrite(map) => {
                let mut guard = map.write();
                if !guard.contains_key(key) {
                    return None;
                }
                Arc::make_mut(&mut *guard).remove(key)
            }
            SharedStore::Concurrent(map) => map.remove(key).map(|(_, value)| value),
        }
    }

    fn clear(&self) {
        match self {
            SharedStore::CopyOnWrite(map) => *map.write() = Arc::new(HashMap::new()),
            SharedStore::Concurrent(map) => map.clear(),
        }
    }

    fn entries(&self) -> Vec<(K, V)> {
        match self {
            SharedStore::CopyOnWrite(map) => {
                let snapshot = Arc::clone(&map.read());
                snapshot
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }
            SharedStore::Concurrent(map) => map
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    fn len(&self) -> usize {
        match self {
            SharedStore::CopyOnWrite(map) => map.read().len(),
            SharedStore::Concurrent(map) => map.len(),
        }
    }

    /// Apply a member's buffered changes. Inserts never overwrite a value
    /// that is already present.
    fn apply(&self, changes: PendingChanges<K, V>, keep_inserts: bool) {
        match self {
            SharedStore::CopyOnWrite(map) => {
                let mut guard = map.write();
                let committed = Arc::make_mut(&mut *guard);
                if changes.cleared {
                    committed.clear();
                }
                for key in &changes.removed {
                    committed.remove(key);
                }
                if keep_inserts {
                    for (key, value) in changes.inserts {
                        committed.entry(key).or_insert(value);
                    }
                }
            }
            SharedStore::Concurrent(map) => {
                if changes.cleared {
                    map.clear();
                }
                for key in &changes.removed {
                    map.remove(key);
                }
                if keep_inserts {
                    for (key, value) in changes.inserts {
                        map.entry(key).or_insert(value);
                    }
                }
            }
        }
    }
}

struct SharedState<K, V> {
    store: SharedStore<K, V>,
    dirty_epoch: AtomicU64,
    publish_lock: Mutex<()>,
}

impl<K, V> SharedState<K, V> {
    fn epoch(&self) -> u64 {
        self.dirty_epoch.load(Ordering::SeqCst)
    }

    fn bump_epoch(&self) -> u64 {
        self.dirty_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct PendingChanges<K, V> {
    start_epoch: u64,
    inserts: HashMap<K, V>,
    removed: HashSet<K>,
    cleared: bool,
}

impl<K, V> PendingChanges<K, V> {
    fn new(start_epoch: u64) -> Self {
        Self {
            start_epoch,
            inserts: HashMap::new(),
            removed: HashSet::new(),
            cleared: false,
        }
    }

    fn has_removals(&self) -> bool {
        self.cleared || !self.removed.is_empty()
    }
}

/// Per-transaction view of one transactional map.
struct MapMember<K, V> {
    map_id: u64,
    shared: Arc<SharedState<K, V>>,
    changes: RefCell<PendingChanges<K, V>>,
}

impl<K: CacheKey, V: CacheValue> MapMember<K, V> {
    fn new(map_id: u64, shared: Arc<SharedState<K, V>>) -> Self {
        let start_epoch = shared.epoch();
        Self {
            map_id,
            shared,
            changes: RefCell::new(PendingChanges::new(start_epoch)),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        let changes = self.changes.borrow();
        if let Some(value) = changes.inserts.get(key) {
            return Some(value.clone());
        }
        if changes.cleared || changes.removed.contains(key) {
            return None;
        }
        self.shared.store.get(key)
    }

    fn put_if_absent(&self, key: K, value: V, fast_forward: bool) -> Option<V> {
        if let Some(existing) = self.get(&key) {
            return Some(existing);
        }

        let mut changes = self.changes.borrow_mut();
        if fast_forward && !changes.has_removals() {
            let _publish = self.shared.publish_lock.lock();
            if changes.start_epoch == self.shared.epoch() {
                return self.shared.store.put_if_absent(key, value);
            }
        }
        changes.inserts.insert(key, value);
        None
    }

    fn remove(&self, key: &K) -> Option<V> {
        let previous = self.get(key);
        let mut changes = self.changes.borrow_mut();
        changes.inserts.remove(key);
        if !changes.cleared {
            changes.removed.insert(key.clone());
        }
        previous
    }

    fn clear(&self) {
        let mut changes = self.changes.borrow_mut();
        changes.inserts.clear();
        changes.removed.clear();
        changes.cleared = true;
    }

    fn entries(&self) -> Vec<(K, V)> {
        let changes = self.changes.borrow();
        let mut merged: HashMap<K, V> = if changes.cleared {
            HashMap::new()
        } else {
            self.shared
                .store
                .entries()
                .into_iter()
                .filter(|(key, _)| !changes.removed.contains(key))
                .collect()
        };
        for (key, value) in &changes.inserts {
            merged
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        merged.into_iter().collect()
    }

    /// Restart stale detection from the current epoch.
    fn restart_epoch(&self, epoch: u64) {
        self.changes.borrow_mut().start_epoch = epoch;
    }
}

impl<K: CacheKey, V: CacheValue> TransactionMember for MapMember<K, V> {
    fn member_id(&self) -> u64 {
        self.map_id
    }

    fn commit(&self) {
        let _publish = self.shared.publish_lock.lock();
        let changes = self
            .changes
            .replace(PendingChanges::new(self.shared.epoch()));
        let stale = changes.start_epoch != self.shared.epoch();
        if changes.has_removals() {
            self.shared.bump_epoch();
        }
        trace!(
            map = self.map_id,
            inserts = changes.inserts.len(),
            removed = changes.removed.len(),
            cleared = changes.cleared,
            stale,
            "Committing transactional map member"
        );
        self.shared.store.apply(changes, !stale);
    }

    fn rollback(&self) {
        self.changes
            .replace(PendingChanges::new(self.shared.epoch()));
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Backing map whose writes become visible to other transactions at commit,
/// or immediately in fast-forward mode.
pub struct TransactionalMap<K, V> {
    map_id: u64,
    shared: Arc<SharedState<K, V>>,
    layout: TransactionalStore,
    fast_forward: bool,
}

impl<K: CacheKey, V: CacheValue> TransactionalMap<K, V> {
    pub fn new(layout: TransactionalStore, fast_forward: bool) -> Self {
        Self {
            map_id: NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed),
            shared: Arc::new(SharedState {
                store: SharedStore::new(layout),
                dirty_epoch: AtomicU64::new(0),
                publish_lock: Mutex::new(()),
            }),
            layout,
            fast_forward,
        }
    }

    pub fn copy_on_write(fast_forward: bool) -> Self {
        Self::new(TransactionalStore::CopyOnWrite, fast_forward)
    }

    pub fn concurrent(fast_forward: bool) -> Self {
        Self::new(TransactionalStore::Concurrent, fast_forward)
    }

    pub fn layout(&self) -> TransactionalStore {
        self.layout
    }

    pub fn is_fast_forward(&self) -> bool {
        self.fast_forward
    }

    /// Number of dirty marks and invalidating commits seen so far.
    pub fn dirty_epoch(&self) -> u64 {
        self.shared.epoch()
    }

    fn member(&self, create: bool) -> Option<Rc<MapMember<K, V>>> {
        let tx = Transaction::current()?;
        if let Some(existing) = tx.member(self.map_id) {
            return existing.into_any().downcast::<MapMember<K, V>>().ok();
        }
        if !create {
            return None;
        }
        let member = Rc::new(MapMember::new(self.map_id, Arc::clone(&self.shared)));
        tx.register_member(member.clone());
        Some(member)
    }
}

impl<K: CacheKey, V: CacheValue> BackingMap<K, V> for TransactionalMap<K, V> {
    fn get(&self, key: &K) -> Option<V> {
        match self.member(false) {
            Some(member) => member.get(key),
            None => self.shared.store.get(key),
        }
    }

    fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        match self.member(true) {
            Some(member) => member.put_if_absent(key, value, self.fast_forward),
            None => self.shared.store.put_if_absent(key, value),
        }
    }

    fn remove(&self, key: &K) -> Option<V> {
        match self.member(true) {
            Some(member) => member.remove(key),
            None => {
                let _publish = self.shared.publish_lock.lock();
                let removed = self.shared.store.remove(key);
                self.shared.bump_epoch();
                removed
            }
        }
    }

    fn clear(&self) {
        match self.member(true) {
            Some(member) => {
                member.clear();
                self.mark_inserts_dirty();
            }
            None => {
                let _publish = self.shared.publish_lock.lock();
                self.shared.store.clear();
                self.shared.bump_epoch();
            }
        }
    }

    fn entries(&self) -> Vec<(K, V)> {
        match self.member(false) {
            Some(member) => member.entries(),
            None => self.shared.store.entries(),
        }
    }

    fn len(&self) -> usize {
        match self.member(false) {
            Some(member) => member.entries().len(),
            None => self.shared.store.len(),
        }
    }

    fn strategy_name(&self) -> &'static str {
        match self.layout {
            TransactionalStore::CopyOnWrite => "transactional-copy-on-write",
            TransactionalStore::Concurrent => "transactional-concurrent",
        }
    }

    fn as_transactional(&self) -> Option<&dyn TransactionalCapability> {
        Some(self)
    }
}

impl<K: CacheKey, V: CacheValue> TransactionalCapability for TransactionalMap<K, V> {
    fn ensure_transaction_member(&self) {
        self.member(true);
    }

    fn mark_inserts_dirty(&self) {
        let epoch = {
            let _publish = self.shared.publish_lock.lock();
            self.shared.bump_epoch()
        };
        if let Some(member) = self.member(false) {
            member.restart_epoch(epoch);
        }
        trace!(map = self.map_id, epoch, "Pending inserts marked dirty");
    }
}
