//! Entry filters used to select what an invalidation removes.
//!
//! Filters are immutable values shared through `Arc`, so they can be handed
//! to other threads and to invalidation channels. Match-all and key-set
//! filters also have a serde wire form ([`FilterPayload`]) for transport to
//! other nodes.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::ports::{CacheKey, CacheValue};

/// User-defined filter predicate.
pub trait CustomEntryFilter<K, V>: Send + Sync + fmt::Debug {
    fn accept(&self, key: &K, value: &V) -> bool;

    /// Merge with another filter. Declines by default.
    fn coalesce(&self, _other: &EntryFilter<K, V>) -> Option<EntryFilter<K, V>> {
        None
    }
}

/// Selects the (key, value) pairs an invalidation affects.
pub enum EntryFilter<K, V> {
    /// Accepts every entry.
    All,
    /// Accepts entries whose key is in the set.
    Keys(Arc<HashSet<K>>),
    Custom(Arc<dyn CustomEntryFilter<K, V>>),
}

/// Filter kind, as reported in events and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    All,
    Keys,
    Custom,
}

/// Value-free summary of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDescriptor {
    pub kind: FilterKind,
    pub key_count: Option<usize>,
}

/// Serializable form of the transportable filter kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "keys", rename_all = "snake_case")]
pub enum FilterPayload<K> {
    All,
    Keys(Vec<K>),
}

impl<K: CacheKey, V: CacheValue> EntryFilter<K, V> {
    pub fn all() -> Self {
        EntryFilter::All
    }

    pub fn keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        EntryFilter::Keys(Arc::new(keys.into_iter().collect()))
    }

    pub fn key(key: K) -> Self {
        Self::keys(std::iter::once(key))
    }

    pub fn custom<F>(filter: F) -> Self
    where
        F: CustomEntryFilter<K, V> + 'static,
    {
        EntryFilter::Custom(Arc::new(filter))
    }

    /// Custom filter from a closure. `name` shows up in debug output.
    pub fn predicate<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        Self::custom(PredicateFilter {
            name: name.into(),
            predicate: Box::new(predicate),
        })
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            EntryFilter::All => FilterKind::All,
            EntryFilter::Keys(_) => FilterKind::Keys,
            EntryFilter::Custom(_) => FilterKind::Custom,
        }
    }

    pub fn accept(&self, key: &K, value: &V) -> bool {
        match self {
            EntryFilter::All => true,
            EntryFilter::Keys(keys) => keys.contains(key),
            EntryFilter::Custom(custom) => custom.accept(key, value),
        }
    }

    /// Merge two filters into one that accepts the union of both.
    ///
    /// Match-all absorbs anything. Two key sets merge into their union.
    /// Every other combination declines with `None`, and the caller issues
    /// both invalidations separately.
    pub fn coalesce(&self, other: &EntryFilter<K, V>) -> Option<EntryFilter<K, V>> {
        match (self, other) {
            (EntryFilter::All, _) => Some(EntryFilter::All),
            (EntryFilter::Keys(a), EntryFilter::Keys(b)) => {
                let mut union = HashSet::with_capacity(a.len() + b.len());
                union.extend(a.iter().cloned());
                union.extend(b.iter().cloned());
                Some(EntryFilter::Keys(Arc::new(union)))
            }
            (EntryFilter::Keys(_), _) => None,
            (EntryFilter::Custom(custom), other) => custom.coalesce(other),
        }
    }

    /// Key set of a key-set filter.
    pub fn key_set(&self) -> Option<&HashSet<K>> {
        match self {
            EntryFilter::Keys(keys) => Some(keys.as_ref()),
            _ => None,
        }
    }

    pub fn describe(&self) -> FilterDescriptor {
        FilterDescriptor {
            kind: self.kind(),
            key_count: self.key_set().map(HashSet::len),
        }
    }

    /// Wire form, or `None` for custom filters.
    pub fn to_payload(&self) -> Option<FilterPayload<K>> {
        match self {
            EntryFilter::All => Some(FilterPayload::All),
            EntryFilter::Keys(keys) => Some(FilterPayload::Keys(keys.iter().cloned().collect())),
            EntryFilter::Custom(_) => None,
        }
    }
}

impl<K: CacheKey, V: CacheValue> From<FilterPayload<K>> for EntryFilter<K, V> {
    fn from(payload: FilterPayload<K>) -> Self {
        match payload {
            FilterPayload::All => EntryFilter::All,
            FilterPayload::Keys(keys) => EntryFilter::keys(keys),
        }
    }
}

impl<K, V> Clone for EntryFilter<K, V> {
    fn clone(&self) -> Self {
        match self {
            EntryFilter::All => EntryFilter::All,
            EntryFilter::Keys(keys) => EntryFilter::Keys(Arc::clone(keys)),
            EntryFilter::Custom(custom) => EntryFilter::Custom(Arc::clone(custom)),
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for EntryFilter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryFilter::All => f.write_str("All"),
            EntryFilter::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            EntryFilter::Custom(custom) => f.debug_tuple("Custom").field(custom).finish(),
        }
    }
}

struct PredicateFilter<K, V> {
    name: String,
    predicate: Box<dyn Fn(&K, &V) -> bool + Send + Sync>,
}

impl<K, V> fmt::Debug for PredicateFilter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateFilter")
            .field("name", &self.name)
            .finish()
    }
}

impl<K, V> CustomEntryFilter<K, V> for PredicateFilter<K, V> {
    fn accept(&self, key: &K, value: &V) -> bool {
        (self.predicate)(key, value)
    }
}
