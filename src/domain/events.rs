//! Domain Events
//!
//! Immutable records of things that happened to caches. Two kinds live here:
//!
//! - [`InvalidationNotification`] is the typed message handed to an
//!   [`InvalidationChannel`](super::ports::InvalidationChannel) when a cache
//!   is invalidated with propagation.
//! - [`CacheEvent`] is the serializable audit record used by the logging
//!   adapters.
//!
//! # Example
//!
//! ```ignore
//! let event = CacheEvent::cache_invalidated("codes", &EntryFilter::<u32, String>::all(), true);
//! info!(event_type = event.event_type(), "{}", serde_json::to_string(&event)?);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::filter::{EntryFilter, FilterDescriptor};

use super::ports::{CacheKey, CacheValue};

// =============================================================================
// Invalidation Notification
// =============================================================================

/// What was invalidated, and in which cache.
#[derive(Clone, Debug)]
pub struct InvalidationNotification<K, V> {
    cache_id: String,
    filter: EntryFilter<K, V>,
}

impl<K: CacheKey, V: CacheValue> InvalidationNotification<K, V> {
    pub fn new(cache_id: impl Into<String>, filter: EntryFilter<K, V>) -> Self {
        Self {
            cache_id: cache_id.into(),
            filter,
        }
    }

    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    pub fn filter(&self) -> &EntryFilter<K, V> {
        &self.filter
    }

    /// Merge with another notification for the same cache, if the filters
    /// can be expressed as one.
    pub fn coalesce(&self, other: &Self) -> Option<Self> {
        if self.cache_id != other.cache_id {
            return None;
        }
        self.filter
            .coalesce(&other.filter)
            .map(|filter| Self::new(self.cache_id.clone(), filter))
    }

    pub fn into_parts(self) -> (String, EntryFilter<K, V>) {
        (self.cache_id, self.filter)
    }
}

// =============================================================================
// Audit Events
// =============================================================================

/// Serializable audit record of a cache lifecycle step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CacheEvent {
    /// A cache was built and registered.
    CacheRegistered {
        cache_id: String,
        strategy: String,
        timestamp: DateTime<Utc>,
    },

    /// A cache replaced an existing registration.
    CacheReplaced {
        cache_id: String,
        strategy: String,
        timestamp: DateTime<Utc>,
    },

    /// Entries were invalidated.
    CacheInvalidated {
        cache_id: String,
        filter: FilterDescriptor,
        propagate: bool,
        timestamp: DateTime<Utc>,
    },

    /// An invalidation received from another node was applied locally.
    RemoteInvalidationApplied {
        cache_id: String,
        origin_node: String,
        filter: FilterDescriptor,
        timestamp: DateTime<Utc>,
    },
}

impl CacheEvent {
    pub fn cache_registered(cache_id: impl Into<String>, strategy: impl Into<String>) -> Self {
        CacheEvent::CacheRegistered {
            cache_id: cache_id.into(),
            strategy: strategy.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn cache_replaced(cache_id: impl Into<String>, strategy: impl Into<String>) -> Self {
        CacheEvent::CacheReplaced {
            cache_id: cache_id.into(),
            strategy: strategy.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn cache_invalidated<K: CacheKey, V: CacheValue>(
        cache_id: impl Into<String>,
        filter: &EntryFilter<K, V>,
        propagate: bool,
    ) -> Self {
        CacheEvent::CacheInvalidated {
            cache_id: cache_id.into(),
            filter: filter.describe(),
            propagate,
            timestamp: Utc::now(),
        }
    }

    pub fn remote_invalidation_applied<K: CacheKey, V: CacheValue>(
        cache_id: impl Into<String>,
        origin_node: impl Into<String>,
        filter: &EntryFilter<K, V>,
    ) -> Self {
        CacheEvent::RemoteInvalidationApplied {
            cache_id: cache_id.into(),
            origin_node: origin_node.into(),
            filter: filter.describe(),
            timestamp: Utc::now(),
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CacheEvent::CacheRegistered { timestamp, .. } => *timestamp,
            CacheEvent::CacheReplaced { timestamp, .. } => *timestamp,
            CacheEvent::CacheInvalidated { timestamp, .. } => *timestamp,
            CacheEvent::RemoteInvalidationApplied { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::CacheRegistered { .. } => "CacheRegistered",
            CacheEvent::CacheReplaced { .. } => "CacheReplaced",
            CacheEvent::CacheInvalidated { .. } => "CacheInvalidated",
            CacheEvent::RemoteInvalidationApplied { .. } => "RemoteInvalidationApplied",
        }
    }

    pub fn cache_id(&self) -> &str {
        match self {
            CacheEvent::CacheRegistered { cache_id, .. } => cache_id,
            CacheEvent::CacheReplaced { cache_id, .. } => cache_id,
            CacheEvent::CacheInvalidated { cache_id, .. } => cache_id,
            CacheEvent::RemoteInvalidationApplied { cache_id, .. } => cache_id,
        }
    }
}
