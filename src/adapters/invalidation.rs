//! Invalidation Channel Adapters
//!
//! Implements the `InvalidationChannel` port with various backends.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::domain::events::{CacheEvent, InvalidationNotification};
use crate::domain::ports::{CacheKey, CacheValue, InvalidationChannel};
use crate::error::Result;

/// Logging-based invalidation channel.
///
/// Writes every notification to the tracing system as a `CacheInvalidated`
/// event. Useful for audit trails.
#[derive(Debug, Clone, Default)]
pub struct LoggingInvalidationChannel {
    /// Log at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingInvalidationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

impl<K: CacheKey, V: CacheValue> InvalidationChannel<K, V> for LoggingInvalidationChannel {
    fn publish(&self, notification: InvalidationNotification<K, V>) -> Result<()> {
        let event = CacheEvent::cache_invalidated(notification.cache_id(), notification.filter(), true);
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if self.info_level {
            info!(event_type = event.event_type(), event = %json, "Cache event");
        } else {
            debug!(event_type = event.event_type(), event = %json, "Cache event");
        }
        Ok(())
    }
}

/// In-memory notification collector for testing.
pub struct InMemoryInvalidationCollector<K: CacheKey, V: CacheValue> {
    notifications: RwLock<Vec<InvalidationNotification<K, V>>>,
}

impl<K: CacheKey, V: CacheValue> Default for InMemoryInvalidationCollector<K, V> {
    fn default() -> Self {
        Self {
            notifications: RwLock::new(Vec::new()),
        }
    }
}

impl<K: CacheKey, V: CacheValue> InMemoryInvalidationCollector<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected notifications, oldest first.
    pub fn notifications(&self) -> Vec<InvalidationNotification<K, V>> {
        self.notifications.read().clone()
    }

    pub fn len(&self) -> usize {
        self.notifications.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.read().is_empty()
    }

    pub fn clear(&self) {
        self.notifications.write().clear();
    }

    /// Notifications addressed to `cache_id`.
    pub fn notifications_for(&self, cache_id: &str) -> Vec<InvalidationNotification<K, V>> {
        self.notifications
            .read()
            .iter()
            .filter(|n| n.cache_id() == cache_id)
            .cloned()
            .collect()
    }
}

impl<K: CacheKey, V: CacheValue> InvalidationChannel<K, V> for InMemoryInvalidationCollector<K, V> {
    fn publish(&self, notification: InvalidationNotification<K, V>) -> Result<()> {
        self.notifications.write().push(notification);
        Ok(())
    }

    fn publish_all(&self, notifications: Vec<InvalidationNotification<K, V>>) -> Result<()> {
        self.notifications.write().extend(notifications);
        Ok(())
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for InMemoryInvalidationCollector<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryInvalidationCollector")
            .field("len", &self.len())
            .finish()
    }
}

/// Fans a notification out to several channels. Stops at the first failure.
pub struct CompositeInvalidationChannel<K: CacheKey, V: CacheValue> {
    channels: Vec<Arc<dyn InvalidationChannel<K, V>>>,
}

impl<K: CacheKey, V: CacheValue> Default for CompositeInvalidationChannel<K, V> {
    fn default() -> Self {
        Self { channels: Vec::new() }
    }
}

impl<K: CacheKey, V: CacheValue> CompositeInvalidationChannel<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Arc<dyn InvalidationChannel<K, V>>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for CompositeInvalidationChannel<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeInvalidationChannel")
            .field("channel_count", &self.channels.len())
            .finish()
    }
}

impl<K: CacheKey, V: CacheValue> InvalidationChannel<K, V> for CompositeInvalidationChannel<K, V> {
    fn publish(&self, notification: InvalidationNotification<K, V>) -> Result<()> {
        for channel in &self.channels {
            channel.publish(notification.clone())?;
        }
        Ok(())
    }
}

/// Buffers notifications and merges them with [`EntryFilter::coalesce`]
/// until [`flush`](Self::flush) forwards the batch to the inner channel.
///
/// [`EntryFilter::coalesce`]: crate::cache::EntryFilter::coalesce
pub struct CoalescingInvalidationChannel<K: CacheKey, V: CacheValue> {
    inner: Arc<dyn InvalidationChannel<K, V>>,
    pending: Mutex<Vec<InvalidationNotification<K, V>>>,
}

impl<K: CacheKey, V: CacheValue> CoalescingInvalidationChannel<K, V> {
    pub fn new(inner: Arc<dyn InvalidationChannel<K, V>>) -> Self {
        Self {
            inner,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Forward all buffered notifications. Returns how many were sent.
    pub fn flush(&self) -> Result<usize> {
        let batch = std::mem::take(&mut *self.pending.lock());
        let count = batch.len();
        if count > 0 {
            debug!(count, "Flushing coalesced invalidations");
            self.inner.publish_all(batch)?;
        }
        Ok(count)
    }
}

impl<K: CacheKey, V: CacheValue> InvalidationChannel<K, V> for CoalescingInvalidationChannel<K, V> {
    fn publish(&self, notification: InvalidationNotification<K, V>) -> Result<()> {
        let mut pending = self.pending.lock();
        for queued in pending.iter_mut() {
            // Custom filters may only know how to merge in one direction
            let merged = queued
                .coalesce(&notification)
                .or_else(|| notification.coalesce(queued));
            if let Some(merged) = merged {
                *queued = merged;
                return Ok(());
            }
        }
        pending.push(notification);
        Ok(())
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for CoalescingInvalidationChannel<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingInvalidationChannel")
            .field("pending", &self.pending_len())
            .finish()
    }
}
