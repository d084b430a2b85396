//! Wrapper that forwards propagated invalidations to a channel.

use std::sync::Arc;

use tracing::warn;

use crate::cache::filter::EntryFilter;
use crate::domain::events::InvalidationNotification;
use crate::domain::ports::{Cache, CacheKey, CacheValue, InvalidationChannel};

use super::CacheWrapper;

/// Publishes an [`InvalidationNotification`] for every invalidation made
/// with `propagate == true`. Local invalidation always happens first;
/// a failing channel is logged and does not affect the caller.
pub struct InvalidationNotifyingCacheWrapper<K: CacheKey, V: CacheValue> {
    delegate: Arc<dyn Cache<K, V>>,
    channel: Arc<dyn InvalidationChannel<K, V>>,
}

impl<K: CacheKey, V: CacheValue> InvalidationNotifyingCacheWrapper<K, V> {
    pub fn new(delegate: Arc<dyn Cache<K, V>>, channel: Arc<dyn InvalidationChannel<K, V>>) -> Self {
        Self { delegate, channel }
    }
}

impl<K: CacheKey, V: CacheValue> CacheWrapper<K, V> for InvalidationNotifyingCacheWrapper<K, V> {
    fn delegate(&self) -> &Arc<dyn Cache<K, V>> {
        &self.delegate
    }

    fn invalidate(&self, filter: &EntryFilter<K, V>, propagate: bool) {
        self.delegate.invalidate(filter, propagate);
        if !propagate {
            return;
        }

        let notification = InvalidationNotification::new(self.delegate.cache_id(), filter.clone());
        if let Err(err) = self.channel.publish(notification) {
            warn!(
                cache_id = %self.delegate.cache_id(),
                error = %err,
                "Failed to publish invalidation"
            );
        }
    }
}
