//! In-process cluster transport
//!
//! Simulates a set of nodes, each with its own [`CacheRegistry`], connected
//! by crossbeam channels. A cache on one node publishes invalidations
//! through [`ClusterNode::channel`]; every other node applies them to its
//! cache of the same id with `propagate = false`, so remote invalidations
//! never echo back.
//!
//! ```text
//! node A: cache.invalidate(f, true)
//!   └─ InvalidationNotifyingCacheWrapper ─► ClusterPublisher ─► transport
//!                                                                 │
//! node B: process_pending() ◄─────────────────────────────────────┘
//!   └─ registry.opt(id).invalidate(f, false)
//! ```

use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::cache::registry::CacheRegistry;
use crate::domain::events::{CacheEvent, InvalidationNotification};
use crate::domain::ports::{CacheKey, CacheValue, InvalidationChannel};
use crate::error::{Error, Result};

/// Notification tagged with the node that sent it.
#[derive(Clone, Debug)]
pub struct ClusterMessage<K: CacheKey, V: CacheValue> {
    pub origin: Uuid,
    pub notification: InvalidationNotification<K, V>,
}

struct NodeLink<K: CacheKey, V: CacheValue> {
    node_id: Uuid,
    sender: Sender<ClusterMessage<K, V>>,
}

/// Broadcast medium shared by all nodes.
pub struct ClusterTransport<K: CacheKey, V: CacheValue> {
    links: RwLock<Vec<NodeLink<K, V>>>,
}

impl<K: CacheKey, V: CacheValue> Default for ClusterTransport<K, V> {
    fn default() -> Self {
        Self {
            links: RwLock::new(Vec::new()),
        }
    }
}

impl<K: CacheKey, V: CacheValue> ClusterTransport<K, V> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node whose caches live in `registry`.
    pub fn join(self: &Arc<Self>, registry: Arc<CacheRegistry>) -> ClusterNode<K, V> {
        let node_id = Uuid::new_v4();
        let (sender, receiver) = unbounded();
        self.links.write().push(NodeLink { node_id, sender });
        debug!(node_id = %node_id, nodes = self.node_count(), "Node joined cluster");

        ClusterNode {
            node_id,
            transport: Arc::clone(self),
            receiver,
            registry,
        }
    }

    pub fn node_count(&self) -> usize {
        self.links.read().len()
    }

    fn broadcast(&self, message: ClusterMessage<K, V>) -> Result<usize> {
        let links = self.links.read();
        let mut delivered = 0;
        for link in links.iter().filter(|link| link.node_id != message.origin) {
            link.sender
                .send(message.clone())
                .map_err(|_| Error::Notification(format!("node {} is unreachable", link.node_id)))?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn leave(&self, node_id: Uuid) {
        self.links.write().retain(|link| link.node_id != node_id);
        debug!(node_id = %node_id, "Node left cluster");
    }
}

/// One member of a [`ClusterTransport`]. Leaves the cluster when dropped.
pub struct ClusterNode<K: CacheKey, V: CacheValue> {
    node_id: Uuid,
    transport: Arc<ClusterTransport<K, V>>,
    receiver: Receiver<ClusterMessage<K, V>>,
    registry: Arc<CacheRegistry>,
}

impl<K: CacheKey, V: CacheValue> ClusterNode<K, V> {
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    /// Channel for caches on this node to publish through.
    pub fn channel(&self) -> Arc<dyn InvalidationChannel<K, V>> {
        Arc::new(ClusterPublisher {
            origin: self.node_id,
            transport: Arc::clone(&self.transport),
        })
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Apply every received invalidation. Returns how many were applied to
    /// a local cache; messages for unknown caches are dropped.
    pub fn process_pending(&self) -> Result<usize> {
        let mut applied = 0;
        loop {
            let message = match self.receiver.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::Notification("cluster transport closed".to_string()))
                }
            };
            if self.apply(message) {
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn apply(&self, message: ClusterMessage<K, V>) -> bool {
        if message.origin == self.node_id {
            return false;
        }

        let (cache_id, filter) = message.notification.into_parts();
        let Some(cache) = self.registry.opt::<K, V>(&cache_id) else {
            trace!(node_id = %self.node_id, cache_id = %cache_id, "No local cache for remote invalidation");
            return false;
        };

        cache.invalidate(&filter, false);

        let event = CacheEvent::remote_invalidation_applied(&cache_id, message.origin.to_string(), &filter);
        debug!(
            node_id = %self.node_id,
            cache_id = %cache_id,
            event_type = event.event_type(),
            "Applied remote invalidation"
        );
        true
    }
}

impl<K: CacheKey, V: CacheValue> Drop for ClusterNode<K, V> {
    fn drop(&mut self) {
        self.transport.leave(self.node_id);
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for ClusterNode<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterNode")
            .field("node_id", &self.node_id)
            .field("pending", &self.pending())
            .finish()
    }
}

/// [`InvalidationChannel`] that broadcasts to the other nodes.
pub struct ClusterPublisher<K: CacheKey, V: CacheValue> {
    origin: Uuid,
    transport: Arc<ClusterTransport<K, V>>,
}

impl<K: CacheKey, V: CacheValue> InvalidationChannel<K, V> for ClusterPublisher<K, V> {
    fn publish(&self, notification: InvalidationNotification<K, V>) -> Result<()> {
        let cache_id = notification.cache_id().to_string();
        let delivered = self.transport.broadcast(ClusterMessage {
            origin: self.origin,
            notification,
        })?;
        trace!(origin = %self.origin, cache_id = %cache_id, delivered, "Broadcast invalidation");
        Ok(())
    }
}
