//! Infrastructure Adapters
//!
//! Implementations of the [`InvalidationChannel`](crate::domain::ports::InvalidationChannel)
//! port, following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │      Cache │ BackingMap │ ValueResolver │ InvalidationChannel │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ LoggingInvalidationChannel │ InMemoryInvalidationCollector  │ │
//! │  │ CompositeInvalidationChannel │ CoalescingInvalidationChannel │ │
//! │  │ ClusterTransport / ClusterNode / ClusterPublisher           │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use memocache::adapters::{CoalescingInvalidationChannel, LoggingInvalidationChannel};
//!
//! let channel = Arc::new(CoalescingInvalidationChannel::new(
//!     Arc::new(LoggingInvalidationChannel::info_level()),
//! ));
//! let cache = CacheBuilder::new()
//!     .with_cache_id("codes")
//!     .with_resolve_fn(load_code)
//!     .with_invalidation_channel(channel.clone())
//!     .build(&registry)?;
//! ```

mod cluster;
mod invalidation;

pub use cluster::{ClusterMessage, ClusterNode, ClusterPublisher, ClusterTransport};
pub use invalidation::{
    CoalescingInvalidationChannel, CompositeInvalidationChannel, InMemoryInvalidationCollector,
    LoggingInvalidationChannel,
};
