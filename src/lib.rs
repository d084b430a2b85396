//! memocache - Keyed Resolve-on-Miss Caching Engine
//!
//! Memoizes expensive computations (lookups, remote calls, derived data)
//! behind a uniform key→value contract. A cache resolves missing keys
//! through a [`ValueResolver`](domain::ports::ValueResolver), stores them in
//! a backing map chosen by the builder, and can be invalidated by
//! [`EntryFilter`](cache::EntryFilter).
//!
//! # Architecture
//!
//! ```text
//! CacheBuilder → BackingMap → BasicCache → wrappers → CacheRegistry
//! ```
//!
//! # Example
//!
//! ```ignore
//! use memocache::{CacheBuilder, CacheRegistry, EntryFilter};
//!
//! let registry = CacheRegistry::new();
//! let cache = CacheBuilder::<u32, String>::new()
//!     .with_cache_id("codes")
//!     .with_resolve_fn(|key| Ok(Some(format!("v{}", key))))
//!     .with_max_concurrent_resolve(2)?
//!     .build(&registry)?;
//!
//! let values = cache.get_all(&[1, 2, 3])?;
//! cache.invalidate(&EntryFilter::key(2), false);
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Invalidation channel adapters and cluster transport
//! - [`cache`] - Cache implementation, backing maps, wrappers, builder, registry
//! - [`domain`] - Port traits and events
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus exposition
//! - [`transaction`] - Thread-scoped transactions for transactional maps

pub mod adapters;
pub mod cache;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod transaction;

// Re-export commonly used types
pub use cache::{BasicCache, CacheBuilder, CacheRegistry, CacheSettings, EntryFilter, MetricsSnapshot};
pub use domain::ports::{Cache, FnResolver, InvalidationChannel, ValueResolver};
pub use error::{Error, Result};
pub use metrics::PrometheusExporter;
pub use transaction::run_in_transaction;
