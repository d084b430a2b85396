//! Keyed resolve-on-miss caching engine
//!
//! A cache is assembled in layers:
//!
//! ```text
//! CacheBuilder ──► MapStrategy ──► BackingMap (plain / concurrent / expiring / transactional)
//!                                      │
//!                                 BasicCache (resolve on miss, put-if-absent)
//!                                      │
//!                      BoundedResolveCacheWrapper (optional)
//!                                      │
//!                  InvalidationNotifyingCacheWrapper (optional)
//!                                      │
//!                          custom wrappers (in order)
//!                                      │
//!                               CacheRegistry
//! ```

pub mod basic;
pub mod builder;
pub mod filter;
pub mod maps;
pub mod metrics;
pub mod registry;
pub mod settings;
pub mod view;
pub mod wrapper;

pub use basic::{BasicCache, LabelSupplier};
pub use builder::{CacheBuilder, CollisionPolicy, MapStrategy};
pub use filter::{CustomEntryFilter, EntryFilter, FilterDescriptor, FilterKind, FilterPayload};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use registry::{CacheRegistry, ErasedCache};
pub use settings::CacheSettings;
pub use view::CacheView;
pub use wrapper::{
    BoundedResolveCacheWrapper, CacheWrapper, CustomWrapper, InvalidationNotifyingCacheWrapper,
    WrappedCache,
};
