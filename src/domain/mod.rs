//! Domain Layer
//!
//! Ports the caching engine depends on and the events it emits.
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for resolvers and
//!   invalidation transport
//! - **Events** (`events.rs`) - Invalidation notifications and audit events
//!
//! # Usage
//!
//! ```ignore
//! use memocache::domain::ports::ValueResolver;
//!
//! struct CountryNames;
//!
//! impl ValueResolver<String, String> for CountryNames {
//!     fn resolve(&self, code: &String) -> Result<Option<String>> {
//!         Ok(lookup_country(code))
//!     }
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::{CacheEvent, InvalidationNotification};
pub use ports::{
    BackingMap, Cache, CacheKey, CacheValue, FnResolver, InvalidationChannel,
    TransactionalCapability, ValueResolver,
};
