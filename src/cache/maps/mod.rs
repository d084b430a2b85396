//! Backing map strategies
//!
//! Every strategy implements [`BackingMap`](crate::domain::ports::BackingMap).
//! The builder picks one from the cache options:
//!
//! | Strategy | Used when |
//! |---|---|
//! | [`ExpiringMap`] | size bound or time-to-live configured |
//! | [`TransactionalMap`] | transactional |
//! | [`ConcurrentMap`] | thread-safe |
//! | [`PlainMap`] | otherwise |

mod concurrent;
mod expiring;
mod plain;
mod transactional;

pub use concurrent::ConcurrentMap;
pub use expiring::ExpiringMap;
pub use plain::PlainMap;
pub use transactional::{TransactionalMap, TransactionalStore};
