//! Error types for the caching engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, registering or using caches
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Builder / Configuration Errors
    // =========================================================================
    /// No cache id was configured
    #[error("Cache id is required")]
    MissingCacheId,

    /// No value resolver was configured
    #[error("Value resolver is required for cache {cache_id}")]
    MissingValueResolver { cache_id: String },

    /// Time-to-live is negative
    #[error("Invalid time-to-live: {millis}ms (must not be negative)")]
    InvalidTimeToLive { millis: i64 },

    /// Resolve concurrency bound is negative or zero
    #[error("Invalid max concurrent resolve: {value} (must be positive)")]
    InvalidMaxConcurrentResolve { value: i64 },

    /// Size bound is negative or zero
    #[error("Invalid size bound: {value} (must be positive)")]
    InvalidSizeBound { value: i64 },

    /// A custom wrapper factory failed
    #[error("Failed to construct cache wrapper '{wrapper}': {reason}")]
    WrapperConstruction { wrapper: String, reason: String },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Id collision under the throw policy
    #[error("Cache already registered: {cache_id}")]
    CacheAlreadyExists { cache_id: String },

    /// Lookup of an unknown cache id
    #[error("Cache not found: {cache_id}")]
    CacheNotFound { cache_id: String },

    /// Cache exists but with different key/value types
    #[error("Cache {cache_id} is registered with different key/value types")]
    CacheTypeMismatch { cache_id: String },

    // =========================================================================
    // Resolver Errors
    // =========================================================================
    /// Resolver failure described by a message
    #[error("Resolve failed: {0}")]
    Resolve(String),

    /// Resolver failure carrying the application error
    #[error("Value resolver failed: {0}")]
    Resolver(#[source] Box<dyn std::error::Error + Send + Sync>),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Invalidation notification could not be delivered
    #[error("Invalidation notification failed: {0}")]
    Notification(String),

    /// Prometheus exposition error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an application error raised by a value resolver
    pub fn resolver<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Resolver(Box::new(err))
    }

    /// Returns true for errors raised while configuring a cache
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::MissingCacheId
                | Error::MissingValueResolver { .. }
                | Error::InvalidTimeToLive { .. }
                | Error::InvalidMaxConcurrentResolve { .. }
                | Error::InvalidSizeBound { .. }
                | Error::WrapperConstruction { .. }
                | Error::Config(_)
                | Error::CacheAlreadyExists { .. }
        )
    }
}
