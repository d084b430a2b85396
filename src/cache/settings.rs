//! Declarative cache settings loaded from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::builder::CacheBuilder;
use crate::domain::ports::{CacheKey, CacheValue};
use crate::error::{Error, Result};

/// Serializable counterpart of the [`CacheBuilder`] options.
///
/// Numeric bounds are signed so that bad input is reported as a
/// configuration error instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub cache_id: Option<String>,
    pub label: Option<String>,
    pub shared: bool,
    pub thread_safe: bool,
    pub transactional: bool,
    pub transactional_fast_forward: bool,
    pub singleton: bool,
    pub time_to_live_ms: Option<i64>,
    pub touch_on_get: bool,
    pub size_bound: Option<i64>,
    pub max_concurrent_resolve: Option<i64>,
    pub throw_if_exists: bool,
    pub replace_if_exists: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_id: None,
            label: None,
            shared: false,
            thread_safe: true,
            transactional: false,
            transactional_fast_forward: false,
            singleton: false,
            time_to_live_ms: None,
            touch_on_get: false,
            size_bound: None,
            max_concurrent_resolve: None,
            throw_if_exists: true,
            replace_if_exists: false,
        }
    }
}

impl CacheSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading cache settings");
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Reject a negative time-to-live and non-positive bounds. A zero
    /// time-to-live disables time-based expiry.
    pub fn validate(&self) -> Result<()> {
        if let Some(millis) = self.time_to_live_ms {
            if millis < 0 {
                return Err(Error::InvalidTimeToLive { millis });
            }
        }
        if let Some(value) = self.size_bound {
            if value <= 0 {
                return Err(Error::InvalidSizeBound { value });
            }
        }
        if let Some(value) = self.max_concurrent_resolve {
            if value <= 0 {
                return Err(Error::InvalidMaxConcurrentResolve { value });
            }
        }
        if matches!(&self.cache_id, Some(id) if id.trim().is_empty()) {
            return Err(Error::MissingCacheId);
        }
        Ok(())
    }

    /// Copy these settings onto `builder`. The resolver and any wrappers
    /// still come from code.
    pub fn apply<K: CacheKey, V: CacheValue>(&self, builder: CacheBuilder<K, V>) -> Result<CacheBuilder<K, V>> {
        self.validate()?;

        let mut builder = builder
            .with_shared(self.shared)
            .with_thread_safe(self.thread_safe)
            .with_transactional(self.transactional)
            .with_transactional_fast_forward(self.transactional_fast_forward)
            .with_singleton(self.singleton)
            .with_throw_if_exists(self.throw_if_exists)
            .with_replace_if_exists(self.replace_if_exists);

        if let Some(cache_id) = &self.cache_id {
            builder = builder.with_cache_id(cache_id.clone());
        }
        if let Some(label) = &self.label {
            let label = label.clone();
            builder = builder.with_label_supplier(move || label.clone());
        }
        if let Some(millis) = self.time_to_live_ms {
            builder = builder.with_time_to_live(Duration::from_millis(millis as u64), self.touch_on_get);
        }
        if let Some(bound) = self.size_bound {
            builder = builder.with_size_bound(bound as usize)?;
        }
        if let Some(max) = self.max_concurrent_resolve {
            builder = builder.with_max_concurrent_resolve(max as usize)?;
        }
        Ok(builder)
    }
}
