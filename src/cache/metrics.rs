//! Cache Metrics Collection
//!
//! Per-cache counters for monitoring hit rates and resolver load.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Lookup metrics
    hits: AtomicU64,
    misses: AtomicU64,

    // Resolver metrics
    resolves: AtomicU64,
    resolve_errors: AtomicU64,
    absent_resolves: AtomicU64,
    lost_races: AtomicU64,

    // Invalidation metrics
    invalidations: AtomicU64,
    dirty_marks: AtomicU64,

    // Resolve latency (microseconds, using exponential moving average)
    resolve_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Record a completed resolver call
    pub fn record_resolve(&self, duration: Duration) {
        self.resolves.fetch_add(1, Ordering::Relaxed);
        self.update_latency_ema(&self.resolve_latency_us, duration);
    }

    pub fn record_resolve_error(&self) {
        self.resolve_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Resolver returned no value for a key
    pub fn record_absent_resolve(&self) {
        self.absent_resolves.fetch_add(1, Ordering::Relaxed);
    }

    /// A resolved value lost the insert race to a concurrent resolve
    pub fn record_lost_race(&self) {
        self.lost_races.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dirty_mark(&self) {
        self.dirty_marks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolves(&self) -> u64 {
        self.resolves.load(Ordering::Relaxed)
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn resolve_latency(&self) -> Duration {
        Duration::from_micros(self.resolve_latency_us.load(Ordering::Relaxed))
    }

    /// Get snapshot of all metrics. `entries` and `strategy` come from the
    /// backing map.
    pub fn snapshot(&self, entries: usize, strategy: &'static str) -> MetricsSnapshot {
        MetricsSnapshot {
            strategy,
            entries: entries as u64,
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            resolves: self.resolves(),
            resolve_errors: self.resolve_errors.load(Ordering::Relaxed),
            absent_resolves: self.absent_resolves.load(Ordering::Relaxed),
            lost_races: self.lost_races.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            dirty_marks: self.dirty_marks.load(Ordering::Relaxed),
            resolve_latency: self.resolve_latency(),
            permit_waits: 0,
            permit_bypasses: 0,
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.resolves.store(0, Ordering::Relaxed);
        self.resolve_errors.store(0, Ordering::Relaxed);
        self.absent_resolves.store(0, Ordering::Relaxed);
        self.lost_races.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.dirty_marks.store(0, Ordering::Relaxed);
        self.resolve_latency_us.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of a cache's metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub strategy: &'static str,
    pub entries: u64,

    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,

    pub resolves: u64,
    pub resolve_errors: u64,
    pub absent_resolves: u64,
    pub lost_races: u64,

    pub invalidations: u64,
    pub dirty_marks: u64,

    pub resolve_latency: Duration,

    // Filled in by the bounded-resolve wrapper
    pub permit_waits: u64,
    pub permit_bypasses: u64,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
