//! Metrics module
//!
//! Renders the metrics of every registered cache in the Prometheus text
//! exposition format. Values are copied from [`MetricsSnapshot`]s at render
//! time, so every series is a gauge labelled with `cache_id`.

use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

use crate::cache::metrics::MetricsSnapshot;
use crate::cache::registry::CacheRegistry;
use crate::error::{Error, Result};

const NAMESPACE: &str = "memocache";

/// Prometheus exporter over a [`CacheRegistry`].
pub struct PrometheusExporter {
    registry: Registry,
    entries: IntGaugeVec,
    hits: IntGaugeVec,
    misses: IntGaugeVec,
    resolves: IntGaugeVec,
    resolve_errors: IntGaugeVec,
    lost_races: IntGaugeVec,
    invalidations: IntGaugeVec,
    dirty_marks: IntGaugeVec,
    permit_waits: IntGaugeVec,
    permit_bypasses: IntGaugeVec,
    hit_ratio: GaugeVec,
    resolve_latency_seconds: GaugeVec,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let exporter = Self {
            entries: int_gauge(&registry, "entries", "Entries currently cached")?,
            hits: int_gauge(&registry, "hits", "Lookups served from the cache")?,
            misses: int_gauge(&registry, "misses", "Lookups that required a resolve")?,
            resolves: int_gauge(&registry, "resolves", "Resolver invocations")?,
            resolve_errors: int_gauge(&registry, "resolve_errors", "Resolver invocations that failed")?,
            lost_races: int_gauge(&registry, "lost_races", "Resolved values discarded because another insert won")?,
            invalidations: int_gauge(&registry, "invalidations", "Invalidate calls")?,
            dirty_marks: int_gauge(&registry, "dirty_marks", "Pending transactional inserts marked stale")?,
            permit_waits: int_gauge(&registry, "permit_waits", "Resolves that waited for a permit")?,
            permit_bypasses: int_gauge(&registry, "permit_bypasses", "Resolves that proceeded without a permit")?,
            hit_ratio: gauge(&registry, "hit_ratio", "Hits divided by lookups")?,
            resolve_latency_seconds: gauge(&registry, "resolve_latency_seconds", "Smoothed resolve latency")?,
            registry,
        };
        Ok(exporter)
    }

    /// Refresh all series from `caches` and encode them.
    pub fn render(&self, caches: &CacheRegistry) -> Result<String> {
        self.reset();
        for cache in caches.caches() {
            self.observe(cache.cache_id(), &cache.metrics());
        }

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| Error::Metrics(format!("Failed to encode metrics: {}", e)))?;

        debug!(caches = caches.len(), bytes = buffer.len(), "Rendered metrics");
        String::from_utf8(buffer).map_err(|e| Error::Metrics(e.to_string()))
    }

    fn observe(&self, cache_id: &str, snapshot: &MetricsSnapshot) {
        let labels = &[cache_id];
        set(&self.entries, labels, snapshot.entries);
        set(&self.hits, labels, snapshot.hits);
        set(&self.misses, labels, snapshot.misses);
        set(&self.resolves, labels, snapshot.resolves);
        set(&self.resolve_errors, labels, snapshot.resolve_errors);
        set(&self.lost_races, labels, snapshot.lost_races);
        set(&self.invalidations, labels, snapshot.invalidations);
        set(&self.dirty_marks, labels, snapshot.dirty_marks);
        set(&self.permit_waits, labels, snapshot.permit_waits);
        set(&self.permit_bypasses, labels, snapshot.permit_bypasses);
        self.hit_ratio.with_label_values(labels).set(snapshot.hit_ratio);
        self.resolve_latency_seconds
            .with_label_values(labels)
            .set(snapshot.resolve_latency.as_secs_f64());
    }

    // Drop series of caches that were replaced or never rendered again
    fn reset(&self) {
        for vec in [
            &self.entries,
            &self.hits,
            &self.misses,
            &self.resolves,
            &self.resolve_errors,
            &self.lost_races,
            &self.invalidations,
            &self.dirty_marks,
            &self.permit_waits,
            &self.permit_bypasses,
        ] {
            vec.reset();
        }
        self.hit_ratio.reset();
        self.resolve_latency_seconds.reset();
    }
}

fn set(vec: &IntGaugeVec, labels: &[&str], value: u64) {
    vec.with_label_values(labels).set(value.min(i64::MAX as u64) as i64);
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGaugeVec> {
    let vec = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["cache_id"])
        .map_err(|e| Error::Metrics(format!("Failed to create {}: {}", name, e)))?;
    registry
        .register(Box::new(vec.clone()))
        .map_err(|e| Error::Metrics(format!("Failed to register {}: {}", name, e)))?;
    Ok(vec)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<GaugeVec> {
    let vec = GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["cache_id"])
        .map_err(|e| Error::Metrics(format!("Failed to create {}: {}", name, e)))?;
    registry
        .register(Box::new(vec.clone()))
        .map_err(|e| Error::Metrics(format!("Failed to register {}: {}", name, e)))?;
    Ok(vec)
}
