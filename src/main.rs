//! memocache workload driver
//!
//! Builds a cache from command-line options (or a JSON settings file), runs
//! a concurrent read workload against it with a slow resolver, and prints
//! the resulting metrics.
//!
//! ```text
//! worker threads ──get/get_all──► cache ──miss──► resolver (sleeps)
//!                 ──invalidate──►   │
//!                                   └──► PrometheusExporter ─► stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use memocache::adapters::LoggingInvalidationChannel;
use memocache::{Cache, CacheBuilder, CacheRegistry, CacheSettings, EntryFilter, PrometheusExporter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// memocache - run a concurrent resolve-on-miss workload
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache id
    #[arg(long, env = "MEMOCACHE_CACHE_ID", default_value = "workload")]
    cache_id: String,

    /// JSON cache settings file; command-line bounds are ignored when set
    #[arg(long, env = "MEMOCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Worker threads
    #[arg(long, env = "MEMOCACHE_THREADS", default_value = "8")]
    threads: usize,

    /// Requests per worker thread
    #[arg(long, env = "MEMOCACHE_REQUESTS", default_value = "1000")]
    requests: usize,

    /// Number of distinct keys
    #[arg(long, env = "MEMOCACHE_KEY_SPACE", default_value = "256")]
    key_space: u64,

    /// Simulated resolver latency in milliseconds
    #[arg(long, env = "MEMOCACHE_RESOLVE_LATENCY_MS", default_value = "2")]
    resolve_latency_ms: u64,

    /// Maximum concurrent resolves (0 = unbounded)
    #[arg(long, env = "MEMOCACHE_MAX_CONCURRENT_RESOLVE", default_value = "4")]
    max_concurrent_resolve: usize,

    /// LRU size bound (0 = unbounded)
    #[arg(long, env = "MEMOCACHE_SIZE_BOUND", default_value = "0")]
    size_bound: usize,

    /// Entry time-to-live in milliseconds (0 = no expiry)
    #[arg(long, env = "MEMOCACHE_TTL_MS", default_value = "0")]
    ttl_ms: u64,

    /// Invalidate one key every N requests per thread (0 = never)
    #[arg(long, env = "MEMOCACHE_INVALIDATE_EVERY", default_value = "100")]
    invalidate_every: usize,

    /// Print Prometheus exposition after the run
    #[arg(long, env = "MEMOCACHE_PRINT_METRICS")]
    print_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting memocache workload");
    info!("  Threads: {}", args.threads);
    info!("  Requests per thread: {}", args.requests);
    info!("  Key space: {}", args.key_space);
    info!("  Resolve latency: {}ms", args.resolve_latency_ms);

    let registry = CacheRegistry::new();
    let cache = build_cache(&args, &registry)?;

    let started = Instant::now();
    run_workload(&args, Arc::clone(&cache))?;
    let elapsed = started.elapsed();

    let snapshot = cache.metrics();
    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        hits = snapshot.hits,
        misses = snapshot.misses,
        resolves = snapshot.resolves,
        permit_waits = snapshot.permit_waits,
        "Workload finished"
    );
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if args.print_metrics {
        let exporter = PrometheusExporter::new()?;
        print!("{}", exporter.render(&registry)?);
    }

    Ok(())
}

fn build_cache(args: &Args, registry: &CacheRegistry) -> anyhow::Result<Arc<dyn Cache<u64, String>>> {
    let latency = Duration::from_millis(args.resolve_latency_ms);
    let mut builder = CacheBuilder::<u64, String>::new()
        .with_cache_id(args.cache_id.clone())
        .with_resolve_fn(move |key: &u64| {
            thread::sleep(latency);
            Ok(Some(format!("value-{}", key)))
        })
        .with_invalidation_channel(Arc::new(LoggingInvalidationChannel::debug_level()));

    if let Some(path) = &args.config {
        let settings = CacheSettings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        builder = settings.apply(builder)?;
    } else {
        if args.max_concurrent_resolve > 0 {
            builder = builder.with_max_concurrent_resolve(args.max_concurrent_resolve)?;
        }
        if args.size_bound > 0 {
            builder = builder.with_size_bound(args.size_bound)?;
        }
        if args.ttl_ms > 0 {
            builder = builder.with_time_to_live(Duration::from_millis(args.ttl_ms), false);
        }
    }

    info!("  Strategy: {}", builder.map_strategy());
    Ok(builder.build(registry)?)
}

fn run_workload(args: &Args, cache: Arc<dyn Cache<u64, String>>) -> anyhow::Result<()> {
    let key_space = args.key_space.max(1);
    let requests = args.requests;
    let invalidate_every = args.invalidate_every;

    let handles: Vec<_> = (0..args.threads as u64)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || -> memocache::Result<()> {
                for i in 0..requests as u64 {
                    let key = (worker.wrapping_mul(7919) + i.wrapping_mul(31)) % key_space;
                    if i % 10 == 0 {
                        let batch: Vec<u64> = (0..4).map(|n| (key + n) % key_space).collect();
                        cache.get_all(&batch)?;
                    } else {
                        cache.get(&key)?;
                    }
                    if invalidate_every > 0 && (i as usize + 1) % invalidate_every == 0 {
                        cache.invalidate(&EntryFilter::key(key), true);
                    }
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))??;
    }
    Ok(())
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
