//! MicroBank Node Binary
//!
//! Wires the ledger engine to PostgreSQL, the quote API and the notification
//! queue, then runs until Ctrl+C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use microbank_common::CurrencyCode;
use microbank_fx::{
    CacheSweep, CachedRateResolver, HttpQuoteSource, MemoryRateCache, PgRateCache, RateCache,
    ResolverConfig,
};
use microbank_ledger::{BalanceStore, ChannelNotifier, LedgerEngine, PgBalanceStore};
use microbank_node::{
    run_cache_eviction, run_dispatcher, CacheBackend, LoggingMailDelivery, NodeConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting MicroBank node");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }
    let currencies = config.currencies().map_err(anyhow::Error::msg)?;

    let store = PgBalanceStore::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.acquire_timeout,
    )
    .await
    .context("connecting to database")?
    .with_lock_timeout(config.database.lock_timeout);
    store.migrate().await.context("running migrations")?;

    let codes: Vec<CurrencyCode> = currencies.iter().cloned().collect();
    store
        .seed_currencies(&codes)
        .await
        .context("seeding currencies")?;
    info!(currencies = ?codes, "Currency table ready");

    let source = HttpQuoteSource::new(
        config.quote_api.url.clone(),
        config.quote_api.api_key.clone(),
        config.quote_api.timeout,
    )?;
    let (cache, sweeper): (Arc<dyn RateCache>, Arc<dyn CacheSweep>) = match config.cache.backend {
        CacheBackend::Memory => {
            let cache = Arc::new(MemoryRateCache::new());
            (cache.clone() as Arc<dyn RateCache>, cache as Arc<dyn CacheSweep>)
        }
        CacheBackend::Postgres => {
            let cache = PgRateCache::connect(&config.database.url, 2, config.database.acquire_timeout)
                .await
                .context("connecting rate cache")?;
            cache.ensure_table().await.context("creating rate cache table")?;
            let cache = Arc::new(cache);
            (cache.clone() as Arc<dyn RateCache>, cache as Arc<dyn CacheSweep>)
        }
    };
    let resolver = CachedRateResolver::new(
        Arc::new(source),
        cache,
        ResolverConfig {
            ttl: config.cache.key_ttl,
            supported: currencies,
        },
    );

    let (notifier, queue) = ChannelNotifier::channel(config.notify_queue_capacity);
    let engine = Arc::new(LedgerEngine::new(
        Arc::new(store),
        Arc::new(resolver),
        Arc::new(notifier),
    ));

    let dispatcher = tokio::spawn(run_dispatcher(queue, Arc::new(LoggingMailDelivery)));
    let (stop, shutdown) = watch::channel(false);
    let eviction = tokio::spawn(run_cache_eviction(
        sweeper,
        config.cache.cleanup_interval,
        shutdown,
    ));

    info!(
        cache_backend = ?config.cache.backend,
        lock_timeout_ms = config.database.lock_timeout.as_millis() as u64,
        rate_ttl_secs = config.cache.key_ttl.as_secs(),
        notify_queue_capacity = config.notify_queue_capacity,
        "Ledger engine ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl+C")?;
    info!("Shutdown signal received");

    // Dropping the engine closes the notification queue; the dispatcher
    // delivers what is left and exits.
    drop(engine);
    stop.send_replace(true);

    if let Err(e) = dispatcher.await {
        error!(error = %e, "Notification dispatcher failed");
    }
    if let Err(e) = eviction.await {
        error!(error = %e, "Cache eviction task failed");
    }

    info!("MicroBank node shutdown complete");
    Ok(())
}
