// =============================================================================
// Market data ingestion and subscription-control core — entry point
// =============================================================================
//
// Brings up the message bus, the state->subscription bridge, and one
// ingestion process per upstream channel, then waits for Ctrl+C/SIGTERM to
// shut everything down in reverse dependency order. The subsystems
// themselves live in the library crate (`src/lib.rs`) so integration tests
// can drive them without going through `main`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use market_core::bridge::StateSubscriptionBridge;
use market_core::buffers::SymbolBuffers;
use market_core::bus::MessageBus;
use market_core::config::EngineConfig;
use market_core::health::HealthRegistry;
use market_core::ingestion::IngestionProcess;
use market_core::registry::SymbolRegistry;
use market_core::types::ChannelTag;
use market_core::ws::MarketDataWsClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("market-core starting up");

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal: invalid configuration");
            std::process::exit(1);
        }
    };

    let bus = Arc::new(MessageBus::new(config.bus_recent_capacity));
    let health = Arc::new(HealthRegistry::new());
    let registry = Arc::new(SymbolRegistry::new());
    let buffers = Arc::new(SymbolBuffers::new(config.trade_buffer_capacity, config.quote_buffer_capacity));

    let bridge = match StateSubscriptionBridge::with_timings(
        Arc::clone(&bus),
        Arc::clone(&health),
        Arc::clone(&registry),
        config.database_url.clone(),
        config.db_schema.clone(),
        config.chart_ttl,
        config.debounce,
    ) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(error = %e, "fatal: could not initialize database pool");
            std::process::exit(1);
        }
    };
    bridge.start();

    let tick_ws = MarketDataWsClient::new(
        config.ws_url.clone(),
        config.api_key.clone(),
        config.max_backoff,
        config.send_queue_bound,
    );
    let tick_process = IngestionProcess::new(
        ChannelTag::Trade,
        Arc::clone(&tick_ws),
        Arc::clone(&bus),
        Arc::clone(&health),
        Arc::clone(&registry),
        Arc::clone(&buffers),
        config.trade_queue_capacity,
        config.workers_per_channel,
    );
    tick_process.start();

    let quote_ws = MarketDataWsClient::new(
        config.ws_url.clone(),
        config.api_key.clone(),
        config.max_backoff,
        config.send_queue_bound,
    );
    let quote_process = IngestionProcess::new(
        ChannelTag::Quote,
        Arc::clone(&quote_ws),
        Arc::clone(&bus),
        Arc::clone(&health),
        Arc::clone(&registry),
        Arc::clone(&buffers),
        config.quote_queue_capacity,
        config.workers_per_channel,
    );
    quote_process.start();

    info!(
        trade_queue_capacity = config.trade_queue_capacity,
        quote_queue_capacity = config.quote_queue_capacity,
        workers_per_channel = config.workers_per_channel,
        "all subsystems running; press Ctrl+C to stop"
    );

    wait_for_shutdown_signal().await;
    warn!("shutdown signal received; stopping gracefully");

    tick_process.shutdown();
    quote_process.shutdown();
    bridge.shutdown();

    // Give in-flight work a moment to drain before the process exits.
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("market-core shut down complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler; falling back to Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
