//! Market Data Relay Binary
//!
//! Starts the relay, the downstream WebSocket server and the health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-data-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Upstream
//! - `MARKET_DATA_ENABLED`: Connect upstream at all (default: true)
//! - `ALPACA_KEY` / `ALPACA_SECRET`: API credentials (missing values park the provider in `error`)
//! - `ALPACA_FEED`: "sip" | "iex" | "delayed_sip" (default: sip)
//! - `MARKET_DATA_STREAM_URL`: Full stream URL override
//! - `MARKET_DATA_REST_URL`: Historical API base (default: <https://data.alpaca.markets>)
//! - `MARKET_DATA_SYMBOLS`: Comma-separated seed symbols
//!
//! ## Relay
//! - `RELAY_RECONNECT_MIN_MS` / `RELAY_RECONNECT_MAX_MS`: Backoff bounds (default: 1000 / 30000)
//! - `RELAY_STALE_AFTER_MS`: Per-symbol staleness threshold (default: 15000)
//! - `RELAY_STATUS_INTERVAL_MS`: Freshness broadcast period (default: 1000, min 250)
//! - `RELAY_SUBSCRIBE_DEBOUNCE_MS`: Subscription coalescing delay (default: 250)
//! - `BACKFILL_ENABLED` / `BACKFILL_MAX_WINDOW_MS` / `BACKFILL_LIMIT`
//! - `RELAY_CLIENT_HEARTBEAT_SECS` / `RELAY_CLIENT_BUFFER`
//! - `RELAY_WS_PORT`: Downstream WebSocket port (default: 8787)
//! - `RELAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//!
//! ## Observability
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use market_data_relay::application::ports::{TradeHistoryPort, UpstreamConnector};
use market_data_relay::application::services::{
    BackfillConfig, GapRepair, Relay, RelayOptions,
};
use market_data_relay::infrastructure::alpaca::{
    AlpacaHistoryClient, AlpacaStreamConnector, HeartbeatConfig, ReconnectConfig,
};
use market_data_relay::infrastructure::telemetry;
use market_data_relay::{HealthServer, RelayConfig, WsServer, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Historical API request timeout.
const REST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP export)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Data Relay");

    // Initialize Prometheus metrics
    init_metrics()?;

    let config = RelayConfig::from_env();
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Upstream adapters; invalid configuration is reported through provider status
    let validation = config.upstream.validate();
    let (connector, history) = match &validation {
        Ok(credentials) => {
            let connector: Arc<dyn UpstreamConnector> = Arc::new(AlpacaStreamConnector::new(
                config.upstream.stream_url(),
                credentials.clone(),
                HeartbeatConfig::new(
                    config.reconnect.ping_interval,
                    config.reconnect.pong_timeout,
                ),
            ));
            let http = reqwest::Client::builder().timeout(REST_TIMEOUT).build()?;
            let history: Arc<dyn TradeHistoryPort> = Arc::new(AlpacaHistoryClient::new(
                http,
                config.upstream.rest_url.clone(),
                credentials.clone(),
                config.upstream.feed,
            ));
            (Some(connector), Some(history))
        }
        Err(_) => (None, None),
    };

    let gap_repair = history.map(|history| {
        GapRepair::new(
            history,
            BackfillConfig {
                enabled: config.backfill.enabled,
                max_window_ms: config.backfill.max_window_ms,
                limit: config.backfill.limit,
            },
        )
    });

    let options = RelayOptions {
        enabled: config.upstream.enabled,
        feed: config.upstream.feed,
        seed_symbols: config.upstream.seed_symbols.clone(),
        reconnect: ReconnectConfig::from_settings(&config.reconnect),
        stale_after_ms: config.freshness.stale_after_ms,
        status_interval: config.freshness.status_interval,
        subscribe_debounce: config.subscribe_debounce,
        client_buffer: config.clients.buffer,
    };

    let relay = Relay::new(options, connector, gap_repair, shutdown_token.child_token());
    let handle = relay.handle();
    let relay_task = relay.start(validation.map(|_| ()));

    // Spawn health server
    let health_server = HealthServer::new(
        config.server.health_port,
        handle.board().clone(),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn downstream WebSocket server
    let ws_server = WsServer::new(
        config.server.ws_port,
        handle,
        HeartbeatConfig::one_interval(config.clients.heartbeat_interval),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = ws_server.run().await {
            tracing::error!(error = %e, "WebSocket server error");
        }
    });

    tracing::info!("Market data relay ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, relay_task).await.is_err() {
        tracing::warn!("Relay did not stop within the shutdown timeout");
    }

    tracing::info!("Market data relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        enabled = config.upstream.enabled,
        feed = config.upstream.feed.as_str(),
        seed_symbols = ?config.upstream.seed_symbols,
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        backfill = config.backfill.enabled,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.upstream.stream_url(),
        rest_url = %config.upstream.rest_url,
        "Upstream endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
