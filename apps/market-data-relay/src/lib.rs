#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Data Relay - Live Feed Fan-out with Freshness Tracking
//!
//! Holds one connection to Alpaca's stock market data stream and
//! re-publishes canonical ticks to many WebSocket clients, each filtered to
//! the symbols that client asked for. Alongside the data it reports
//! provider status and per-symbol staleness, and after a reconnect it
//! replays missed trades from the historical API.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: data types and rules with no I/O
//!   - `streaming`: canonical ticks
//!   - `provider`: provider status and connection states
//!   - `freshness`: per-symbol staleness and the latest-tick cache
//!   - `subscription`: desired-set computation and diffing
//!
//! - **Application**: ports and coordinating services
//!   - `ports`: upstream transport and trade history interfaces
//!   - `services`: the relay task, connection state machine, gap repair
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `alpaca`: stream transport, wire codec, REST history client
//!   - `ws`: downstream `/ws` server and client protocol
//!   - `broadcast`: per-client filtered fan-out
//!   - `health`: `/health`, probes and `/metrics`
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Alpaca stream --> transport task --+
//!                                    |     +-------+     +-----------+
//! Alpaca REST ----> gap repair ------+---->| Relay |---->| ClientHub |--> client 1..N
//!                                    |     +-------+     +-----------+
//! /ws sockets ----> RelayHandle -----+         |
//!                                              +--> StatusBoard --> /health
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::freshness::{FreshnessSnapshot, FreshnessTracker, LatestCache, LatestEntry};
pub use domain::provider::{ConnectionState, DataFeed, ProviderStatus};
pub use domain::streaming::{BackfillMeta, CanonicalTick, EpochMillis, Symbol, TickSource};
pub use domain::subscription::{ClientId, SubscriptionChanges, SubscriptionCoordinator};

// Ports
pub use application::ports::{
    HistoryError, TradeHistoryPort, TransportEnvelope, TransportEvent, UpstreamConnector,
    UpstreamFrame, UpstreamLink, UpstreamRequest,
};

// Services
pub use application::services::{
    BackfillConfig, GapRepair, Relay, RelayError, RelayHandle, RelayOptions, RelaySnapshot,
    StatusBoard,
};

// Infrastructure config
pub use infrastructure::config::{
    BackfillSettings, ClientSettings, ConfigError, FreshnessSettings, ReconnectSettings,
    RelayConfig, ServerSettings, UpstreamSettings,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError};
pub use infrastructure::ws::{ClientMessage, WsServer, WsServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
