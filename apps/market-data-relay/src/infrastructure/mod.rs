//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the downstream and HTTP surfaces.

/// Alpaca stock stream and historical data adapters.
pub mod alpaca;

/// Per-client filtered fan-out.
pub mod broadcast;

/// Configuration from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Downstream WebSocket server and client protocol.
pub mod ws;
