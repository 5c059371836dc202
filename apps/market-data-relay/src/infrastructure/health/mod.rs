//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, provider status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON relay status (always 200 while the process is up)
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (200 only while `subscribed`)
//! - `GET /metrics` - Prometheus metrics in text format

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::Utc;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{RelaySnapshot, StatusBoard};
use crate::domain::provider::{ConnectionState, ProviderStatus};
use crate::domain::streaming::{EpochMillis, Symbol};
use crate::infrastructure::metrics::get_metrics_handle;

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "market-data-relay";

// =============================================================================
// Health Response Types
// =============================================================================

/// `/health` response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Process is up.
    pub ok: bool,
    /// Service name.
    pub service: &'static str,
    /// Server time (epoch ms).
    pub now: EpochMillis,
    /// Connected downstream clients.
    pub connected_clients: usize,
    /// Size of the desired symbol set.
    pub tracked_symbol_count: usize,
    /// Upstream provider status.
    pub provider_status: ProviderStatus,
    /// Freshness summary.
    pub freshness: FreshnessSummary,
}

/// Freshness section of [`HealthResponse`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessSummary {
    /// Staleness threshold.
    pub stale_after_ms: i64,
    /// Desired symbols.
    pub tracked_symbols: Vec<Symbol>,
    /// How many of them are stale.
    pub stale_count: usize,
    /// Last arrival per symbol.
    pub last_seen_at_by_symbol: BTreeMap<Symbol, Option<EpochMillis>>,
}

impl HealthResponse {
    /// Build from a published relay snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: RelaySnapshot, now: EpochMillis) -> Self {
        let stale_count = snapshot.stale_count(now);
        Self {
            ok: true,
            service: SERVICE_NAME,
            now,
            connected_clients: snapshot.connected_clients,
            tracked_symbol_count: snapshot.tracked_symbols(),
            provider_status: snapshot.provider_status,
            freshness: FreshnessSummary {
                stale_after_ms: snapshot.stale_after_ms,
                tracked_symbols: snapshot.last_seen_at_by_symbol.keys().cloned().collect(),
                stale_count,
                last_seen_at_by_symbol: snapshot.last_seen_at_by_symbol,
            },
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
#[derive(Debug)]
pub struct HealthServer {
    port: u16,
    board: StatusBoard,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, board: StatusBoard, cancel: CancellationToken) -> Self {
        Self {
            port,
            board,
            cancel,
        }
    }

    /// The health router.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.board.clone())
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = self.router();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(board): State<StatusBoard>) -> impl IntoResponse {
    let now = Utc::now().timestamp_millis();
    (StatusCode::OK, Json(HealthResponse::from_snapshot(board.read(), now)))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(board): State<StatusBoard>) -> impl IntoResponse {
    if board.read().provider_status.state == ConnectionState::Subscribed {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
