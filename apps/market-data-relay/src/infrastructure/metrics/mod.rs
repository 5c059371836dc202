//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: received from upstream, dropped, fanned out to clients
//! - **Clients**: connected count and frames dropped for slow clients
//! - **Upstream**: connection state, connect attempts, disconnects
//! - **Backfill**: replayed ticks and fetch failures
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::provider::ConnectionState;
use crate::domain::streaming::{CanonicalTick, TickSource};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Tick counters
    describe_counter!(
        "relay_ticks_received_total",
        "Ticks accepted from upstream or backfill, by kind and source"
    );
    describe_counter!(
        "relay_ticks_dropped_total",
        "Ticks discarded before fan-out, by reason"
    );
    describe_counter!(
        "relay_md_frames_sent_total",
        "md frames queued to clients"
    );

    // Client gauges/counters
    describe_gauge!(
        "relay_connected_clients",
        "Number of connected downstream clients"
    );
    describe_gauge!(
        "relay_tracked_symbols",
        "Size of the desired upstream symbol set"
    );
    describe_counter!(
        "relay_client_frames_dropped_total",
        "Frames dropped because a client's outbound queue was full"
    );

    // Upstream
    describe_gauge!(
        "relay_upstream_state",
        "Upstream connection state (0=disabled .. 6=error)"
    );
    describe_counter!(
        "relay_upstream_connect_attempts_total",
        "Upstream connection attempts"
    );
    describe_counter!(
        "relay_upstream_disconnects_total",
        "Upstream connection losses by resulting state"
    );

    // Backfill
    describe_counter!(
        "relay_backfill_ticks_total",
        "Ticks replayed by gap repair"
    );
    describe_counter!(
        "relay_backfill_failures_total",
        "Per-symbol gap repair fetch failures"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a tick never reached clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Provider was not `subscribed`.
    NotSubscribed,
    /// Tick came from a superseded connection.
    StaleConnection,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::NotSubscribed => "not_subscribed",
            Self::StaleConnection => "stale_connection",
        }
    }
}

fn as_count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

#[allow(clippy::cast_precision_loss)]
fn as_gauge(n: usize) -> f64 {
    n as f64
}

/// Record a tick accepted for fan-out.
pub fn record_tick_received(tick: &CanonicalTick) {
    let source = match tick.source() {
        TickSource::AlpacaStream => "stream",
        TickSource::AlpacaRest => "backfill",
    };
    counter!(
        "relay_ticks_received_total",
        "kind" => tick.kind(),
        "source" => source
    )
    .increment(1);
}

/// Record a tick dropped before fan-out.
pub fn record_tick_dropped(reason: DropReason) {
    counter!("relay_ticks_dropped_total", "reason" => reason.as_str()).increment(1);
}

/// Record md frames queued to clients.
pub fn record_md_sent(count: usize) {
    counter!("relay_md_frames_sent_total").increment(as_count(count));
}

/// Update the connected client count.
pub fn set_connected_clients(count: usize) {
    gauge!("relay_connected_clients").set(as_gauge(count));
}

/// Update the desired symbol count.
pub fn set_tracked_symbols(count: usize) {
    gauge!("relay_tracked_symbols").set(as_gauge(count));
}

/// Record a frame dropped for a slow client.
pub fn record_client_frame_dropped() {
    counter!("relay_client_frames_dropped_total").increment(1);
}

/// Update the upstream state gauge.
pub fn set_upstream_state(state: ConnectionState) {
    gauge!("relay_upstream_state").set(state.as_gauge());
}

/// Record an upstream connection attempt.
pub fn record_connect_attempt() {
    counter!("relay_upstream_connect_attempts_total").increment(1);
}

/// Record an upstream connection loss.
pub fn record_disconnect(state: ConnectionState) {
    counter!("relay_upstream_disconnects_total", "state" => state.as_str()).increment(1);
}

/// Record ticks replayed by one backfill run.
pub fn record_backfill_ticks(count: usize) {
    counter!("relay_backfill_ticks_total").increment(as_count(count));
}

/// Record a per-symbol backfill failure.
pub fn record_backfill_failure() {
    counter!("relay_backfill_failures_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::NotSubscribed.as_str(), "not_subscribed");
        assert_eq!(DropReason::StaleConnection.as_str(), "stale_connection");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_tick_dropped(DropReason::NotSubscribed);
        record_md_sent(3);
        set_connected_clients(2);
        set_upstream_state(ConnectionState::Subscribed);
    }

    #[test]
    fn counts_saturate() {
        assert_eq!(as_count(7), 7);
        assert!((as_gauge(3) - 3.0).abs() < f64::EPSILON);
    }
}
