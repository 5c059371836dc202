//! Heartbeat Monitor
//!
//! Ping/pong liveness tracking for a single WebSocket connection. The
//! connection task owns the monitor, drives it from a `tokio::time::interval`
//! and reports pongs; the monitor decides when to ping and when the peer has
//! gone quiet for too long.
//!
//! Used for the upstream transport and for every downstream client socket.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Smallest period handed to `tokio::time::interval`.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Timeout for pong response before connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// A peer must answer each ping before the next one is due.
    #[must_use]
    pub const fn one_interval(ping_interval: Duration) -> Self {
        Self::new(ping_interval, ping_interval)
    }

    /// Ticker for the owning task; missed ticks are skipped.
    ///
    /// A zero `ping_interval` is raised to one millisecond.
    #[must_use]
    pub fn interval(&self) -> Interval {
        let period = self.ping_interval.max(MIN_PING_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }
}

/// What the owning task should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// Still waiting for a pong within the timeout; do nothing.
    Wait,
    /// No pong within the timeout; close the connection.
    TimedOut,
}

/// Liveness state for one connection.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    ping_sent_at: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Create a monitor with no ping outstanding.
    #[must_use]
    pub const fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            ping_sent_at: None,
        }
    }

    /// Decide what to do on a tick at `now`.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        match self.ping_sent_at {
            Some(sent) if now.duration_since(sent) >= self.config.pong_timeout => {
                tracing::warn!(
                    elapsed_ms = u64::try_from(now.duration_since(sent).as_millis())
                        .unwrap_or(u64::MAX),
                    timeout_ms = u64::try_from(self.config.pong_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    "Heartbeat timeout detected"
                );
                HeartbeatAction::TimedOut
            }
            Some(_) => HeartbeatAction::Wait,
            None => {
                self.ping_sent_at = Some(now);
                HeartbeatAction::SendPing
            }
        }
    }

    /// Record that the peer proved it is alive.
    pub const fn record_pong(&mut self) {
        self.ping_sent_at = None;
    }

    /// Check if we're currently waiting for a pong.
    #[cfg(test)]
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.ping_sent_at.is_some()
    }
}
