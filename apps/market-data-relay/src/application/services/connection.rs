//! Upstream Connection Manager
//!
//! Explicit state machine for the single upstream connection. Every input
//! (start, transport event, retry timer) is a method returning the
//! [`UpstreamAction`]s the owner must perform. The manager does no I/O and
//! owns no timers.
//!
//! ```text
//! start --> connecting --Opened--> connected --Authenticated--> authorized
//!               ^                                                   |
//!               | retry timer                               Subscribed ack
//!               |                                                   v
//!       reconnecting / error <---- Closed / Error frame ----- subscribed
//! ```
//!
//! Each attempt carries a generation number. Events from any generation
//! other than the live one are dropped.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::application::ports::{TransportEnvelope, TransportEvent, UpstreamFrame, UpstreamRequest};
use crate::domain::provider::{ConnectionState, DataFeed, ProviderStatus};
use crate::infrastructure::alpaca::auth::AuthError;
use crate::infrastructure::alpaca::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::metrics;

/// Side effect requested by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamAction {
    /// Open a new transport tagged with `generation`.
    Connect {
        /// Generation of the new attempt.
        generation: u64,
    },
    /// Write a request on the live transport.
    Send(UpstreamRequest),
    /// Arm the subscription coordinator and push the desired set now.
    ApplySubscription,
    /// Forget the applied subscription and disarm the coordinator.
    ClearAppliedSubscription,
    /// Close the live transport.
    Teardown,
    /// Fire [`ConnectionManager::on_retry_timer`] after the delay.
    ScheduleRetry(Duration),
    /// Replay missed trades for the outage.
    TriggerBackfill {
        /// Start of the outage.
        disconnect_at: DateTime<Utc>,
        /// When the subscription was restored.
        reconnected_at: DateTime<Utc>,
    },
    /// Provider status changed in a way clients should hear about.
    StatusChanged,
}

/// Owns [`ProviderStatus`] and drives it through the connection lifecycle.
#[derive(Debug)]
pub struct ConnectionManager {
    status: ProviderStatus,
    policy: ReconnectPolicy,
    generation: u64,
    live_generation: Option<u64>,
    halted: bool,
}

impl ConnectionManager {
    /// Create a manager in `disabled`.
    #[must_use]
    pub const fn new(
        enabled: bool,
        feed: DataFeed,
        reconnect: ReconnectConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: ProviderStatus::new(enabled, feed, now),
            policy: ReconnectPolicy::new(reconnect),
            generation: 0,
            live_generation: None,
            halted: false,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> &ProviderStatus {
        &self.status
    }

    /// Generation of the live attempt, if any.
    #[must_use]
    pub const fn live_generation(&self) -> Option<u64> {
        self.live_generation
    }

    /// Whether ticks may be forwarded.
    #[must_use]
    pub const fn accepts_ticks(&self) -> bool {
        self.status.accepts_ticks()
    }

    /// Stamp the arrival of a forwarded tick.
    pub fn record_event(&mut self, now: DateTime<Utc>) {
        self.status.last_event_at = Some(now);
    }

    /// Update provider-level staleness. Returns `true` if it flipped.
    pub const fn set_stale(&mut self, is_stale: bool) -> bool {
        if self.status.is_stale == is_stale {
            return false;
        }
        self.status.is_stale = is_stale;
        true
    }

    /// Begin operating.
    ///
    /// A disabled provider stays `disabled`. A configuration problem parks
    /// the manager in `error` for good; nothing retries it.
    pub fn start<E: std::fmt::Display>(
        &mut self,
        validation: Result<(), E>,
        now: DateTime<Utc>,
    ) -> Vec<UpstreamAction> {
        if !self.status.enabled {
            tracing::info!("Upstream market data disabled by configuration");
            return Vec::new();
        }

        if let Err(e) = validation {
            tracing::error!(error = %e, "Upstream configuration invalid; connection will not start");
            self.halted = true;
            self.status.last_error = Some(e.to_string());
            self.status.transition(ConnectionState::Error, now);
            return vec![UpstreamAction::StatusChanged];
        }

        self.begin_attempt(now)
    }

    /// The scheduled retry delay elapsed.
    pub fn on_retry_timer(&mut self, now: DateTime<Utc>) -> Vec<UpstreamAction> {
        if self.halted
            || !matches!(
                self.status.state,
                ConnectionState::Reconnecting | ConnectionState::Error
            )
        {
            return Vec::new();
        }
        self.begin_attempt(now)
    }

    /// Feed a transport event.
    pub fn on_transport(
        &mut self,
        envelope: &TransportEnvelope,
        now: DateTime<Utc>,
    ) -> Vec<UpstreamAction> {
        if self.live_generation != Some(envelope.generation) {
            tracing::debug!(
                generation = envelope.generation,
                live = ?self.live_generation,
                "Ignoring event from superseded connection"
            );
            return Vec::new();
        }

        match &envelope.event {
            TransportEvent::Opened => self.on_opened(now),
            TransportEvent::Frame(frame) => self.on_frame(frame, now),
            TransportEvent::Closed { reason } => {
                self.fail(reason.clone(), ConnectionState::Reconnecting, now)
            }
        }
    }

    /// Shut down: close the live transport and stop retrying.
    pub fn stop(&mut self) -> Vec<UpstreamAction> {
        self.halted = true;
        if self.live_generation.take().is_some() {
            vec![UpstreamAction::Teardown]
        } else {
            Vec::new()
        }
    }

    // ===== Transitions =====

    fn begin_attempt(&mut self, now: DateTime<Utc>) -> Vec<UpstreamAction> {
        self.generation += 1;
        self.live_generation = Some(self.generation);

        let attempt = self.policy.begin_attempt();
        self.status.reconnect_attempt = attempt;
        self.status.next_retry_at = None;
        self.status.transition(ConnectionState::Connecting, now);

        tracing::info!(
            attempt,
            generation = self.generation,
            "Connecting to upstream"
        );
        metrics::record_connect_attempt();

        vec![
            UpstreamAction::StatusChanged,
            UpstreamAction::Connect {
                generation: self.generation,
            },
        ]
    }

    fn on_opened(&mut self, now: DateTime<Utc>) -> Vec<UpstreamAction> {
        if self.status.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.status.transition(ConnectionState::Connected, now);
        vec![
            UpstreamAction::StatusChanged,
            UpstreamAction::Send(UpstreamRequest::Authenticate),
        ]
    }

    fn on_frame(&mut self, frame: &UpstreamFrame, now: DateTime<Utc>) -> Vec<UpstreamAction> {
        match frame {
            UpstreamFrame::Connected | UpstreamFrame::Tick(_) => Vec::new(),
            UpstreamFrame::Authenticated => {
                if self.status.state != ConnectionState::Connected {
                    return Vec::new();
                }
                tracing::info!("Upstream authenticated");
                self.status.transition(ConnectionState::Authorized, now);
                vec![
                    UpstreamAction::StatusChanged,
                    UpstreamAction::ApplySubscription,
                ]
            }
            UpstreamFrame::Subscribed { symbols } => self.on_subscribed(symbols.len(), now),
            UpstreamFrame::Error { code, message } => {
                let error = AuthError::classify(*code, message);
                self.fail(error.to_string(), ConnectionState::Error, now)
            }
        }
    }

    fn on_subscribed(&mut self, symbol_count: usize, now: DateTime<Utc>) -> Vec<UpstreamAction> {
        if self.status.state != ConnectionState::Authorized {
            tracing::debug!(symbol_count, "Subscription change acknowledged");
            return Vec::new();
        }

        tracing::info!(symbol_count, "Upstream subscribed");
        self.status.transition(ConnectionState::Subscribed, now);

        let mut actions = vec![UpstreamAction::StatusChanged];
        if let Some(disconnect_at) = self.status.last_disconnect_at.take() {
            actions.push(UpstreamAction::TriggerBackfill {
                disconnect_at,
                reconnected_at: now,
            });
        }
        self.status.reconnect_attempt = 0;
        self.status.next_retry_at = None;
        self.status.last_error = None;
        self.policy.reset();
        actions
    }

    fn fail(
        &mut self,
        reason: String,
        state: ConnectionState,
        now: DateTime<Utc>,
    ) -> Vec<UpstreamAction> {
        self.live_generation = None;

        if self.status.last_disconnect_at.is_none() {
            self.status.last_disconnect_at = Some(now);
        }
        let delay = self.policy.next_delay();
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        self.status.next_retry_at = Some(now + chrono::Duration::milliseconds(delay_ms));
        self.status.last_error = Some(reason);
        self.status.transition(state, now);

        tracing::warn!(
            state = state.as_str(),
            error = ?self.status.last_error,
            retry_in_ms = delay_ms,
            attempt = self.status.reconnect_attempt,
            "Upstream connection lost"
        );
        metrics::record_disconnect(state);

        vec![
            UpstreamAction::ClearAppliedSubscription,
            UpstreamAction::Teardown,
            UpstreamAction::StatusChanged,
            UpstreamAction::ScheduleRetry(delay),
        ]
    }
}
