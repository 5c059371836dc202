//! Provider Status
//!
//! The single, process-wide record of upstream connection health. Only the
//! connection manager mutates it; everything else receives copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market data feed type for Alpaca streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFeed {
    /// SIP (Securities Information Processor) - Full market data.
    #[default]
    Sip,
    /// IEX (Investors Exchange) - Free tier with limited data.
    Iex,
    /// SIP delayed by 15 minutes.
    DelayedSip,
    /// Unrecognized feed name.
    Unknown,
}

impl DataFeed {
    /// Parse feed type from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "sip" => Self::Sip,
            "iex" => Self::Iex,
            "delayed_sip" => Self::DelayedSip,
            _ => Self::Unknown,
        }
    }

    /// Get the feed name as reported in status payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sip => "sip",
            Self::Iex => "iex",
            Self::DelayedSip => "delayed_sip",
            Self::Unknown => "unknown",
        }
    }

    /// Path segment / query value used against Alpaca endpoints.
    ///
    /// An unknown feed falls back to `sip`.
    #[must_use]
    pub const fn endpoint_name(&self) -> &'static str {
        match self {
            Self::Sip | Self::Unknown => "sip",
            Self::Iex => "iex",
            Self::DelayedSip => "delayed_sip",
        }
    }
}

/// Upstream connection lifecycle.
///
/// ```text
/// disabled -> connecting -> connected -> authorized -> subscribed
///                 ^                                        |
///                 +------------ reconnecting / error <-----+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started, or turned off by configuration.
    Disabled,
    /// Transport handshake in progress.
    Connecting,
    /// Transport open, authentication sent.
    Connected,
    /// Authentication acknowledged, subscription sent.
    Authorized,
    /// Subscription acknowledged; ticks flow.
    Subscribed,
    /// Transport lost; a retry is scheduled.
    Reconnecting,
    /// Upstream error frame or configuration error.
    Error,
}

impl ConnectionState {
    /// State name as reported in status payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authorized => "authorized",
            Self::Subscribed => "subscribed",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Numeric code for gauges.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disabled => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Authorized => 3.0,
            Self::Subscribed => 4.0,
            Self::Reconnecting => 5.0,
            Self::Error => 6.0,
        }
    }
}

/// Snapshot of upstream provider health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    /// Whether the upstream connection is enabled by configuration.
    pub enabled: bool,
    /// Configured feed.
    pub feed: DataFeed,
    /// Current connection state.
    pub state: ConnectionState,
    /// When the current state was entered.
    pub since: DateTime<Utc>,
    /// Arrival time of the last forwarded tick.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Most recent error description.
    pub last_error: Option<String>,
    /// Provider-level staleness.
    pub is_stale: bool,
    /// Connection attempts since the last successful subscription.
    pub reconnect_attempt: u32,
    /// When the next connection attempt is scheduled.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Start of the current outage, if any.
    pub last_disconnect_at: Option<DateTime<Utc>>,
}

impl ProviderStatus {
    /// Initial status at process start.
    #[must_use]
    pub const fn new(enabled: bool, feed: DataFeed, now: DateTime<Utc>) -> Self {
        Self {
            enabled,
            feed,
            state: ConnectionState::Disabled,
            since: now,
            last_event_at: None,
            last_error: None,
            is_stale: true,
            reconnect_attempt: 0,
            next_retry_at: None,
            last_disconnect_at: None,
        }
    }

    /// Move to `state`, updating `since` when the state actually changes.
    ///
    /// Returns `true` if the state changed.
    pub fn transition(&mut self, state: ConnectionState, now: DateTime<Utc>) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        self.since = now;
        true
    }

    /// Whether ticks may be forwarded to clients.
    #[must_use]
    pub const fn accepts_ticks(&self) -> bool {
        matches!(self.state, ConnectionState::Subscribed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("sip", DataFeed::Sip ; "sip lower")]
    #[test_case("SIP", DataFeed::Sip ; "sip upper")]
    #[test_case("iex", DataFeed::Iex ; "iex")]
    #[test_case("Delayed_SIP", DataFeed::DelayedSip ; "delayed sip mixed case")]
    #[test_case(" iex ", DataFeed::Iex ; "padded")]
    #[test_case("opra", DataFeed::Unknown ; "unrecognized")]
    fn data_feed_parsing(input: &str, expected: DataFeed) {
        assert_eq!(DataFeed::from_str_case_insensitive(input), expected);
    }

    #[test]
    fn unknown_feed_uses_sip_endpoint() {
        assert_eq!(DataFeed::Unknown.endpoint_name(), "sip");
        assert_eq!(DataFeed::Unknown.as_str(), "unknown");
        assert_eq!(DataFeed::DelayedSip.endpoint_name(), "delayed_sip");
    }

    #[test]
    fn status_starts_disabled_and_stale() {
        let status = ProviderStatus::new(true, DataFeed::Iex, Utc::now());
        assert_eq!(status.state, ConnectionState::Disabled);
        assert!(status.is_stale);
        assert!(!status.accepts_ticks());
    }

    #[test]
    fn transition_updates_since_only_on_change() {
        let t0 = DateTime::from_timestamp(1_000, 0).unwrap();
        let t1 = DateTime::from_timestamp(2_000, 0).unwrap();
        let t2 = DateTime::from_timestamp(3_000, 0).unwrap();
        let mut status = ProviderStatus::new(true, DataFeed::Sip, t0);

        assert!(status.transition(ConnectionState::Connecting, t1));
        assert_eq!(status.since, t1);

        assert!(!status.transition(ConnectionState::Connecting, t2));
        assert_eq!(status.since, t1);
    }

    #[test]
    fn status_serializes_camel_case() {
        let mut status = ProviderStatus::new(true, DataFeed::DelayedSip, Utc::now());
        status.transition(ConnectionState::Subscribed, Utc::now());
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "subscribed");
        assert_eq!(json["feed"], "delayed_sip");
        assert_eq!(json["isStale"], true);
        assert_eq!(json["reconnectAttempt"], 0);
        assert!(json["lastEventAt"].is_null());
        assert!(json["nextRetryAt"].is_null());
    }
}
