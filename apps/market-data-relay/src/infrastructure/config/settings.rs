//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.
//! Every value has a default; unparseable numbers and zero periods fall
//! back to it. Only the
//! upstream credentials and stream URL are validated, and a validation
//! failure is reported through provider status rather than aborting startup.

use std::time::Duration;

use crate::domain::provider::DataFeed;
use crate::domain::streaming::Symbol;
use crate::domain::subscription::normalize_symbols;
use crate::infrastructure::alpaca::{AlpacaStreamConnector, Credentials, DEFAULT_REST_URL};

/// Default stream base when `MARKET_DATA_STREAM_URL` is unset.
pub const DEFAULT_STREAM_BASE: &str = "wss://stream.data.alpaca.markets";

/// Upstream provider settings.
#[derive(Clone, Default)]
pub struct UpstreamSettings {
    /// Connect to the provider at all.
    pub enabled: bool,
    /// Configured feed.
    pub feed: DataFeed,
    /// `ALPACA_KEY`, if set.
    pub api_key: Option<String>,
    /// `ALPACA_SECRET`, if set.
    pub api_secret: Option<String>,
    /// Full stream URL override.
    pub stream_url: Option<String>,
    /// Historical data REST base URL.
    pub rest_url: String,
    /// Seed symbols, normalized.
    pub seed_symbols: Vec<Symbol>,
}

impl std::fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("enabled", &self.enabled)
            .field("feed", &self.feed)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .field("stream_url", &self.stream_url)
            .field("rest_url", &self.rest_url)
            .field("seed_symbols", &self.seed_symbols)
            .finish()
    }
}

impl UpstreamSettings {
    /// Check credentials and the stream URL.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for missing or blank credentials, or a
    /// stream URL that is not `ws://` or `wss://`.
    pub fn validate(&self) -> Result<Credentials, ConfigError> {
        let key = required("ALPACA_KEY", self.api_key.as_deref())?;
        let secret = required("ALPACA_SECRET", self.api_secret.as_deref())?;

        if let Some(url) = self
            .stream_url
            .as_ref()
            .filter(|url| !(url.starts_with("ws://") || url.starts_with("wss://")))
        {
            return Err(ConfigError::InvalidUrl {
                key: "MARKET_DATA_STREAM_URL".to_string(),
                value: url.clone(),
            });
        }

        Credentials::new(key, secret).map_err(|e| ConfigError::EmptyValue(e.to_string()))
    }

    /// Stream URL to dial: the override, or the default for the feed.
    #[must_use]
    pub fn stream_url(&self) -> String {
        self.stream_url.clone().unwrap_or_else(|| {
            AlpacaStreamConnector::feed_url(DEFAULT_STREAM_BASE, self.feed.endpoint_name())
        })
    }
}

fn required<'a>(key: &str, value: Option<&'a str>) -> Result<&'a str, ConfigError> {
    match value {
        None => Err(ConfigError::MissingEnvVar(key.to_string())),
        Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Some(v) => Ok(v),
    }
}

/// Upstream reconnect backoff and heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Delay after the first failed attempt.
    pub min_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Upstream ping interval.
    pub ping_interval: Duration,
    /// Upstream pong deadline.
    pub pong_timeout: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

/// Staleness and status broadcast settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessSettings {
    /// Per-symbol staleness threshold.
    pub stale_after_ms: i64,
    /// Freshness broadcast period.
    pub status_interval: Duration,
}

impl Default for FreshnessSettings {
    fn default() -> Self {
        Self {
            stale_after_ms: 15_000,
            status_interval: Duration::from_millis(1_000),
        }
    }
}

/// Gap repair settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSettings {
    /// Run gap repair after reconnects.
    pub enabled: bool,
    /// Longest window per symbol.
    pub max_window_ms: i64,
    /// Maximum trades fetched per symbol.
    pub limit: usize,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_window_ms: 900_000,
            limit: 1_000,
        }
    }
}

/// Downstream client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Ping interval, also the pong deadline.
    pub heartbeat_interval: Duration,
    /// Outbound frames queued per client before dropping.
    pub buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            buffer: 1_024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Downstream WebSocket port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8787,
            health_port: 8082,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream provider.
    pub upstream: UpstreamSettings,
    /// Reconnect backoff and upstream heartbeat.
    pub reconnect: ReconnectSettings,
    /// Freshness tracking.
    pub freshness: FreshnessSettings,
    /// Subscription change coalescing delay.
    pub subscribe_debounce: Duration,
    /// Gap repair.
    pub backfill: BackfillSettings,
    /// Downstream clients.
    pub clients: ClientSettings,
    /// Listening ports.
    pub server: ServerSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let upstream = UpstreamSettings {
            enabled: env.bool("MARKET_DATA_ENABLED", true),
            feed: env
                .string("ALPACA_FEED")
                .map(|s| DataFeed::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            api_key: env.string("ALPACA_KEY"),
            api_secret: env.string("ALPACA_SECRET"),
            stream_url: env.string("MARKET_DATA_STREAM_URL").filter(|s| !s.trim().is_empty()),
            rest_url: env
                .string("MARKET_DATA_REST_URL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REST_URL.to_string()),
            seed_symbols: env
                .string("MARKET_DATA_SYMBOLS")
                .map(|raw| normalize_symbols(raw.split(',')).into_iter().collect())
                .unwrap_or_default(),
        };

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            min_delay: env.millis("RELAY_RECONNECT_MIN_MS", reconnect_defaults.min_delay),
            max_delay: env.millis("RELAY_RECONNECT_MAX_MS", reconnect_defaults.max_delay),
            ping_interval: env.secs("RELAY_UPSTREAM_PING_SECS", reconnect_defaults.ping_interval),
            pong_timeout: env.secs(
                "RELAY_UPSTREAM_PONG_TIMEOUT_SECS",
                reconnect_defaults.pong_timeout,
            ),
        };

        let freshness_defaults = FreshnessSettings::default();
        let freshness = FreshnessSettings {
            stale_after_ms: env.parse("RELAY_STALE_AFTER_MS", freshness_defaults.stale_after_ms),
            status_interval: env
                .millis("RELAY_STATUS_INTERVAL_MS", freshness_defaults.status_interval)
                .max(Duration::from_millis(250)),
        };

        let backfill_defaults = BackfillSettings::default();
        let backfill = BackfillSettings {
            enabled: env.bool("BACKFILL_ENABLED", backfill_defaults.enabled),
            max_window_ms: env.parse("BACKFILL_MAX_WINDOW_MS", backfill_defaults.max_window_ms),
            limit: env.parse("BACKFILL_LIMIT", backfill_defaults.limit),
        };

        let client_defaults = ClientSettings::default();
        let clients = ClientSettings {
            heartbeat_interval: env.secs(
                "RELAY_CLIENT_HEARTBEAT_SECS",
                client_defaults.heartbeat_interval,
            ),
            buffer: env.parse("RELAY_CLIENT_BUFFER", client_defaults.buffer),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            ws_port: env.parse("RELAY_WS_PORT", server_defaults.ws_port),
            health_port: env.parse("RELAY_HEALTH_PORT", server_defaults.health_port),
        };

        Self {
            upstream,
            reconnect,
            freshness,
            subscribe_debounce: env.millis("RELAY_SUBSCRIBE_DEBOUNCE_MS", Duration::from_millis(250)),
            backfill,
            clients,
            server,
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// URL has the wrong scheme.
    #[error("{key} must be a ws:// or wss:// URL, got {value}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.string(key)
            .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    /// Zero is not a usable period and falls back to `default`.
    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.positive(key).map_or(default, Duration::from_secs)
    }

    /// Zero is not a usable period and falls back to `default`.
    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.positive(key).map_or(default, Duration::from_millis)
    }

    fn positive(&self, key: &str) -> Option<u64> {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&v| v > 0)
    }
}
