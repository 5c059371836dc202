//! Downstream WebSocket Messages
//!
//! JSON text frames exchanged with relay clients. Both directions are
//! internally tagged on `type`.
//!
//! # Client -> Server
//!
//! ```json
//! {"type":"subscribe","symbols":["AAPL","msft"]}
//! {"type":"unsubscribe","symbols":["AAPL"]}
//! {"type":"get_latest","symbols":["AAPL"]}
//! ```
//!
//! # Server -> Client
//!
//! `hello`, `provider_status`, `symbol_status`, `md`, `subscribed`,
//! `latest`, `error`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::freshness::{FreshnessSnapshot, LatestEntry};
use crate::domain::provider::ProviderStatus;
use crate::domain::streaming::{BackfillMeta, CanonicalTick, EpochMillis, Symbol};

/// A serialized server frame, shared between every client it goes to.
pub type OutboundFrame = Arc<str>;

/// Client message errors.
#[derive(Debug, thiserror::Error)]
pub enum WsMessageError {
    /// Not JSON, or not a known message shape.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Server frame could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ===== Client -> Server =====

/// Message from a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Add symbols to this connection's subscription set.
    Subscribe {
        /// Symbols, any case.
        symbols: Vec<String>,
    },
    /// Remove symbols from this connection's subscription set.
    Unsubscribe {
        /// Symbols, any case.
        symbols: Vec<String>,
    },
    /// Read the latest cached tick per symbol.
    GetLatest {
        /// Symbols to read; the connection's own subscriptions when omitted.
        #[serde(default)]
        symbols: Option<Vec<String>>,
    },
}

impl ClientMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or an unknown `type`.
    pub fn from_json(json: &str) -> Result<Self, WsMessageError> {
        serde_json::from_str(json).map_err(|e| WsMessageError::InvalidMessage(e.to_string()))
    }
}

// ===== Server -> Client =====

/// Message to a client. Borrows its payload; serialize once per broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    /// Greeting on connect.
    Hello {
        /// Server time (epoch ms).
        now: EpochMillis,
    },
    /// Provider status changed (also sent on connect).
    ProviderStatus {
        /// Current status.
        provider_status: &'a ProviderStatus,
    },
    /// Freshness of every tracked symbol.
    SymbolStatus {
        /// Server time (epoch ms).
        now: EpochMillis,
        /// Staleness threshold.
        #[serde(rename = "staleAfterMs")]
        stale_after_ms: i64,
        /// Per-symbol last arrival and staleness.
        #[serde(flatten)]
        freshness: &'a FreshnessSnapshot,
        /// Current status.
        provider_status: &'a ProviderStatus,
    },
    /// Market data tick.
    Md {
        /// The tick.
        event: &'a CanonicalTick,
        /// Current status.
        provider_status: &'a ProviderStatus,
        /// Present only for replayed history.
        #[serde(skip_serializing_if = "Option::is_none")]
        meta: Option<&'a BackfillMeta>,
    },
    /// Subscription set after a change.
    Subscribed {
        /// Every symbol the connection is now subscribed to.
        symbols: Vec<&'a Symbol>,
    },
    /// Point read result; `null` for symbols never seen.
    Latest {
        /// Latest entry per requested symbol.
        latest: &'a BTreeMap<Symbol, Option<LatestEntry>>,
    },
    /// Rejected input.
    Error {
        /// Description.
        error: String,
    },
}

impl ServerMessage<'_> {
    /// Serialize to a shareable text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_frame(&self) -> Result<OutboundFrame, WsMessageError> {
        Ok(serde_json::to_string(self)?.into())
    }

    /// Build an error frame.
    #[must_use]
    pub fn error_frame(error: impl Into<String>) -> OutboundFrame {
        let message = ServerMessage::Error {
            error: error.into(),
        };
        // A string-only payload always serializes.
        message
            .to_frame()
            .unwrap_or_else(|_| Arc::from(r#"{"type":"error","error":"internal"}"#))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::{DataFeed, ProviderStatus};
    use crate::domain::streaming::{TickSource, TradeTick};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use test_case::test_case;

    fn status() -> ProviderStatus {
        ProviderStatus::new(true, DataFeed::Sip, Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    fn to_value(msg: &ServerMessage<'_>) -> Value {
        serde_json::from_str(&msg.to_frame().unwrap()).unwrap()
    }

    #[test_case(r#"{"type":"subscribe","symbols":["aapl"]}"#,
        ClientMessage::Subscribe { symbols: vec!["aapl".to_string()] } ; "subscribe")]
    #[test_case(r#"{"type":"unsubscribe","symbols":[]}"#,
        ClientMessage::Unsubscribe { symbols: vec![] } ; "unsubscribe")]
    #[test_case(r#"{"type":"get_latest"}"#,
        ClientMessage::GetLatest { symbols: None } ; "get latest without symbols")]
    #[test_case(r#"{"type":"get_latest","symbols":["SPY"]}"#,
        ClientMessage::GetLatest { symbols: Some(vec!["SPY".to_string()]) } ; "get latest with symbols")]
    fn parses_client_messages(json: &str, expected: ClientMessage) {
        assert_eq!(ClientMessage::from_json(json).unwrap(), expected);
    }

    #[test_case("not json" ; "garbage")]
    #[test_case(r#"{"type":"launch"}"# ; "unknown type")]
    #[test_case(r#"{"symbols":["SPY"]}"# ; "missing type")]
    #[test_case(r#"{"type":"subscribe"}"# ; "missing symbols")]
    fn rejects_bad_client_messages(json: &str) {
        assert!(matches!(
            ClientMessage::from_json(json),
            Err(WsMessageError::InvalidMessage(_))
        ));
    }

    #[test]
    fn symbol_status_mixes_key_styles() {
        let snapshot = FreshnessSnapshot {
            last_seen_at_by_symbol: [("SPY".to_string(), Some(5))].into(),
            is_stale_by_symbol: [("SPY".to_string(), false)].into(),
        };
        let status = status();
        let value = to_value(&ServerMessage::SymbolStatus {
            now: 10,
            stale_after_ms: 15_000,
            freshness: &snapshot,
            provider_status: &status,
        });

        assert_eq!(value["type"], "symbol_status");
        assert_eq!(value["staleAfterMs"], 15_000);
        assert_eq!(value["lastSeenAtBySymbol"], json!({"SPY": 5}));
        assert_eq!(value["isStaleBySymbol"], json!({"SPY": false}));
        assert_eq!(value["provider_status"]["state"], "disabled");
        assert_eq!(value["provider_status"]["reconnectAttempt"], 0);
    }

    #[test]
    fn md_omits_meta_for_live_ticks() {
        let tick = CanonicalTick::Trade(TradeTick {
            symbol: "SPY".to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            price: Decimal::new(50_010, 2),
            size: 3,
            exchange: None,
            trade_id: None,
            conditions: Vec::new(),
            tape: None,
            source: TickSource::AlpacaStream,
        });
        let status = status();

        let live = to_value(&ServerMessage::Md {
            event: &tick,
            provider_status: &status,
            meta: None,
        });
        assert_eq!(live["type"], "md");
        assert_eq!(live["event"]["kind"], "trade");
        assert!(live.get("meta").is_none());

        let meta = BackfillMeta::new(1, 2, uuid::Uuid::nil());
        let replay = to_value(&ServerMessage::Md {
            event: &tick,
            provider_status: &status,
            meta: Some(&meta),
        });
        assert_eq!(replay["meta"]["backfill"], true);
        assert_eq!(replay["meta"]["windowFrom"], 1);
    }

    #[test]
    fn error_frame_shape() {
        let frame = ServerMessage::error_frame("invalid message: oops");
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type":"error","error":"invalid message: oops"}));
    }
}
