//! Market Data Streaming Types
//!
//! Core domain types for market data: quotes, trades, and bars.
//! These types are codec-agnostic and represent the canonical
//! internal representation of market data. Every upstream wire
//! message and every historical REST record is mapped into a
//! [`CanonicalTick`] exactly once, at the adapter boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Symbol type alias for clarity.
pub type Symbol = String;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Normalize a raw symbol: trim whitespace and upper-case.
///
/// Returns `None` for blank input.
#[must_use]
pub fn normalize_symbol(raw: &str) -> Option<Symbol> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_ascii_uppercase())
}

// =============================================================================
// Canonical Tick
// =============================================================================

/// Where a canonical tick came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSource {
    /// Live streaming connection.
    AlpacaStream,
    /// Historical REST query (gap repair).
    AlpacaRest,
}

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeTick {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Event timestamp reported by the exchange.
    pub timestamp: DateTime<Utc>,
    /// Trade price.
    pub price: Decimal,
    /// Trade size (shares).
    pub size: i64,
    /// Exchange code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    /// Provider trade ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<i64>,
    /// Trade conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    /// Tape (A, B, C).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tape: Option<String>,
    /// Origin of the tick.
    pub source: TickSource,
}

/// A top-of-book quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteTick {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Event timestamp reported by the exchange.
    pub timestamp: DateTime<Utc>,
    /// Bid price.
    pub bid_price: Decimal,
    /// Bid size.
    pub bid_size: i64,
    /// Bid exchange code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid_exchange: Option<String>,
    /// Ask price.
    pub ask_price: Decimal,
    /// Ask size.
    pub ask_size: i64,
    /// Ask exchange code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask_exchange: Option<String>,
    /// Quote conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    /// Tape (A, B, C).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tape: Option<String>,
    /// Origin of the tick.
    pub source: TickSource,
}

/// An OHLCV aggregate bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarTick {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Bar start timestamp.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Volume.
    pub volume: i64,
    /// Number of trades in the bar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_count: Option<i64>,
    /// Volume-weighted average price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<Decimal>,
    /// Origin of the tick.
    pub source: TickSource,
}

/// Normalized market data event, independent of upstream wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalTick {
    /// Trade print.
    Trade(TradeTick),
    /// Quote update.
    Quote(QuoteTick),
    /// Aggregate bar.
    Bar(BarTick),
}

impl CanonicalTick {
    /// Symbol the tick belongs to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Trade(t) => &t.symbol,
            Self::Quote(q) => &q.symbol,
            Self::Bar(b) => &b.symbol,
        }
    }

    /// Event timestamp embedded in the tick.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Trade(t) => t.timestamp,
            Self::Quote(q) => q.timestamp,
            Self::Bar(b) => b.timestamp,
        }
    }

    /// Origin of the tick.
    #[must_use]
    pub const fn source(&self) -> TickSource {
        match self {
            Self::Trade(t) => t.source,
            Self::Quote(q) => q.source,
            Self::Bar(b) => b.source,
        }
    }

    /// Short label for the tick kind (used in metrics and logs).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Trade(_) => "trade",
            Self::Quote(_) => "quote",
            Self::Bar(_) => "bar",
        }
    }
}

/// Metadata attached to ticks replayed by a gap-repair run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillMeta {
    /// Always `true`; lets consumers branch on a single field.
    pub backfill: bool,
    /// Inclusive window start (epoch ms).
    pub window_from: EpochMillis,
    /// Exclusive window end (epoch ms).
    pub window_to: EpochMillis,
    /// Identifier shared by every tick of one run.
    pub run_id: Uuid,
}

impl BackfillMeta {
    /// Create metadata for a replay window.
    #[must_use]
    pub const fn new(window_from: EpochMillis, window_to: EpochMillis, run_id: Uuid) -> Self {
        Self {
            backfill: true,
            window_from,
            window_to,
            run_id,
        }
    }
}
