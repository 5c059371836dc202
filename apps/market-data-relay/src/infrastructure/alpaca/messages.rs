//! Alpaca Market Data Message Types
//!
//! Wire format types for Alpaca's stock market data stream and the
//! historical trades REST endpoint. These types map directly to Alpaca's
//! JSON schemas and are converted into canonical ticks by the normalizer.
//!
//! # Message Types
//!
//! ## Control Messages
//! - `Success`: Connection / authentication acknowledgment
//! - `Error`: Error response with code and message
//! - `Subscription`: Subscription confirmation
//!
//! ## Data Messages
//! - `Quote`: Real-time stock quotes (NBBO)
//! - `Trade`: Real-time stock trades
//! - `Bar`: OHLCV bars (minute, daily, updated)
//!
//! ## REST
//! - `HistoricalTradesResponse`: `GET /v2/stocks/{symbol}/trades`
//!
//! # References
//!
//! - [Stock Streaming](https://docs.alpaca.markets/docs/real-time-stock-pricing-data)
//! - [Historical Trades](https://docs.alpaca.markets/reference/stocktradesingle-1)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Control Messages
// =============================================================================

/// Success message indicating connection or authentication succeeded.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "success", "msg": "connected"}
/// {"T": "success", "msg": "authenticated"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMessage {
    /// Message type (always "success")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Success message: "connected" or "authenticated"
    pub msg: SuccessKind,
}

/// Kind of success message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Initial connection established
    Connected,
    /// Authentication successful
    Authenticated,
}

/// Error message with code and description.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "error", "code": 402, "msg": "auth failed"}
/// ```
///
/// # Error Codes
/// - 400: Invalid syntax
/// - 401: Not authenticated
/// - 402: Auth failed
/// - 403: Already authenticated
/// - 404: Auth timeout
/// - 405: Symbol limit exceeded
/// - 406: Connection limit exceeded
/// - 407: Slow client
/// - 408: Insufficient subscription
/// - 409: Not allowed (internal)
/// - 500: Internal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Message type (always "error")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Error code
    pub code: i32,

    /// Error message
    pub msg: String,
}

impl ErrorMessage {
    /// Check if this is an authentication error.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self.code, 401..=404)
    }

    /// Check if this is a rate limit error.
    #[must_use]
    pub const fn is_rate_limit_error(&self) -> bool {
        matches!(self.code, 405..=407)
    }
}

/// Subscription confirmation message.
///
/// Sent after a subscribe/unsubscribe action to confirm active subscriptions.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "subscription", "trades": ["AAPL"], "quotes": ["AMD"], "bars": ["*"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    /// Message type (always "subscription")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Subscribed trade symbols
    #[serde(default)]
    pub trades: Vec<String>,

    /// Subscribed quote symbols
    #[serde(default)]
    pub quotes: Vec<String>,

    /// Subscribed bar symbols
    #[serde(default)]
    pub bars: Vec<String>,
}

impl SubscriptionMessage {
    /// Union of all symbols across channels.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .trades
            .iter()
            .chain(&self.quotes)
            .chain(&self.bars)
            .cloned()
            .collect();
        all.sort();
        all.dedup();
        all
    }
}

// =============================================================================
// Stock Stream Messages
// =============================================================================

/// Real-time stock quote.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "q", "S": "AMD", "bx": "U", "bp": 87.66, "bs": 1,
///   "ax": "Q", "ap": 87.68, "as": 4,
///   "t": "2021-02-22T15:51:45.335689322Z", "c": ["R"], "z": "C"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockQuoteMessage {
    /// Message type (always "q")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Ticker symbol (e.g., "AAPL")
    #[serde(rename = "S")]
    pub symbol: String,

    /// Bid exchange code
    #[serde(rename = "bx", default)]
    pub bid_exchange: Option<String>,

    /// Bid price
    #[serde(rename = "bp")]
    pub bid_price: Decimal,

    /// Bid size (in round lots)
    #[serde(rename = "bs")]
    pub bid_size: i64,

    /// Ask exchange code
    #[serde(rename = "ax", default)]
    pub ask_exchange: Option<String>,

    /// Ask price
    #[serde(rename = "ap")]
    pub ask_price: Decimal,

    /// Ask size (in round lots)
    #[serde(rename = "as")]
    pub ask_size: i64,

    /// Quote timestamp (RFC-3339 with nanosecond precision)
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    /// Quote condition codes
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,

    /// Tape: "A" (NYSE), "B" (ARCA/regional), "C" (NASDAQ)
    #[serde(rename = "z", default)]
    pub tape: Option<String>,
}

/// Real-time stock trade.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "t", "i": 96921, "S": "AAPL", "x": "D", "p": 126.55, "s": 1,
///   "t": "2021-02-22T15:51:44.208Z", "c": ["@", "I"], "z": "C"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTradeMessage {
    /// Message type (always "t")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Ticker symbol (e.g., "AAPL")
    #[serde(rename = "S")]
    pub symbol: String,

    /// Trade ID (unique per exchange per day)
    #[serde(rename = "i", default)]
    pub trade_id: Option<i64>,

    /// Exchange code where trade executed
    #[serde(rename = "x", default)]
    pub exchange: Option<String>,

    /// Trade price
    #[serde(rename = "p")]
    pub price: Decimal,

    /// Trade size (shares)
    #[serde(rename = "s")]
    pub size: i64,

    /// Trade timestamp (RFC-3339 with nanosecond precision)
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    /// Trade condition codes (e.g., "@" for regular sale)
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,

    /// Tape: "A" (NYSE), "B" (ARCA/regional), "C" (NASDAQ)
    #[serde(rename = "z", default)]
    pub tape: Option<String>,
}

/// Real-time stock bar (OHLCV).
///
/// Bar types:
/// - "b": Minute bar
/// - "d": Daily bar
/// - "u": Updated bar (corrections)
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "b", "S": "SPY", "o": 388.985, "h": 389.13, "l": 388.975,
///   "c": 389.12, "v": 49378, "n": 461, "vw": 389.062639,
///   "t": "2021-02-22T19:15:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBarMessage {
    /// Message type: "b" (minute), "d" (daily), "u" (updated)
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Ticker symbol
    #[serde(rename = "S")]
    pub symbol: String,

    /// Open price
    #[serde(rename = "o")]
    pub open: Decimal,

    /// High price
    #[serde(rename = "h")]
    pub high: Decimal,

    /// Low price
    #[serde(rename = "l")]
    pub low: Decimal,

    /// Close price
    #[serde(rename = "c")]
    pub close: Decimal,

    /// Volume (shares)
    #[serde(rename = "v")]
    pub volume: i64,

    /// Number of trades in bar
    #[serde(rename = "n", default)]
    pub trade_count: Option<i64>,

    /// Volume-weighted average price (VWAP)
    #[serde(rename = "vw", default)]
    pub vwap: Option<Decimal>,

    /// Bar timestamp (start of bar period)
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Historical REST Messages
// =============================================================================

/// A single trade from the historical trades endpoint.
///
/// Same short field names as the stream, without `T` and `S`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalTrade {
    /// Trade timestamp
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    /// Exchange code
    #[serde(rename = "x", default)]
    pub exchange: Option<String>,

    /// Trade price
    #[serde(rename = "p")]
    pub price: Decimal,

    /// Trade size
    #[serde(rename = "s")]
    pub size: i64,

    /// Trade conditions
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,

    /// Trade ID
    #[serde(rename = "i", default)]
    pub trade_id: Option<i64>,

    /// Tape
    #[serde(rename = "z", default)]
    pub tape: Option<String>,
}

/// Response body of `GET /v2/stocks/{symbol}/trades`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalTradesResponse {
    /// Trades in the requested window (may be `null` when empty)
    #[serde(default)]
    pub trades: Option<Vec<HistoricalTrade>>,

    /// Symbol echoed back
    #[serde(default)]
    pub symbol: Option<String>,

    /// Pagination token
    #[serde(default)]
    pub next_page_token: Option<String>,
}

// =============================================================================
// Outbound Messages (Client -> Server)
// =============================================================================

/// Authentication request for market data streams.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    /// Action: "auth"
    pub action: &'static str,

    /// API key
    pub key: String,

    /// API secret
    pub secret: String,
}

impl AuthRequest {
    /// Create a new authentication request.
    #[must_use]
    pub const fn new(key: String, secret: String) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

/// Subscription request for market data streams.
///
/// Channel lists are always serialized, so an empty request is an explicit
/// "nothing" rather than an omitted field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Action: "subscribe" or "unsubscribe"
    pub action: &'static str,

    /// Trade symbols
    pub trades: Vec<String>,

    /// Quote symbols
    pub quotes: Vec<String>,

    /// Bar symbols
    pub bars: Vec<String>,
}

impl SubscriptionRequest {
    /// Create a subscribe request covering trades, quotes and bars.
    #[must_use]
    pub fn subscribe(symbols: Vec<String>) -> Self {
        Self::for_all_channels("subscribe", symbols)
    }

    /// Create an unsubscribe request covering trades, quotes and bars.
    #[must_use]
    pub fn unsubscribe(symbols: Vec<String>) -> Self {
        Self::for_all_channels("unsubscribe", symbols)
    }

    fn for_all_channels(action: &'static str, symbols: Vec<String>) -> Self {
        Self {
            action,
            trades: symbols.clone(),
            quotes: symbols.clone(),
            bars: symbols,
        }
    }
}

// =============================================================================
// Unified Incoming Message Enum
// =============================================================================

/// Every message the stock stream can deliver, parsed once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlpacaMessage {
    /// Connection/authentication success
    Success(SuccessMessage),

    /// Error message
    Error(ErrorMessage),

    /// Subscription confirmation
    Subscription(SubscriptionMessage),

    /// Stock quote
    StockQuote(StockQuoteMessage),

    /// Stock trade
    StockTrade(StockTradeMessage),

    /// Stock bar
    StockBar(StockBarMessage),

    /// Recognized envelope of a type the relay does not forward
    /// (trading status, corrections, LULD, ...).
    Ignored(String),
}
