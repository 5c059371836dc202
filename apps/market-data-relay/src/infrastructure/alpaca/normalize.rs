//! Canonical Event Normalizer
//!
//! Pure mapping from Alpaca wire messages and historical REST records into
//! the relay's canonical tick shape and protocol-neutral upstream frames.
//! No state, no I/O.

use crate::application::ports::UpstreamFrame;
use crate::domain::streaming::{BarTick, CanonicalTick, QuoteTick, TickSource, TradeTick};

use super::messages::{
    AlpacaMessage, HistoricalTrade, StockBarMessage, StockQuoteMessage, StockTradeMessage,
    SuccessKind,
};

/// Map a streamed trade.
#[must_use]
pub fn trade_from_stream(msg: StockTradeMessage) -> CanonicalTick {
    CanonicalTick::Trade(TradeTick {
        symbol: msg.symbol,
        timestamp: msg.timestamp,
        price: msg.price,
        size: msg.size,
        exchange: msg.exchange,
        trade_id: msg.trade_id,
        conditions: msg.conditions,
        tape: msg.tape,
        source: TickSource::AlpacaStream,
    })
}

/// Map a streamed quote.
#[must_use]
pub fn quote_from_stream(msg: StockQuoteMessage) -> CanonicalTick {
    CanonicalTick::Quote(QuoteTick {
        symbol: msg.symbol,
        timestamp: msg.timestamp,
        bid_price: msg.bid_price,
        bid_size: msg.bid_size,
        bid_exchange: msg.bid_exchange,
        ask_price: msg.ask_price,
        ask_size: msg.ask_size,
        ask_exchange: msg.ask_exchange,
        conditions: msg.conditions,
        tape: msg.tape,
        source: TickSource::AlpacaStream,
    })
}

/// Map a streamed bar (minute, daily or updated).
#[must_use]
pub fn bar_from_stream(msg: StockBarMessage) -> CanonicalTick {
    CanonicalTick::Bar(BarTick {
        symbol: msg.symbol,
        timestamp: msg.timestamp,
        open: msg.open,
        high: msg.high,
        low: msg.low,
        close: msg.close,
        volume: msg.volume,
        trade_count: msg.trade_count,
        vwap: msg.vwap,
        source: TickSource::AlpacaStream,
    })
}

/// Map a historical trade record; the REST payload does not carry the symbol.
#[must_use]
pub fn trade_from_history(symbol: &str, trade: HistoricalTrade) -> CanonicalTick {
    CanonicalTick::Trade(TradeTick {
        symbol: symbol.to_string(),
        timestamp: trade.timestamp,
        price: trade.price,
        size: trade.size,
        exchange: trade.exchange,
        trade_id: trade.trade_id,
        conditions: trade.conditions,
        tape: trade.tape,
        source: TickSource::AlpacaRest,
    })
}

/// Map any decoded stream message to a frame the connection manager understands.
///
/// Returns `None` for messages the relay does not act on.
#[must_use]
pub fn to_frame(message: AlpacaMessage) -> Option<UpstreamFrame> {
    match message {
        AlpacaMessage::Success(msg) => Some(match msg.msg {
            SuccessKind::Connected => UpstreamFrame::Connected,
            SuccessKind::Authenticated => UpstreamFrame::Authenticated,
        }),
        AlpacaMessage::Error(msg) => Some(UpstreamFrame::Error {
            code: msg.code,
            message: msg.msg,
        }),
        AlpacaMessage::Subscription(msg) => Some(UpstreamFrame::Subscribed {
            symbols: msg.symbols(),
        }),
        AlpacaMessage::StockTrade(msg) => Some(UpstreamFrame::Tick(trade_from_stream(msg))),
        AlpacaMessage::StockQuote(msg) => Some(UpstreamFrame::Tick(quote_from_stream(msg))),
        AlpacaMessage::StockBar(msg) => Some(UpstreamFrame::Tick(bar_from_stream(msg))),
        AlpacaMessage::Ignored(msg_type) => {
            tracing::trace!(msg_type = %msg_type, "Ignoring upstream message");
            None
        }
    }
}
