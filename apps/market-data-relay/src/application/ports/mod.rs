//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`UpstreamConnector`]: opens one streaming connection to the provider
//!   and reports everything that happens on it as [`TransportEvent`]s
//! - [`TradeHistoryPort`]: historical trade queries used by gap repair

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::{CanonicalTick, Symbol};

// =============================================================================
// Upstream Stream
// =============================================================================

/// Provider message after wire decoding, protocol-neutral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFrame {
    /// Server greeting after the transport opened.
    Connected,
    /// Authentication acknowledged.
    Authenticated,
    /// Subscription acknowledged with the symbols now active.
    Subscribed {
        /// Active symbols across all channels.
        symbols: Vec<Symbol>,
    },
    /// Explicit error frame.
    Error {
        /// Provider error code.
        code: i32,
        /// Human-readable description.
        message: String,
    },
    /// Market data.
    Tick(CanonicalTick),
}

/// Something that happened on one upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Transport handshake succeeded.
    Opened,
    /// Decoded frame.
    Frame(UpstreamFrame),
    /// Transport closed, failed to open, errored, or delivered an undecodable frame.
    Closed {
        /// Why the connection ended.
        reason: String,
    },
}

/// A transport event tagged with the connection that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEnvelope {
    /// Connection generation the event belongs to.
    pub generation: u64,
    /// The event.
    pub event: TransportEvent,
}

/// Command for the live upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamRequest {
    /// Send the authentication frame.
    Authenticate,
    /// Subscribe trades, quotes and bars for the given symbols.
    Subscribe(Vec<Symbol>),
    /// Unsubscribe trades, quotes and bars for the given symbols.
    Unsubscribe(Vec<Symbol>),
}

/// Handle to one upstream connection attempt.
///
/// Dropping the link does not close the connection; call [`UpstreamLink::close`].
#[derive(Debug, Clone)]
pub struct UpstreamLink {
    commands: mpsc::UnboundedSender<UpstreamRequest>,
    cancel: CancellationToken,
}

impl UpstreamLink {
    /// Wrap a command channel and the connection's cancellation token.
    #[must_use]
    pub const fn new(
        commands: mpsc::UnboundedSender<UpstreamRequest>,
        cancel: CancellationToken,
    ) -> Self {
        Self { commands, cancel }
    }

    /// Queue a command. Returns `false` if the connection task is gone.
    pub fn send(&self, request: UpstreamRequest) -> bool {
        self.commands.send(request).is_ok()
    }

    /// Tear the connection down.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`UpstreamLink::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Opens streaming connections to the market data provider.
///
/// Each call starts one independent connection attempt. All events for it,
/// including failure to connect, are delivered on `events` tagged with
/// `generation`.
pub trait UpstreamConnector: Send + Sync {
    /// Start a connection attempt.
    fn connect(&self, generation: u64, events: mpsc::Sender<TransportEnvelope>) -> UpstreamLink;
}

// =============================================================================
// Historical Trades
// =============================================================================

/// Errors from the historical trades source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// Request could not be sent or timed out.
    #[error("request failed: {0}")]
    Request(String),

    /// Non-success HTTP status.
    #[error("status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Response body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Historical trade records for gap repair.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeHistoryPort: Send + Sync {
    /// Trades for `symbol` in `[from, to)`, ascending, at most `limit` records.
    async fn fetch_trades(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CanonicalTick>, HistoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_send_and_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = UpstreamLink::new(tx, CancellationToken::new());

        assert!(link.send(UpstreamRequest::Authenticate));
        assert_eq!(rx.try_recv().unwrap(), UpstreamRequest::Authenticate);

        assert!(!link.is_closed());
        link.close();
        assert!(link.is_closed());
    }

    #[test]
    fn link_send_fails_when_task_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = UpstreamLink::new(tx, CancellationToken::new());
        drop(rx);

        assert!(!link.send(UpstreamRequest::Subscribe(vec!["AAPL".to_string()])));
    }
}
