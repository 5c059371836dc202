//! Stock Stream Transport
//!
//! One WebSocket connection to Alpaca's stock stream per
//! [`UpstreamConnector::connect`] call. The spawned task owns the socket,
//! decodes frames into [`UpstreamFrame`]s, writes requests queued on the
//! [`UpstreamLink`] and keeps the connection alive with ping/pong.
//!
//! The task never reconnects on its own. Every way the connection can end
//! is reported as a single [`TransportEvent::Closed`]; retry policy lives in
//! the connection manager. That includes a peer that never finishes the
//! WebSocket handshake or never acknowledges authentication: both are bounded
//! by the handshake timeout.
//!
//! # Stream URL
//!
//! `{MARKET_DATA_STREAM_URL}/v2/{feed}`, e.g. `wss://stream.data.alpaca.markets/v2/sip`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    TransportEnvelope, TransportEvent, UpstreamConnector, UpstreamFrame, UpstreamLink,
    UpstreamRequest,
};

use super::auth::Credentials;
use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
use super::messages::SubscriptionRequest;
use super::normalize;

/// Bound on the WebSocket handshake and, separately, on the wait for the
/// authentication acknowledgement.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Type
// =============================================================================

/// Ways a stream connection ends. Rendered into the `Closed` reason.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// WebSocket handshake failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// WebSocket protocol error while running.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Undecodable frame from the provider.
    #[error("malformed frame: {0}")]
    Malformed(#[from] CodecError),

    /// No authentication acknowledgement within the handshake timeout.
    #[error("authentication timeout")]
    AuthTimeout,

    /// Peer stopped answering pings.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Peer sent a close frame or the stream ended.
    #[error("closed by server{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ClosedByServer(Option<String>),

    /// The relay dropped its end of the event channel.
    #[error("event receiver dropped")]
    ReceiverGone,
}

// =============================================================================
// Connector
// =============================================================================

/// Opens connections to Alpaca's stock stream.
#[derive(Debug, Clone)]
pub struct AlpacaStreamConnector {
    url: String,
    credentials: Credentials,
    heartbeat: HeartbeatConfig,
    handshake_timeout: Duration,
}

impl AlpacaStreamConnector {
    /// Create a connector for a fully-qualified stream URL.
    #[must_use]
    pub const fn new(url: String, credentials: Credentials, heartbeat: HeartbeatConfig) -> Self {
        Self {
            url,
            credentials,
            heartbeat,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Override the handshake and authentication timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Build the feed URL from a base such as `wss://stream.data.alpaca.markets`.
    #[must_use]
    pub fn feed_url(base: &str, feed_endpoint: &str) -> String {
        format!("{}/v2/{feed_endpoint}", base.trim_end_matches('/'))
    }

    /// Stream URL this connector dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl UpstreamConnector for AlpacaStreamConnector {
    fn connect(&self, generation: u64, events: mpsc::Sender<TransportEnvelope>) -> UpstreamLink {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = StreamSession {
            url: self.url.clone(),
            credentials: self.credentials.clone(),
            heartbeat: self.heartbeat,
            handshake_timeout: self.handshake_timeout,
            codec: JsonCodec::new(),
            generation,
            events,
        };
        tokio::spawn(session.run(command_rx, cancel.clone()));

        UpstreamLink::new(command_tx, cancel)
    }
}

// =============================================================================
// Session Task
// =============================================================================

struct StreamSession {
    url: String,
    credentials: Credentials,
    heartbeat: HeartbeatConfig,
    handshake_timeout: Duration,
    codec: JsonCodec,
    generation: u64,
    events: mpsc::Sender<TransportEnvelope>,
}

impl StreamSession {
    async fn run(
        self,
        commands: mpsc::UnboundedReceiver<UpstreamRequest>,
        cancel: CancellationToken,
    ) {
        let result = self.connect_and_run(commands, &cancel).await;

        // A cancelled link belongs to a generation the relay has already
        // moved past; nobody is waiting for its close.
        if cancel.is_cancelled() {
            tracing::debug!(generation = self.generation, "Upstream session cancelled");
            return;
        }

        let reason = match result {
            Ok(()) => StreamError::ClosedByServer(None).to_string(),
            Err(StreamError::ReceiverGone) => return,
            Err(e) => e.to_string(),
        };
        tracing::warn!(generation = self.generation, reason = %reason, "Upstream session ended");
        let _ = self.emit(TransportEvent::Closed { reason }).await;
    }

    async fn emit(&self, event: TransportEvent) -> Result<(), StreamError> {
        self.events
            .send(TransportEnvelope {
                generation: self.generation,
                event,
            })
            .await
            .map_err(|_| StreamError::ReceiverGone)
    }

    async fn connect_and_run(
        &self,
        mut commands: mpsc::UnboundedReceiver<UpstreamRequest>,
        cancel: &CancellationToken,
    ) -> Result<(), StreamError> {
        tracing::info!(url = %self.url, generation = self.generation, "Connecting to upstream stream");

        let connect =
            tokio::time::timeout(self.handshake_timeout, tokio_tungstenite::connect_async(&self.url));
        let ws_stream = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = connect => {
                result
                    .map_err(|_| StreamError::ConnectFailed("handshake timeout".to_string()))?
                    .map_err(|e| StreamError::ConnectFailed(e.to_string()))?
                    .0
            }
        };
        let (mut write, mut read) = ws_stream.split();

        self.emit(TransportEvent::Opened).await?;

        let mut monitor = HeartbeatMonitor::new(self.heartbeat);
        let mut heartbeat = self.heartbeat.interval();

        let auth_deadline = tokio::time::sleep(self.handshake_timeout);
        tokio::pin!(auth_deadline);
        let mut authenticated = false;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                () = &mut auth_deadline, if !authenticated => {
                    return Err(StreamError::AuthTimeout);
                }

                Some(request) = commands.recv() => {
                    let text = self.encode_request(&request)?;
                    write.send(Message::Text(text.into())).await?;
                }

                now = heartbeat.tick() => {
                    match monitor.on_tick(now) {
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        HeartbeatAction::Wait => {}
                        HeartbeatAction::TimedOut => return Err(StreamError::HeartbeatTimeout),
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            monitor.record_pong();
                            authenticated |= self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Pong(_))) => monitor.record_pong(),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string());
                            return Err(StreamError::ClosedByServer(reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    fn encode_request(&self, request: &UpstreamRequest) -> Result<String, StreamError> {
        let encoded = match request {
            UpstreamRequest::Authenticate => {
                tracing::debug!("Sending authentication");
                self.codec.encode(&self.credentials.to_auth_request())
            }
            UpstreamRequest::Subscribe(symbols) => {
                tracing::debug!(symbols = ?symbols, "Sending subscribe request");
                self.codec
                    .encode(&SubscriptionRequest::subscribe(symbols.clone()))
            }
            UpstreamRequest::Unsubscribe(symbols) => {
                tracing::debug!(symbols = ?symbols, "Sending unsubscribe request");
                self.codec
                    .encode(&SubscriptionRequest::unsubscribe(symbols.clone()))
            }
        };
        Ok(encoded?)
    }

    /// Forward decoded frames. Returns whether authentication was acknowledged.
    async fn handle_text(&self, text: &str) -> Result<bool, StreamError> {
        let messages = self.codec.decode(text)?;
        let mut authenticated = false;
        for frame in messages.into_iter().filter_map(normalize::to_frame) {
            authenticated |= matches!(frame, UpstreamFrame::Authenticated);
            self.emit(TransportEvent::Frame(frame)).await?;
        }
        Ok(authenticated)
    }
}
