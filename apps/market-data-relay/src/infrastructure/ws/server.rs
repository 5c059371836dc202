//! Downstream WebSocket Server
//!
//! `GET /ws` upgrades to a relay client connection. Each socket gets one
//! task that:
//!
//! - registers with the relay and drains its outbound queue to the socket
//! - parses client text frames and forwards them to the relay
//! - pings on a fixed interval and drops the client if no pong arrives
//!   before the next ping is due
//!
//! Malformed input is answered with an `error` frame; the connection stays
//! open.

use std::net::SocketAddr;

use axum::{
    Router,
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::messages::{ClientMessage, ServerMessage};
use crate::application::services::RelayHandle;
use crate::infrastructure::alpaca::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};

/// Shared state for socket handlers.
#[derive(Debug, Clone)]
struct WsState {
    relay: RelayHandle,
    heartbeat: HeartbeatConfig,
    cancel: CancellationToken,
}

/// Downstream WebSocket server.
#[derive(Debug)]
pub struct WsServer {
    port: u16,
    state: WsState,
}

impl WsServer {
    /// Create a server. `heartbeat.ping_interval` is also the pong deadline.
    #[must_use]
    pub const fn new(
        port: u16,
        relay: RelayHandle,
        heartbeat: HeartbeatConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            state: WsState {
                relay,
                heartbeat,
                cancel,
            },
        }
    }

    /// The `/ws` router.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(upgrade_handler))
            .with_state(self.state.clone())
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `WsServerError` if binding fails or the server stops with an error.
    pub async fn run(self) -> Result<(), WsServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WsServerError::BindFailed(self.port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `WsServerError::ServerFailed` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), WsServerError> {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "WebSocket server listening");

        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(self.state.cancel.clone().cancelled_owned())
            .await
            .map_err(|e| WsServerError::ServerFailed(e.to_string()))?;

        tracing::info!("WebSocket server stopped");
        Ok(())
    }
}

async fn upgrade_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (id, mut outbound) = match state.relay.connect_client().await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting client");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let mut monitor = HeartbeatMonitor::new(state.heartbeat);
    let mut ticker = state.heartbeat.interval();

    let reason = loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break "shutdown";
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break "relay stopped";
                };
                if sink.send(Message::Text(frame.as_ref().into())).await.is_err() {
                    break "send failed";
                }
            }

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match ClientMessage::from_json(text.as_str()) {
                    Ok(message) => {
                        if state.relay.client_message(id, message).await.is_err() {
                            break "relay stopped";
                        }
                    }
                    Err(e) => {
                        tracing::debug!(client_id = id, error = %e, "Rejected client message");
                        let reply = ServerMessage::error_frame(e.to_string());
                        if sink.send(Message::Text(reply.as_ref().into())).await.is_err() {
                            break "send failed";
                        }
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    let reply = ServerMessage::error_frame("binary frames are not supported");
                    if sink.send(Message::Text(reply.as_ref().into())).await.is_err() {
                        break "send failed";
                    }
                }
                Some(Ok(Message::Pong(_))) => monitor.record_pong(),
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => break "client closed",
                Some(Err(e)) => {
                    tracing::debug!(client_id = id, error = %e, "Client socket error");
                    break "socket error";
                }
            },

            now = ticker.tick() => match monitor.on_tick(now) {
                HeartbeatAction::SendPing => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break "send failed";
                    }
                }
                HeartbeatAction::Wait => {}
                HeartbeatAction::TimedOut => {
                    let _ = sink.send(Message::Close(None)).await;
                    break "heartbeat timeout";
                }
            },
        }
    };

    tracing::debug!(client_id = id, reason, "Client socket closing");
    // The relay may already be gone during shutdown.
    let _ = state.relay.disconnect_client(id).await;
}

/// WebSocket server errors.
#[derive(Debug, thiserror::Error)]
pub enum WsServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
