//! Alpaca Market Data Adapters
//!
//! Everything that speaks Alpaca's wire formats:
//!
//! - **stream**: stock stream WebSocket transport (JSON codec)
//! - **rest**: historical trades for gap repair
//! - **normalize**: wire messages to canonical ticks

pub mod auth;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod normalize;
pub mod reconnect;
pub mod rest;
pub mod stream;

pub use auth::{AuthError, Credentials};
pub use codec::{CodecError, JsonCodec};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
pub use messages::*;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::{AlpacaHistoryClient, DEFAULT_REST_URL};
pub use stream::{AlpacaStreamConnector, DEFAULT_HANDSHAKE_TIMEOUT, StreamError};
