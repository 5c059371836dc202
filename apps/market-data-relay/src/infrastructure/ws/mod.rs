//! Downstream WebSocket surface: client message types and the `/ws` server.

pub mod messages;
pub mod server;

pub use messages::{ClientMessage, OutboundFrame, ServerMessage, WsMessageError};
pub use server::{WsServer, WsServerError};
