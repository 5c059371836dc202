//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the relay services and the port interfaces
//! that define how they reach the upstream provider.

/// Port interfaces for the upstream stream and trade history.
pub mod ports;

/// Relay, connection, gap repair and status services.
pub mod services;
