//! Domain Layer - Core relay types and business rules.
//!
//! This layer contains the canonical market data types, provider status,
//! freshness rules and subscription diffing. Nothing here performs I/O.

/// Canonical market data types (trades, quotes, bars).
pub mod streaming;

/// Upstream provider status and connection states.
pub mod provider;

/// Per-symbol freshness and the latest-tick cache.
pub mod freshness;

/// Desired-set computation and upstream subscription diffing.
pub mod subscription;
