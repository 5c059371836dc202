//! Configuration Module
//!
//! Environment-driven configuration for the relay service.

mod settings;

pub use settings::{
    BackfillSettings, ClientSettings, ConfigError, DEFAULT_STREAM_BASE, FreshnessSettings,
    ReconnectSettings, RelayConfig, ServerSettings, UpstreamSettings,
};
