//! Relay status board.
//!
//! The relay task publishes a copy of its observable state here; readers
//! (the health endpoint) never touch relay-owned data directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::provider::ProviderStatus;
use crate::domain::streaming::{EpochMillis, Symbol};

/// Published relay state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySnapshot {
    /// Upstream provider status.
    pub provider_status: ProviderStatus,
    /// Connected downstream clients.
    pub connected_clients: usize,
    /// Staleness threshold.
    pub stale_after_ms: i64,
    /// Last arrival per desired symbol, `None` if never seen.
    pub last_seen_at_by_symbol: BTreeMap<Symbol, Option<EpochMillis>>,
}

impl RelaySnapshot {
    /// Number of desired symbols.
    #[must_use]
    pub fn tracked_symbols(&self) -> usize {
        self.last_seen_at_by_symbol.len()
    }

    /// Symbols stale at `now_ms`.
    #[must_use]
    pub fn stale_count(&self, now_ms: EpochMillis) -> usize {
        self.last_seen_at_by_symbol
            .values()
            .filter(|seen| seen.is_none_or(|at| now_ms - at > self.stale_after_ms))
            .count()
    }
}

/// Shared, cheaply cloned handle to the latest [`RelaySnapshot`].
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<RwLock<RelaySnapshot>>,
}

impl StatusBoard {
    /// Create a board holding `initial`.
    #[must_use]
    pub fn new(initial: RelaySnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Replace the published snapshot.
    pub fn publish(&self, snapshot: RelaySnapshot) {
        *self.inner.write() = snapshot;
    }

    /// Copy of the published snapshot.
    #[must_use]
    pub fn read(&self) -> RelaySnapshot {
        self.inner.read().clone()
    }
}
