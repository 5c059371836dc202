//! Freshness Tracking
//!
//! Per-symbol "last seen" clocks and the staleness flags derived from them,
//! plus the process-wide cache of the latest tick per symbol.
//!
//! Freshness is measured from **arrival time** at this process, never from
//! the timestamp embedded in the event. It reports pipeline liveness, not
//! exchange latency.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::provider::ConnectionState;
use crate::domain::streaming::{CanonicalTick, EpochMillis, Symbol};

/// Default staleness threshold.
pub const DEFAULT_STALE_AFTER_MS: i64 = 15_000;

// =============================================================================
// Freshness Tracker
// =============================================================================

/// Point-in-time freshness view over a set of symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessSnapshot {
    /// Arrival time of the last tick per symbol, `null` if never seen.
    pub last_seen_at_by_symbol: BTreeMap<Symbol, Option<EpochMillis>>,
    /// Staleness flag per symbol.
    pub is_stale_by_symbol: BTreeMap<Symbol, bool>,
}

impl FreshnessSnapshot {
    /// Number of stale symbols in the snapshot.
    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.is_stale_by_symbol.values().filter(|s| **s).count()
    }

    /// `true` when every symbol is stale, including the zero-symbol case.
    #[must_use]
    pub fn all_stale(&self) -> bool {
        self.is_stale_by_symbol.values().all(|s| *s)
    }
}

/// Tracks when each symbol last received a tick.
#[derive(Debug, Clone)]
pub struct FreshnessTracker {
    stale_after_ms: i64,
    last_seen: HashMap<Symbol, Option<EpochMillis>>,
}

impl FreshnessTracker {
    /// Create a tracker with the given staleness threshold.
    #[must_use]
    pub fn new(stale_after_ms: i64) -> Self {
        Self {
            stale_after_ms,
            last_seen: HashMap::new(),
        }
    }

    /// Staleness threshold in milliseconds.
    #[must_use]
    pub const fn stale_after_ms(&self) -> i64 {
        self.stale_after_ms
    }

    /// Start tracking a symbol without marking it seen.
    pub fn track(&mut self, symbol: &str) {
        if !self.last_seen.contains_key(symbol) {
            self.last_seen.insert(symbol.to_string(), None);
        }
    }

    /// Record that a tick for `symbol` arrived at `arrival_ms`.
    pub fn record_arrival(&mut self, symbol: &str, arrival_ms: EpochMillis) {
        match self.last_seen.get_mut(symbol) {
            Some(slot) => *slot = Some(slot.map_or(arrival_ms, |prev| prev.max(arrival_ms))),
            None => {
                self.last_seen.insert(symbol.to_string(), Some(arrival_ms));
            }
        }
    }

    /// Arrival time of the last tick for `symbol`.
    #[must_use]
    pub fn last_seen(&self, symbol: &str) -> Option<EpochMillis> {
        self.last_seen.get(symbol).copied().flatten()
    }

    /// A symbol is stale if never seen or last seen more than the threshold ago.
    #[must_use]
    pub fn is_stale(&self, symbol: &str, now_ms: EpochMillis) -> bool {
        self.last_seen(symbol)
            .is_none_or(|seen| now_ms - seen > self.stale_after_ms)
    }

    /// Freshness view over `symbols` at `now_ms`.
    pub fn snapshot<'a, I>(&self, symbols: I, now_ms: EpochMillis) -> FreshnessSnapshot
    where
        I: IntoIterator<Item = &'a Symbol>,
    {
        let mut snapshot = FreshnessSnapshot::default();
        for symbol in symbols {
            snapshot
                .last_seen_at_by_symbol
                .insert(symbol.clone(), self.last_seen(symbol));
            snapshot
                .is_stale_by_symbol
                .insert(symbol.clone(), self.is_stale(symbol, now_ms));
        }
        snapshot
    }

    /// Number of symbols ever tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    /// Whether no symbols are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// Provider-level staleness.
///
/// Stale whenever the connection is not `subscribed`. While subscribed, stale
/// only if every tracked symbol is stale; zero tracked symbols counts as
/// stale because there is nothing to vouch for liveness.
#[must_use]
pub fn provider_is_stale(state: ConnectionState, tracked: &FreshnessSnapshot) -> bool {
    if state != ConnectionState::Subscribed {
        return true;
    }
    tracked.all_stale()
}

// =============================================================================
// Latest Tick Cache
// =============================================================================

/// Most recent tick for a symbol with its arrival time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestEntry {
    /// The tick.
    pub event: CanonicalTick,
    /// Arrival time (epoch ms).
    pub received_at: EpochMillis,
}

/// Latest tick per symbol.
#[derive(Debug, Clone, Default)]
pub struct LatestCache {
    entries: HashMap<Symbol, LatestEntry>,
}

impl LatestCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for the tick's symbol.
    pub fn insert(&mut self, event: CanonicalTick, received_at: EpochMillis) {
        self.entries.insert(
            event.symbol().to_string(),
            LatestEntry { event, received_at },
        );
    }

    /// Insert only if the cached event is not newer than `event`.
    ///
    /// Used for replayed history so a backfill never regresses the cache.
    pub fn insert_if_newer(&mut self, event: CanonicalTick, received_at: EpochMillis) -> bool {
        if let Some(existing) = self.entries.get(event.symbol())
            && existing.event.timestamp() > event.timestamp()
        {
            return false;
        }
        self.insert(event, received_at);
        true
    }

    /// Latest entry for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&LatestEntry> {
        self.entries.get(symbol)
    }

    /// Point read over `symbols`; unknown symbols map to `None`.
    pub fn lookup<'a, I>(&self, symbols: I) -> BTreeMap<Symbol, Option<LatestEntry>>
    where
        I: IntoIterator<Item = &'a Symbol>,
    {
        symbols
            .into_iter()
            .map(|s| (s.clone(), self.entries.get(s).cloned()))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
