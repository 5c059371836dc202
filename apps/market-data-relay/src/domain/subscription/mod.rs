//! Subscription Management Types
//!
//! Domain types for deciding which symbols the upstream connection should
//! carry.
//!
//! # Design
//!
//! The coordinator tracks:
//! - A static seed list that is always subscribed
//! - The set last applied upstream (cleared whenever the connection drops)
//! - Whether the connection is far enough along to accept subscribe commands
//!
//! The desired set is never stored: it is recomputed from the seed and the
//! live client subscription sets every time something changes, then diffed
//! against the applied set by membership.

use std::collections::BTreeSet;

pub use crate::domain::streaming::Symbol;
use crate::domain::streaming::normalize_symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a downstream client connection.
pub type ClientId = u64;

/// Normalize a batch of raw symbols into a sorted, de-duplicated set.
///
/// Blank entries are dropped.
pub fn normalize_symbols<I, S>(raw: I) -> BTreeSet<Symbol>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|s| normalize_symbol(s.as_ref()))
        .collect()
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to apply to the upstream subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Full desired set; sent as the subscribe command.
    pub desired: BTreeSet<Symbol>,
    /// Symbols newly added relative to the applied set.
    pub added: BTreeSet<Symbol>,
    /// Symbols to unsubscribe from.
    pub removed: BTreeSet<Symbol>,
}

impl SubscriptionChanges {
    /// Diff `desired` against the previously applied set.
    ///
    /// With no applied set (fresh connection) everything is an addition.
    #[must_use]
    pub fn between(applied: Option<&BTreeSet<Symbol>>, desired: &BTreeSet<Symbol>) -> Self {
        let (added, removed) = applied.map_or_else(
            || (desired.clone(), BTreeSet::new()),
            |applied| {
                (
                    desired.difference(applied).cloned().collect(),
                    applied.difference(desired).cloned().collect(),
                )
            },
        );
        Self {
            desired: desired.clone(),
            added,
            removed,
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Decides when the upstream subscription must be re-issued.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionCoordinator {
    seed: BTreeSet<Symbol>,
    applied: Option<BTreeSet<Symbol>>,
    armed: bool,
}

impl SubscriptionCoordinator {
    /// Create a coordinator with a static seed list.
    #[must_use]
    pub fn new<I, S>(seed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            seed: normalize_symbols(seed),
            applied: None,
            armed: false,
        }
    }

    /// Static seed symbols.
    #[must_use]
    pub const fn seed(&self) -> &BTreeSet<Symbol> {
        &self.seed
    }

    /// Seed union every client's subscription set.
    pub fn compute_desired<'a, I>(&self, client_sets: I) -> BTreeSet<Symbol>
    where
        I: IntoIterator<Item = &'a BTreeSet<Symbol>>,
    {
        let mut desired = self.seed.clone();
        for set in client_sets {
            desired.extend(set.iter().cloned());
        }
        desired
    }

    /// Allow subscribe commands (connection reached `authorized`).
    pub const fn arm(&mut self) {
        self.armed = true;
    }

    /// Stop issuing commands and forget the applied set (connection lost).
    pub fn disarm(&mut self) {
        self.armed = false;
        self.applied = None;
    }

    /// Whether subscribe commands may be sent.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Set last applied upstream, if any.
    #[must_use]
    pub const fn applied(&self) -> Option<&BTreeSet<Symbol>> {
        self.applied.as_ref()
    }

    /// Compare `desired` with the applied set.
    ///
    /// Returns `None` when disarmed or when nothing changed.
    #[must_use]
    pub fn plan(&self, desired: &BTreeSet<Symbol>) -> Option<SubscriptionChanges> {
        if !self.armed {
            return None;
        }
        if self.applied.as_ref() == Some(desired) {
            return None;
        }
        Some(SubscriptionChanges::between(self.applied.as_ref(), desired))
    }

    /// Record that `desired` was handed to the upstream connection.
    pub fn mark_applied(&mut self, desired: BTreeSet<Symbol>) {
        self.applied = Some(desired);
    }
}

// =============================================================================
// Tests
// =============================================================================
