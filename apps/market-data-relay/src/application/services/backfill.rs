//! Gap Repair
//!
//! After a reconnection, replays trades each symbol missed during the
//! outage. Runs as a side task: it reads history through
//! [`TradeHistoryPort`] and hands replayed ticks back to the relay, which
//! routes them through the same freshness and fan-out path as live ticks.
//!
//! A failure for one symbol is logged and skipped; it never stops the run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::application::ports::TradeHistoryPort;
use crate::domain::streaming::{BackfillMeta, CanonicalTick, EpochMillis, Symbol};
use crate::infrastructure::metrics;

/// Gap repair limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillConfig {
    /// Run gap repair after reconnects.
    pub enabled: bool,
    /// Longest window fetched per symbol (ms).
    pub max_window_ms: i64,
    /// Maximum trades fetched per symbol.
    pub limit: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_window_ms: 15 * 60 * 1000,
            limit: 1000,
        }
    }
}

/// Time range to replay for one symbol, `[from_ms, to_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairWindow {
    /// Window start (epoch ms).
    pub from_ms: EpochMillis,
    /// Window end (epoch ms).
    pub to_ms: EpochMillis,
}

impl RepairWindow {
    /// Compute the window for one symbol.
    ///
    /// Starts at the later of the last arrival and the disconnect, ends at
    /// the reconnect but never more than `max_window_ms` after the start.
    /// `None` when there is nothing to replay.
    #[must_use]
    pub fn compute(
        last_seen_ms: Option<EpochMillis>,
        disconnect_at_ms: EpochMillis,
        reconnected_at_ms: EpochMillis,
        max_window_ms: i64,
    ) -> Option<Self> {
        let from_ms = last_seen_ms.map_or(disconnect_at_ms, |seen| seen.max(disconnect_at_ms));
        let to_ms = reconnected_at_ms.min(from_ms.saturating_add(max_window_ms.max(0)));
        (to_ms > from_ms).then_some(Self { from_ms, to_ms })
    }

    /// Window width in milliseconds.
    #[must_use]
    pub const fn width_ms(&self) -> i64 {
        self.to_ms - self.from_ms
    }
}

/// Everything a run needs, captured by the relay when the subscription is restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillPlan {
    /// Identifier stamped on every replayed tick.
    pub run_id: Uuid,
    /// Start of the outage (epoch ms).
    pub disconnect_at_ms: EpochMillis,
    /// When the subscription was restored (epoch ms).
    pub reconnected_at_ms: EpochMillis,
    /// Desired symbols with their last arrival time.
    pub symbols: Vec<(Symbol, Option<EpochMillis>)>,
}

/// A replayed tick on its way back to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillTick {
    /// The historical tick.
    pub tick: CanonicalTick,
    /// Replay metadata.
    pub meta: BackfillMeta,
}

/// Outcome counts of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    /// Symbols a fetch was attempted for.
    pub symbols: usize,
    /// Symbols with no gap to replay.
    pub skipped: usize,
    /// Symbols whose fetch failed.
    pub failed: usize,
    /// Trades returned by the history source.
    pub fetched: usize,
    /// Ticks handed to the relay.
    pub emitted: usize,
}

/// Replays missed trades after a reconnect.
#[derive(Clone)]
pub struct GapRepair {
    history: Arc<dyn TradeHistoryPort>,
    config: BackfillConfig,
}

impl std::fmt::Debug for GapRepair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GapRepair")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn to_datetime(ms: EpochMillis) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

impl GapRepair {
    /// Create a gap repair service.
    #[must_use]
    pub fn new(history: Arc<dyn TradeHistoryPort>, config: BackfillConfig) -> Self {
        Self { history, config }
    }

    /// Configured limits.
    #[must_use]
    pub const fn config(&self) -> &BackfillConfig {
        &self.config
    }

    /// Run in a background task.
    pub fn spawn(
        &self,
        plan: BackfillPlan,
        ticks: mpsc::Sender<BackfillTick>,
    ) -> tokio::task::JoinHandle<BackfillSummary> {
        let repair = self.clone();
        tokio::spawn(async move { repair.run(plan, &ticks).await })
    }

    /// Replay every symbol in `plan`, in order, sending ticks ascending by time.
    pub async fn run(
        &self,
        plan: BackfillPlan,
        ticks: &mpsc::Sender<BackfillTick>,
    ) -> BackfillSummary {
        let mut summary = BackfillSummary::default();

        tracing::info!(
            run_id = %plan.run_id,
            symbols = plan.symbols.len(),
            disconnect_at_ms = plan.disconnect_at_ms,
            reconnected_at_ms = plan.reconnected_at_ms,
            "Backfill run starting"
        );

        for (symbol, last_seen) in &plan.symbols {
            let Some(window) = RepairWindow::compute(
                *last_seen,
                plan.disconnect_at_ms,
                plan.reconnected_at_ms,
                self.config.max_window_ms,
            ) else {
                tracing::debug!(run_id = %plan.run_id, symbol = %symbol, "No gap to backfill");
                summary.skipped += 1;
                continue;
            };

            summary.symbols += 1;
            let result = self
                .history
                .fetch_trades(
                    symbol,
                    to_datetime(window.from_ms),
                    to_datetime(window.to_ms),
                    self.config.limit,
                )
                .await;

            let mut trades = match result {
                Ok(trades) => trades,
                Err(e) => {
                    tracing::warn!(
                        run_id = %plan.run_id,
                        symbol = %symbol,
                        error = %e,
                        "Backfill fetch failed"
                    );
                    metrics::record_backfill_failure();
                    summary.failed += 1;
                    continue;
                }
            };
            trades.sort_by_key(CanonicalTick::timestamp);

            let fetched = trades.len();
            let mut emitted = 0;
            let meta = BackfillMeta::new(window.from_ms, window.to_ms, plan.run_id);
            for tick in trades {
                let replay = BackfillTick {
                    tick,
                    meta: meta.clone(),
                };
                if ticks.send(replay).await.is_err() {
                    tracing::debug!(run_id = %plan.run_id, "Relay gone; abandoning backfill");
                    return summary;
                }
                emitted += 1;
            }

            tracing::info!(
                run_id = %plan.run_id,
                symbol = %symbol,
                from_ms = window.from_ms,
                to_ms = window.to_ms,
                fetched,
                emitted,
                "Backfilled symbol"
            );
            summary.fetched += fetched;
            summary.emitted += emitted;
        }

        metrics::record_backfill_ticks(summary.emitted);
        tracing::info!(
            run_id = %plan.run_id,
            symbols = summary.symbols,
            skipped = summary.skipped,
            failed = summary.failed,
            fetched = summary.fetched,
            emitted = summary.emitted,
            "Backfill run complete"
        );
        summary
    }
}
