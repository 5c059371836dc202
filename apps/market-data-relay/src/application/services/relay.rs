//! Market Data Relay
//!
//! The single task that owns every piece of mutable relay state: provider
//! status, freshness clocks, the latest-tick cache, the client registry and
//! the applied upstream subscription. Everything else talks to it through
//! channels:
//!
//! - socket tasks send [`RelayCommand`]s via a [`RelayHandle`]
//! - the upstream transport sends [`TransportEnvelope`]s
//! - gap repair sends replayed [`BackfillTick`]s
//!
//! Two single-slot timers (reconnect, subscription debounce) and a periodic
//! freshness broadcast complete the loop.
//!
//! # Lifecycle
//!
//! [`Relay::new`] builds the state, [`Relay::start`] spawns the loop and
//! [`RelayHandle::stop`] (or cancelling the token passed to `new`) ends it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{
    TransportEnvelope, TransportEvent, UpstreamConnector, UpstreamFrame, UpstreamLink,
    UpstreamRequest,
};
use crate::domain::freshness::{FreshnessTracker, LatestCache, provider_is_stale};
use crate::domain::provider::DataFeed;
use crate::domain::streaming::{BackfillMeta, CanonicalTick, EpochMillis, Symbol};
use crate::domain::subscription::{ClientId, SubscriptionCoordinator, normalize_symbols};
use crate::infrastructure::alpaca::reconnect::ReconnectConfig;
use crate::infrastructure::broadcast::ClientHub;
use crate::infrastructure::metrics::{self, DropReason};
use crate::infrastructure::ws::messages::{ClientMessage, OutboundFrame, ServerMessage};

use super::backfill::{BackfillPlan, BackfillTick, GapRepair};
use super::connection::{ConnectionManager, UpstreamAction};
use super::status::{RelaySnapshot, StatusBoard};
use super::timer::SingleSlotTimer;

/// Floor for the periodic freshness broadcast.
pub const MIN_STATUS_INTERVAL: Duration = Duration::from_millis(250);

const COMMAND_BUFFER: usize = 1024;
const TRANSPORT_BUFFER: usize = 4096;
const BACKFILL_BUFFER: usize = 1024;

// =============================================================================
// Options
// =============================================================================

/// Relay behavior, resolved from configuration.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Connect upstream at all.
    pub enabled: bool,
    /// Upstream feed.
    pub feed: DataFeed,
    /// Symbols always subscribed upstream.
    pub seed_symbols: Vec<Symbol>,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Per-symbol staleness threshold.
    pub stale_after_ms: i64,
    /// Freshness broadcast period (never below [`MIN_STATUS_INTERVAL`]).
    pub status_interval: Duration,
    /// Coalescing delay for subscription changes.
    pub subscribe_debounce: Duration,
    /// Outbound queue length per client.
    pub client_buffer: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            feed: DataFeed::Sip,
            seed_symbols: Vec::new(),
            reconnect: ReconnectConfig::default(),
            stale_after_ms: crate::domain::freshness::DEFAULT_STALE_AFTER_MS,
            status_interval: Duration::from_secs(1),
            subscribe_debounce: Duration::from_millis(250),
            client_buffer: 1024,
        }
    }
}

// =============================================================================
// Commands and Handle
// =============================================================================

/// Input from downstream socket tasks.
#[derive(Debug)]
pub enum RelayCommand {
    /// A client connected; frames for it go to `outbound`.
    Connect {
        /// Client identifier.
        id: ClientId,
        /// The client's outbound queue.
        outbound: mpsc::Sender<OutboundFrame>,
    },
    /// A client sent a well-formed message.
    Message {
        /// Client identifier.
        id: ClientId,
        /// The message.
        message: ClientMessage,
    },
    /// A client went away.
    Disconnect {
        /// Client identifier.
        id: ClientId,
    },
}

/// Errors returned by [`RelayHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The relay task has stopped.
    #[error("relay is not running")]
    Stopped,
}

/// Cloneable access to a running relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    commands: mpsc::Sender<RelayCommand>,
    next_client_id: Arc<AtomicU64>,
    client_buffer: usize,
    board: StatusBoard,
    cancel: CancellationToken,
}

impl RelayHandle {
    /// Register a new client and get its id and outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Stopped`] if the relay is gone.
    pub async fn connect_client(
        &self,
    ) -> Result<(ClientId, mpsc::Receiver<OutboundFrame>), RelayError> {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, rx) = mpsc::channel(self.client_buffer.max(1));
        self.send(RelayCommand::Connect { id, outbound }).await?;
        Ok((id, rx))
    }

    /// Forward a parsed client message.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Stopped`] if the relay is gone.
    pub async fn client_message(
        &self,
        id: ClientId,
        message: ClientMessage,
    ) -> Result<(), RelayError> {
        self.send(RelayCommand::Message { id, message }).await
    }

    /// Report that a client disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Stopped`] if the relay is gone.
    pub async fn disconnect_client(&self, id: ClientId) -> Result<(), RelayError> {
        self.send(RelayCommand::Disconnect { id }).await
    }

    /// Latest published relay state.
    #[must_use]
    pub fn status(&self) -> RelaySnapshot {
        self.board.read()
    }

    /// The status board the relay publishes to.
    #[must_use]
    pub const fn board(&self) -> &StatusBoard {
        &self.board
    }

    /// Ask the relay to shut down.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, command: RelayCommand) -> Result<(), RelayError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RelayError::Stopped)
    }
}

// =============================================================================
// Relay
// =============================================================================

/// Owner of all relay state. See the module docs.
pub struct Relay {
    options: RelayOptions,
    connections: ConnectionManager,
    coordinator: SubscriptionCoordinator,
    freshness: FreshnessTracker,
    latest: LatestCache,
    hub: ClientHub,

    connector: Option<Arc<dyn UpstreamConnector>>,
    gap_repair: Option<GapRepair>,
    link: Option<UpstreamLink>,
    board: StatusBoard,
    cancel: CancellationToken,
    next_client_id: Arc<AtomicU64>,

    commands_tx: mpsc::Sender<RelayCommand>,
    commands_rx: mpsc::Receiver<RelayCommand>,
    transport_tx: mpsc::Sender<TransportEnvelope>,
    transport_rx: mpsc::Receiver<TransportEnvelope>,
    backfill_tx: mpsc::Sender<BackfillTick>,
    backfill_rx: mpsc::Receiver<BackfillTick>,

    reconnect_timer: SingleSlotTimer,
    debounce_timer: SingleSlotTimer,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("options", &self.options)
            .field("status", self.connections.status())
            .field("clients", &self.hub.len())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Build a relay. Nothing runs until [`Relay::start`].
    ///
    /// `connector` is `None` when upstream configuration is unusable; the
    /// matching validation error must then be passed to [`Relay::start`].
    #[must_use]
    pub fn new(
        options: RelayOptions,
        connector: Option<Arc<dyn UpstreamConnector>>,
        gap_repair: Option<GapRepair>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Utc::now();
        let connections =
            ConnectionManager::new(options.enabled, options.feed, options.reconnect.clone(), now);
        let coordinator = SubscriptionCoordinator::new(&options.seed_symbols);
        let board = StatusBoard::new(RelaySnapshot {
            provider_status: connections.status().clone(),
            connected_clients: 0,
            stale_after_ms: options.stale_after_ms,
            last_seen_at_by_symbol: coordinator
                .seed()
                .iter()
                .map(|s| (s.clone(), None))
                .collect(),
        });

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_BUFFER);
        let (backfill_tx, backfill_rx) = mpsc::channel(BACKFILL_BUFFER);

        Self {
            freshness: FreshnessTracker::new(options.stale_after_ms),
            options,
            connections,
            coordinator,
            latest: LatestCache::new(),
            hub: ClientHub::new(),
            connector,
            gap_repair,
            link: None,
            board,
            cancel,
            next_client_id: Arc::new(AtomicU64::new(1)),
            commands_tx,
            commands_rx,
            transport_tx,
            transport_rx,
            backfill_tx,
            backfill_rx,
            reconnect_timer: SingleSlotTimer::new(),
            debounce_timer: SingleSlotTimer::new(),
        }
    }

    /// Handle for socket tasks and the health server.
    #[must_use]
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            commands: self.commands_tx.clone(),
            next_client_id: Arc::clone(&self.next_client_id),
            client_buffer: self.options.client_buffer,
            board: self.board.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Spawn the relay loop.
    ///
    /// `validation` is the outcome of upstream configuration checks; an
    /// error parks the provider in `error` while clients are still served.
    pub fn start<E>(self, validation: Result<(), E>) -> tokio::task::JoinHandle<()>
    where
        E: std::fmt::Display + Send + 'static,
    {
        tokio::spawn(self.run(validation))
    }

    async fn run<E: std::fmt::Display>(mut self, validation: Result<(), E>) {
        let seed: Vec<Symbol> = self.coordinator.seed().iter().cloned().collect();
        for symbol in &seed {
            self.freshness.track(symbol);
        }

        tracing::info!(
            enabled = self.options.enabled,
            feed = self.options.feed.as_str(),
            seed = ?seed,
            "Relay starting"
        );
        let actions = self.connections.start(validation, Utc::now());
        self.apply(actions);
        self.publish();

        let mut status_tick =
            tokio::time::interval(self.options.status_interval.max(MIN_STATUS_INTERVAL));
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,

                Some(command) = self.commands_rx.recv() => self.on_command(command),

                Some(envelope) = self.transport_rx.recv() => self.on_transport(envelope),

                Some(replay) = self.backfill_rx.recv() => {
                    self.on_tick(replay.tick, Some(&replay.meta));
                }

                () = self.reconnect_timer.fired() => {
                    let actions = self.connections.on_retry_timer(Utc::now());
                    self.apply(actions);
                }

                () = self.debounce_timer.fired() => self.sync_subscription(),

                _ = status_tick.tick() => {
                    self.on_status_tick();
                }
            }
        }

        let actions = self.connections.stop();
        self.apply(actions);
        tracing::info!("Relay stopped");
    }

    // ===== Upstream =====

    fn on_transport(&mut self, envelope: TransportEnvelope) {
        match envelope.event {
            TransportEvent::Frame(UpstreamFrame::Tick(tick)) => {
                if self.connections.live_generation() == Some(envelope.generation) {
                    self.on_tick(tick, None);
                } else {
                    metrics::record_tick_dropped(DropReason::StaleConnection);
                }
            }
            event => {
                let envelope = TransportEnvelope {
                    generation: envelope.generation,
                    event,
                };
                let actions = self.connections.on_transport(&envelope, Utc::now());
                self.apply(actions);
            }
        }
    }

    fn apply(&mut self, actions: Vec<UpstreamAction>) {
        for action in actions {
            match action {
                UpstreamAction::Connect { generation } => {
                    if let Some(previous) = self.link.take() {
                        previous.close();
                    }
                    let Some(connector) = &self.connector else {
                        tracing::error!(generation, "No upstream connector configured");
                        continue;
                    };
                    self.link = Some(connector.connect(generation, self.transport_tx.clone()));
                }
                UpstreamAction::Send(request) => self.send_upstream(request),
                UpstreamAction::ApplySubscription => {
                    self.coordinator.arm();
                    self.debounce_timer.cancel();
                    self.sync_subscription();
                }
                UpstreamAction::ClearAppliedSubscription => self.coordinator.disarm(),
                UpstreamAction::Teardown => {
                    if let Some(link) = self.link.take() {
                        link.close();
                    }
                }
                UpstreamAction::ScheduleRetry(delay) => self.reconnect_timer.schedule(delay),
                UpstreamAction::TriggerBackfill {
                    disconnect_at,
                    reconnected_at,
                } => self.start_backfill(disconnect_at, reconnected_at),
                UpstreamAction::StatusChanged => self.on_status_changed(),
            }
        }
    }

    fn send_upstream(&self, request: UpstreamRequest) {
        let sent = self.link.as_ref().is_some_and(|link| link.send(request));
        if !sent {
            tracing::debug!("No live upstream link; request dropped");
        }
    }

    fn desired_symbols(&self) -> BTreeSet<Symbol> {
        self.coordinator.compute_desired(self.hub.subscription_sets())
    }

    /// Push the desired set upstream if it differs from what was applied.
    fn sync_subscription(&mut self) {
        let desired = self.desired_symbols();
        let Some(changes) = self.coordinator.plan(&desired) else {
            return;
        };

        tracing::info!(
            desired = changes.desired.len(),
            added = ?changes.added,
            removed = ?changes.removed,
            "Applying upstream subscription"
        );

        if !changes.removed.is_empty() {
            self.send_upstream(UpstreamRequest::Unsubscribe(
                changes.removed.iter().cloned().collect(),
            ));
        }
        self.send_upstream(UpstreamRequest::Subscribe(
            changes.desired.iter().cloned().collect(),
        ));
        self.coordinator.mark_applied(changes.desired);
        metrics::set_tracked_symbols(desired.len());
    }

    fn start_backfill(&self, disconnect_at: DateTime<Utc>, reconnected_at: DateTime<Utc>) {
        let Some(repair) = self.gap_repair.as_ref().filter(|r| r.config().enabled) else {
            tracing::debug!("Backfill disabled; skipping gap repair");
            return;
        };

        let plan = BackfillPlan {
            run_id: Uuid::new_v4(),
            disconnect_at_ms: disconnect_at.timestamp_millis(),
            reconnected_at_ms: reconnected_at.timestamp_millis(),
            symbols: self
                .desired_symbols()
                .into_iter()
                .map(|symbol| {
                    let seen = self.freshness.last_seen(&symbol);
                    (symbol, seen)
                })
                .collect(),
        };
        drop(repair.spawn(plan, self.backfill_tx.clone()));
    }

    // ===== Ticks =====

    fn on_tick(&mut self, tick: CanonicalTick, meta: Option<&BackfillMeta>) {
        if !self.connections.accepts_ticks() {
            metrics::record_tick_dropped(DropReason::NotSubscribed);
            return;
        }

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        metrics::record_tick_received(&tick);

        self.freshness.record_arrival(tick.symbol(), now_ms);
        self.connections.record_event(now);
        if self.connections.status().is_stale {
            self.refresh_staleness(now_ms);
        }

        let symbol = tick.symbol();
        if self.hub.subscription_sets().any(|set| set.contains(symbol)) {
            let message = ServerMessage::Md {
                event: &tick,
                provider_status: self.connections.status(),
                meta,
            };
            match message.to_frame() {
                Ok(frame) => metrics::record_md_sent(self.hub.broadcast_symbol(symbol, &frame)),
                Err(e) => tracing::warn!(error = %e, "Failed to encode md frame"),
            }
        }

        if meta.is_some() {
            self.latest.insert_if_newer(tick, now_ms);
        } else {
            self.latest.insert(tick, now_ms);
        }
    }

    // ===== Status =====

    /// Recompute provider staleness. Returns `true` if it flipped.
    fn refresh_staleness(&mut self, now_ms: EpochMillis) -> bool {
        let desired = self.desired_symbols();
        let snapshot = self.freshness.snapshot(&desired, now_ms);
        let stale = provider_is_stale(self.connections.status().state, &snapshot);
        let flipped = self.connections.set_stale(stale);
        if flipped {
            self.broadcast_provider_status();
        }
        flipped
    }

    fn on_status_changed(&mut self) {
        let now_ms = Utc::now().timestamp_millis();
        if !self.refresh_staleness(now_ms) {
            self.broadcast_provider_status();
        }
        metrics::set_upstream_state(self.connections.status().state);
        self.publish();
    }

    /// Returns how many clients were sent a `symbol_status`.
    fn on_status_tick(&mut self) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        self.refresh_staleness(now_ms);
        self.publish();

        if self.hub.is_empty() {
            return 0;
        }
        self.broadcast_symbol_status(now_ms)
    }

    fn broadcast_provider_status(&self) {
        if self.hub.is_empty() {
            return;
        }
        let message = ServerMessage::ProviderStatus {
            provider_status: self.connections.status(),
        };
        match message.to_frame() {
            Ok(frame) => {
                self.hub.broadcast_all(&frame);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode provider_status frame"),
        }
    }

    fn broadcast_symbol_status(&self, now_ms: EpochMillis) -> usize {
        self.symbol_status(now_ms)
            .map_or(0, |frame| self.hub.broadcast_all(&frame))
    }

    /// Freshness over every tracked symbol, not just one client's filter.
    fn symbol_status(&self, now_ms: EpochMillis) -> Option<OutboundFrame> {
        symbol_status_frame(
            &self.freshness,
            &self.desired_symbols(),
            self.connections.status(),
            now_ms,
        )
    }

    fn publish(&self) {
        let desired = self.desired_symbols();
        self.board.publish(RelaySnapshot {
            provider_status: self.connections.status().clone(),
            connected_clients: self.hub.len(),
            stale_after_ms: self.freshness.stale_after_ms(),
            last_seen_at_by_symbol: desired
                .iter()
                .map(|s| (s.clone(), self.freshness.last_seen(s)))
                .collect(),
        });
    }

    // ===== Clients =====

    fn on_command(&mut self, command: RelayCommand) {
        match command {
            RelayCommand::Connect { id, outbound } => self.on_client_connected(id, outbound),
            RelayCommand::Message { id, message } => self.on_client_message(id, message),
            RelayCommand::Disconnect { id } => {
                if self.hub.remove(id) {
                    tracing::debug!(client_id = id, "Client disconnected");
                    self.debounce_timer.schedule(self.options.subscribe_debounce);
                    self.publish();
                }
            }
        }
    }

    fn on_client_connected(&mut self, id: ClientId, outbound: mpsc::Sender<OutboundFrame>) {
        self.hub.register(id, outbound);
        tracing::debug!(client_id = id, clients = self.hub.len(), "Client connected");

        let now_ms = Utc::now().timestamp_millis();
        let status = self.connections.status();
        let greeting = [
            ServerMessage::Hello { now: now_ms }.to_frame(),
            ServerMessage::ProviderStatus {
                provider_status: status,
            }
            .to_frame(),
        ];
        for frame in greeting {
            match frame {
                Ok(frame) => {
                    self.hub.send_to(id, &frame);
                }
                Err(e) => tracing::warn!(error = %e, "Failed to encode greeting"),
            }
        }
        if let Some(frame) = self.symbol_status(now_ms) {
            self.hub.send_to(id, &frame);
        }
        self.publish();
    }

    fn on_client_message(&mut self, id: ClientId, message: ClientMessage) {
        match message {
            ClientMessage::Subscribe { symbols } => {
                let Some(added) = self.hub.subscribe(id, symbols) else {
                    return;
                };
                for symbol in &added {
                    self.freshness.track(symbol);
                }
                tracing::debug!(client_id = id, symbols = ?added, "Client subscribed");
                self.after_subscription_change(id);
            }
            ClientMessage::Unsubscribe { symbols } => {
                let Some(removed) = self.hub.unsubscribe(id, symbols) else {
                    return;
                };
                tracing::debug!(client_id = id, symbols = ?removed, "Client unsubscribed");
                self.after_subscription_change(id);
            }
            ClientMessage::GetLatest { symbols } => self.reply_latest(id, symbols),
        }
    }

    fn after_subscription_change(&mut self, id: ClientId) {
        self.debounce_timer.schedule(self.options.subscribe_debounce);

        let Some(client) = self.hub.get(id) else {
            return;
        };
        let subscriptions = client.subscriptions();
        let now_ms = Utc::now().timestamp_millis();

        let ack = ServerMessage::Subscribed {
            symbols: subscriptions.iter().collect(),
        };
        if let Ok(frame) = ack.to_frame() {
            self.hub.send_to(id, &frame);
        }
        if let Some(frame) = self.symbol_status(now_ms) {
            self.hub.send_to(id, &frame);
        }
        self.publish();
    }

    fn reply_latest(&self, id: ClientId, symbols: Option<Vec<String>>) {
        let symbols = match symbols {
            Some(raw) => normalize_symbols(raw),
            None => self
                .hub
                .get(id)
                .map(|c| c.subscriptions().clone())
                .unwrap_or_default(),
        };
        let latest = self.latest.lookup(&symbols);
        match (ServerMessage::Latest { latest: &latest }).to_frame() {
            Ok(frame) => {
                self.hub.send_to(id, &frame);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode latest frame"),
        }
    }
}

fn symbol_status_frame(
    freshness: &FreshnessTracker,
    symbols: &BTreeSet<Symbol>,
    status: &crate::domain::provider::ProviderStatus,
    now_ms: EpochMillis,
) -> Option<OutboundFrame> {
    let snapshot = freshness.snapshot(symbols, now_ms);
    let message = ServerMessage::SymbolStatus {
        now: now_ms,
        stale_after_ms: freshness.stale_after_ms(),
        freshness: &snapshot,
        provider_status: status,
    };
    message
        .to_frame()
        .inspect_err(|e| tracing::warn!(error = %e, "Failed to encode symbol_status frame"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverConnects;

    impl UpstreamConnector for NeverConnects {
        fn connect(
            &self,
            _generation: u64,
            _events: mpsc::Sender<TransportEnvelope>,
        ) -> UpstreamLink {
            let (tx, _rx) = mpsc::unbounded_channel();
            UpstreamLink::new(tx, CancellationToken::new())
        }
    }

    fn relay(options: RelayOptions) -> Relay {
        Relay::new(
            options,
            Some(Arc::new(NeverConnects)),
            None,
            CancellationToken::new(),
        )
    }

    #[test]
    fn initial_board_lists_seed_symbols() {
        let relay = relay(RelayOptions {
            seed_symbols: vec!["spy".to_string(), "QQQ".to_string()],
            ..RelayOptions::default()
        });
        let snapshot = relay.handle().status();

        assert_eq!(snapshot.tracked_symbols(), 2);
        assert!(snapshot.last_seen_at_by_symbol.contains_key("SPY"));
        assert_eq!(snapshot.connected_clients, 0);
    }

    #[tokio::test]
    async fn handle_fails_after_stop() {
        let relay = relay(RelayOptions {
            enabled: false,
            ..RelayOptions::default()
        });
        let handle = relay.handle();
        let task = relay.start(Ok::<(), String>(()));

        handle.stop();
        task.await.unwrap();

        assert_eq!(
            handle.connect_client().await.unwrap_err(),
            RelayError::Stopped
        );
    }

    fn json(frame: &OutboundFrame) -> serde_json::Value {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test]
    async fn client_greeting_order() {
        let relay = relay(RelayOptions {
            enabled: false,
            seed_symbols: vec!["SPY".to_string()],
            ..RelayOptions::default()
        });
        let handle = relay.handle();
        let _task = relay.start(Ok::<(), String>(()));

        let (_id, mut rx) = handle.connect_client().await.unwrap();
        let frames: Vec<serde_json::Value> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(json)
        .collect();

        let kinds: Vec<&str> = frames.iter().map(|v| v["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, ["hello", "provider_status", "symbol_status"]);

        // The snapshot covers tracked symbols, not just this client's filter.
        assert_eq!(frames[2]["lastSeenAtBySymbol"], serde_json::json!({"SPY": null}));
        assert_eq!(frames[2]["isStaleBySymbol"], serde_json::json!({"SPY": true}));
        handle.stop();
    }

    #[test]
    fn status_tick_skipped_without_clients() {
        let mut relay = relay(RelayOptions {
            seed_symbols: vec!["SPY".to_string()],
            ..RelayOptions::default()
        });
        assert_eq!(relay.on_status_tick(), 0);

        let (tx, mut rx) = mpsc::channel(8);
        relay.hub.register(1, tx);
        relay.hub.subscribe(1, ["AAPL"]);

        assert_eq!(relay.on_status_tick(), 1);
        let frame = json(&rx.try_recv().unwrap());
        assert_eq!(frame["type"], "symbol_status");
        assert_eq!(
            frame["lastSeenAtBySymbol"],
            serde_json::json!({"AAPL": null, "SPY": null})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn symbol_status_repeats_without_ticks() {
        let relay = relay(RelayOptions {
            enabled: false,
            seed_symbols: vec!["SPY".to_string()],
            status_interval: Duration::from_secs(1),
            ..RelayOptions::default()
        });
        let handle = relay.handle();
        let _task = relay.start(Ok::<(), String>(()));

        let (_id, mut rx) = handle.connect_client().await.unwrap();
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }

        let started = tokio::time::Instant::now();
        for _ in 0..2 {
            let frame = json(&rx.recv().await.unwrap());
            assert_eq!(frame["type"], "symbol_status");
            assert_eq!(frame["isStaleBySymbol"]["SPY"], true);
        }
        assert!(started.elapsed() >= Duration::from_secs(1));
        handle.stop();
    }

    #[tokio::test]
    async fn get_latest_defaults_to_own_subscriptions() {
        let relay = relay(RelayOptions {
            enabled: false,
            ..RelayOptions::default()
        });
        let handle = relay.handle();
        let _task = relay.start(Ok::<(), String>(()));

        let (id, mut rx) = handle.connect_client().await.unwrap();
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        handle
            .client_message(
                id,
                ClientMessage::Subscribe {
                    symbols: vec!["aapl".to_string()],
                },
            )
            .await
            .unwrap();
        let ack: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(ack["symbols"], serde_json::json!(["AAPL"]));
        rx.recv().await.unwrap();

        handle
            .client_message(id, ClientMessage::GetLatest { symbols: None })
            .await
            .unwrap();
        let latest: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(latest["type"], "latest");
        assert_eq!(latest["latest"], serde_json::json!({"AAPL": null}));
        handle.stop();
    }
}
