//! Client Fan-out Hub
//!
//! Registry of connected downstream clients and the per-client filtered
//! broadcast. Owned by the relay task; nothing here is shared or locked.
//!
//! Every client has a bounded outbound queue drained by its socket task.
//! Delivery never waits: if a client's queue is full the frame is dropped
//! for that client only.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::mpsc;

use crate::domain::streaming::Symbol;
use crate::domain::subscription::{ClientId, normalize_symbols};
use crate::infrastructure::metrics;
use crate::infrastructure::ws::messages::OutboundFrame;

/// Result of handing a frame to one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued.
    Sent,
    /// Queue full; frame dropped.
    Dropped,
    /// Socket task gone.
    Closed,
}

/// One downstream connection.
#[derive(Debug)]
pub struct ClientConnection {
    subscriptions: BTreeSet<Symbol>,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl ClientConnection {
    /// Wrap a client's outbound queue with an empty subscription set.
    #[must_use]
    pub const fn new(outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            subscriptions: BTreeSet::new(),
            outbound,
        }
    }

    /// Current subscription set.
    #[must_use]
    pub const fn subscriptions(&self) -> &BTreeSet<Symbol> {
        &self.subscriptions
    }

    /// Whether the client is subscribed to `symbol`.
    #[must_use]
    pub fn wants(&self, symbol: &str) -> bool {
        self.subscriptions.contains(symbol)
    }

    fn deliver(&self, frame: &OutboundFrame) -> Delivery {
        match self.outbound.try_send(frame.clone()) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// All connected clients.
#[derive(Debug, Default)]
pub struct ClientHub {
    clients: HashMap<ClientId, ClientConnection>,
}

impl ClientHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Register a client.
    pub fn register(&mut self, id: ClientId, outbound: mpsc::Sender<OutboundFrame>) {
        self.clients.insert(id, ClientConnection::new(outbound));
        metrics::set_connected_clients(self.clients.len());
    }

    /// Forget a client. Returns `true` if it was registered.
    pub fn remove(&mut self, id: ClientId) -> bool {
        let removed = self.clients.remove(&id).is_some();
        metrics::set_connected_clients(self.clients.len());
        removed
    }

    /// Look up a client.
    #[must_use]
    pub fn get(&self, id: ClientId) -> Option<&ClientConnection> {
        self.clients.get(&id)
    }

    /// Add symbols to a client's set. Returns the normalized symbols added.
    pub fn subscribe<I, S>(&mut self, id: ClientId, symbols: I) -> Option<BTreeSet<Symbol>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let client = self.clients.get_mut(&id)?;
        let symbols = normalize_symbols(symbols);
        client.subscriptions.extend(symbols.iter().cloned());
        Some(symbols)
    }

    /// Remove symbols from a client's set. Returns the normalized symbols requested.
    pub fn unsubscribe<I, S>(&mut self, id: ClientId, symbols: I) -> Option<BTreeSet<Symbol>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let client = self.clients.get_mut(&id)?;
        let symbols = normalize_symbols(symbols);
        client.subscriptions.retain(|s| !symbols.contains(s));
        Some(symbols)
    }

    /// Every client's subscription set.
    pub fn subscription_sets(&self) -> impl Iterator<Item = &BTreeSet<Symbol>> {
        self.clients.values().map(ClientConnection::subscriptions)
    }

    /// Send a frame to one client.
    pub fn send_to(&self, id: ClientId, frame: &OutboundFrame) -> Delivery {
        self.clients
            .get(&id)
            .map_or(Delivery::Closed, |client| Self::record(client.deliver(frame)))
    }

    /// Send a frame to every client. Returns how many queued it.
    pub fn broadcast_all(&self, frame: &OutboundFrame) -> usize {
        self.clients
            .values()
            .filter(|client| Self::record(client.deliver(frame)) == Delivery::Sent)
            .count()
    }

    /// Send a frame to clients subscribed to `symbol`. Returns how many queued it.
    pub fn broadcast_symbol(&self, symbol: &str, frame: &OutboundFrame) -> usize {
        self.clients
            .values()
            .filter(|client| client.wants(symbol))
            .filter(|client| Self::record(client.deliver(frame)) == Delivery::Sent)
            .count()
    }

    fn record(delivery: Delivery) -> Delivery {
        if delivery == Delivery::Dropped {
            metrics::record_client_frame_dropped();
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(text: &str) -> OutboundFrame {
        Arc::from(text)
    }

    fn hub_with(ids: &[ClientId]) -> (ClientHub, Vec<mpsc::Receiver<OutboundFrame>>) {
        let mut hub = ClientHub::new();
        let mut receivers = Vec::new();
        for id in ids {
            let (tx, rx) = mpsc::channel(4);
            hub.register(*id, tx);
            receivers.push(rx);
        }
        (hub, receivers)
    }

    #[test]
    fn register_and_remove() {
        let (mut hub, _rx) = hub_with(&[1, 2]);
        assert_eq!(hub.len(), 2);
        assert!(hub.remove(1));
        assert!(!hub.remove(1));
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn subscribe_normalizes_and_unsubscribe_removes() {
        let (mut hub, _rx) = hub_with(&[1]);

        let added = hub.subscribe(1, ["aapl", " msft ", ""]).unwrap();
        assert_eq!(added, normalize_symbols(["AAPL", "MSFT"]));

        hub.unsubscribe(1, ["Aapl"]);
        assert_eq!(
            hub.get(1).unwrap().subscriptions(),
            &normalize_symbols(["MSFT"])
        );
    }

    #[test]
    fn unknown_client_is_ignored() {
        let (mut hub, _rx) = hub_with(&[]);
        assert!(hub.subscribe(9, ["SPY"]).is_none());
        assert_eq!(hub.send_to(9, &frame("x")), Delivery::Closed);
    }

    #[test]
    fn symbol_broadcast_is_filtered() {
        let (mut hub, mut rx) = hub_with(&[1, 2]);
        hub.subscribe(1, ["A"]);
        hub.subscribe(2, ["B"]);

        assert_eq!(hub.broadcast_symbol("A", &frame("a")), 1);
        assert_eq!(hub.broadcast_symbol("B", &frame("b")), 1);
        assert_eq!(hub.broadcast_symbol("C", &frame("c")), 0);

        assert_eq!(&*rx[0].try_recv().unwrap(), "a");
        assert!(rx[0].try_recv().is_err());
        assert_eq!(&*rx[1].try_recv().unwrap(), "b");
        assert!(rx[1].try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_for_that_client_only() {
        let mut hub = ClientHub::new();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        hub.register(1, slow_tx);
        hub.register(2, fast_tx);

        assert_eq!(hub.broadcast_all(&frame("one")), 2);
        assert_eq!(hub.send_to(1, &frame("two")), Delivery::Dropped);
        assert_eq!(hub.broadcast_all(&frame("three")), 1);

        assert_eq!(&*fast_rx.try_recv().unwrap(), "one");
        assert_eq!(&*fast_rx.try_recv().unwrap(), "three");
    }

    #[test]
    fn subscription_sets_per_client() {
        let (mut hub, _rx) = hub_with(&[1, 2]);
        hub.subscribe(1, ["A", "B"]);
        hub.subscribe(2, ["B", "C"]);

        let mut sets: Vec<_> = hub.subscription_sets().cloned().collect();
        sets.sort();
        assert_eq!(
            sets,
            vec![normalize_symbols(["A", "B"]), normalize_symbols(["B", "C"])]
        );
    }
}
