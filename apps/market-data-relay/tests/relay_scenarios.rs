//! Relay Integration Tests
//!
//! Drives a running relay through a scripted upstream connector and a fake
//! history source, observing what clients receive.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;

use market_data_relay::application::services::BackfillConfig;
use market_data_relay::domain::streaming::TradeTick;
use market_data_relay::infrastructure::alpaca::ReconnectConfig;
use market_data_relay::{
    CanonicalTick, ClientMessage, ConnectionState, GapRepair, HistoryError, Relay, RelayHandle,
    RelayOptions, TickSource, TradeHistoryPort, TransportEnvelope, TransportEvent,
    UpstreamConnector, UpstreamFrame, UpstreamLink, UpstreamRequest,
};

const WAIT: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(150);

// =============================================================================
// Fakes
// =============================================================================

struct FakeConnection {
    generation: u64,
    events: mpsc::Sender<TransportEnvelope>,
    requests: mpsc::UnboundedReceiver<UpstreamRequest>,
}

impl FakeConnection {
    async fn emit(&self, event: TransportEvent) {
        self.events
            .send(TransportEnvelope {
                generation: self.generation,
                event,
            })
            .await
            .unwrap();
    }

    async fn frame(&self, frame: UpstreamFrame) {
        self.emit(TransportEvent::Frame(frame)).await;
    }

    async fn next_request(&mut self) -> UpstreamRequest {
        timeout(WAIT, self.requests.recv()).await.unwrap().unwrap()
    }

    /// Open, authenticate and acknowledge the first subscribe. Returns its symbols.
    async fn handshake(&mut self) -> Vec<String> {
        self.emit(TransportEvent::Opened).await;
        assert_eq!(self.next_request().await, UpstreamRequest::Authenticate);

        self.frame(UpstreamFrame::Authenticated).await;
        let UpstreamRequest::Subscribe(symbols) = self.next_request().await else {
            panic!("expected subscribe after authentication");
        };

        self.frame(UpstreamFrame::Subscribed {
            symbols: symbols.clone(),
        })
        .await;
        symbols
    }

    /// Skip intermediate debounced updates until `symbols` is subscribed.
    async fn expect_subscribe(&mut self, symbols: &[&str]) {
        let expected: Vec<String> = symbols.iter().map(ToString::to_string).collect();
        loop {
            if self.next_request().await == UpstreamRequest::Subscribe(expected.clone()) {
                return;
            }
        }
    }

    async fn expect_no_request(&mut self) {
        let outcome = timeout(QUIET, self.requests.recv()).await;
        assert!(
            !matches!(outcome, Ok(Some(_))),
            "unexpected upstream request: {outcome:?}"
        );
    }
}

struct FakeConnector {
    connections: mpsc::UnboundedSender<FakeConnection>,
}

impl UpstreamConnector for FakeConnector {
    fn connect(&self, generation: u64, events: mpsc::Sender<TransportEnvelope>) -> UpstreamLink {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let _ = self.connections.send(FakeConnection {
            generation,
            events,
            requests,
        });
        UpstreamLink::new(requests_tx, CancellationToken::new())
    }
}

#[derive(Default)]
struct FakeHistory {
    calls: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
}

#[async_trait]
impl TradeHistoryPort for FakeHistory {
    async fn fetch_trades(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<CanonicalTick>, HistoryError> {
        self.calls.lock().push((symbol.to_string(), from, to));
        Ok(vec![trade(symbol, from, 7, TickSource::AlpacaRest)])
    }
}

fn trade(symbol: &str, at: DateTime<Utc>, price: i64, source: TickSource) -> CanonicalTick {
    CanonicalTick::Trade(TradeTick {
        symbol: symbol.to_string(),
        timestamp: at,
        price: Decimal::new(price, 0),
        size: 1,
        exchange: None,
        trade_id: None,
        conditions: Vec::new(),
        tape: None,
        source,
    })
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    handle: RelayHandle,
    connections: mpsc::UnboundedReceiver<FakeConnection>,
    history: Arc<FakeHistory>,
}

impl Harness {
    fn start(seed: &[&str]) -> Self {
        Self::with_debounce(seed, Duration::from_millis(20))
    }

    fn with_debounce(seed: &[&str], debounce: Duration) -> Self {
        let (connections_tx, connections) = mpsc::unbounded_channel();
        let history = Arc::new(FakeHistory::default());

        let options = RelayOptions {
            seed_symbols: seed.iter().map(ToString::to_string).collect(),
            reconnect: ReconnectConfig {
                min_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                jitter_factor: 0.0,
                max_exponent: 2,
            },
            subscribe_debounce: debounce,
            ..RelayOptions::default()
        };
        let gap_repair = GapRepair::new(
            Arc::clone(&history) as Arc<dyn TradeHistoryPort>,
            BackfillConfig::default(),
        );

        let relay = Relay::new(
            options,
            Some(Arc::new(FakeConnector {
                connections: connections_tx,
            })),
            Some(gap_repair),
            CancellationToken::new(),
        );
        let handle = relay.handle();
        relay.start(Ok::<(), String>(()));

        Self {
            handle,
            connections,
            history,
        }
    }

    async fn next_connection(&mut self) -> FakeConnection {
        timeout(WAIT, self.connections.recv()).await.unwrap().unwrap()
    }

    async fn client(&self) -> TestClient {
        let (id, rx) = self.handle.connect_client().await.unwrap();
        TestClient {
            id,
            rx,
            handle: self.handle.clone(),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.handle.stop();
    }
}

struct TestClient {
    id: u64,
    rx: mpsc::Receiver<Arc<str>>,
    handle: RelayHandle,
}

impl TestClient {
    async fn next_matching(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        timeout(WAIT, async {
            loop {
                let frame = self.rx.recv().await.unwrap();
                let value: Value = serde_json::from_str(&frame).unwrap();
                if pred(&value) {
                    return value;
                }
            }
        })
        .await
        .unwrap()
    }

    async fn next_of_type(&mut self, kind: &str) -> Value {
        self.next_matching(|v| v["type"] == kind).await
    }

    async fn expect_no_md(&mut self) {
        let deadline = Instant::now() + QUIET;
        while let Ok(Some(frame)) = timeout_at(deadline, self.rx.recv()).await {
            let value: Value = serde_json::from_str(&frame).unwrap();
            assert_ne!(value["type"], "md", "unexpected md frame: {value}");
        }
    }

    /// Subscribe and wait for the acknowledgement.
    async fn subscribe(&mut self, symbols: &[&str]) -> Value {
        self.handle
            .client_message(
                self.id,
                ClientMessage::Subscribe {
                    symbols: symbols.iter().map(ToString::to_string).collect(),
                },
            )
            .await
            .unwrap();
        self.next_of_type("subscribed").await
    }

    async fn wait_for_state(&mut self, state: &str) {
        self.next_matching(|v| {
            v["type"] == "provider_status" && v["provider_status"]["state"] == state
        })
        .await;
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn seed_symbol_flows_without_extra_subscribe() {
    let mut relay = Harness::start(&["spy"]);
    let mut upstream = relay.next_connection().await;

    assert_eq!(upstream.handshake().await, vec!["SPY"]);

    let mut client = relay.client().await;
    client.wait_for_state("subscribed").await;
    let ack = client.subscribe(&["SPY"]).await;
    assert_eq!(ack["symbols"], serde_json::json!(["SPY"]));

    upstream.expect_no_request().await;

    upstream
        .frame(UpstreamFrame::Tick(trade("SPY", Utc::now(), 500, TickSource::AlpacaStream)))
        .await;
    let md = client.next_of_type("md").await;
    assert_eq!(md["event"]["symbol"], "SPY");
    assert_eq!(md["provider_status"]["state"], "subscribed");
    assert!(md.get("meta").is_none());
}

#[tokio::test]
async fn clients_receive_only_their_symbols() {
    let mut relay = Harness::start(&[]);
    let mut upstream = relay.next_connection().await;
    assert!(upstream.handshake().await.is_empty());

    let mut apple = relay.client().await;
    let mut microsoft = relay.client().await;
    apple.subscribe(&["aapl"]).await;
    microsoft.subscribe(&["MSFT"]).await;

    upstream.expect_subscribe(&["AAPL", "MSFT"]).await;

    for (symbol, price) in [("AAPL", 190), ("MSFT", 410), ("TSLA", 250)] {
        upstream
            .frame(UpstreamFrame::Tick(trade(symbol, Utc::now(), price, TickSource::AlpacaStream)))
            .await;
    }

    assert_eq!(apple.next_of_type("md").await["event"]["symbol"], "AAPL");
    assert_eq!(microsoft.next_of_type("md").await["event"]["symbol"], "MSFT");
    apple.expect_no_md().await;
    microsoft.expect_no_md().await;
}

#[tokio::test]
async fn rapid_subscribes_coalesce_into_one_upstream_call() {
    let mut relay = Harness::with_debounce(&["SPY"], Duration::from_millis(300));
    let mut upstream = relay.next_connection().await;
    upstream.handshake().await;

    let mut first = relay.client().await;
    let mut second = relay.client().await;
    first.subscribe(&["AAPL"]).await;
    second.subscribe(&["MSFT"]).await;
    first.subscribe(&["TSLA"]).await;
    first
        .handle
        .client_message(
            first.id,
            ClientMessage::Unsubscribe {
                symbols: vec!["TSLA".to_string()],
            },
        )
        .await
        .unwrap();
    first.next_of_type("subscribed").await;

    assert_eq!(
        upstream.next_request().await,
        UpstreamRequest::Subscribe(vec![
            "AAPL".to_string(),
            "MSFT".to_string(),
            "SPY".to_string()
        ])
    );
    upstream.expect_no_request().await;
}

#[tokio::test]
async fn removing_last_subscriber_unsubscribes_upstream() {
    let mut relay = Harness::start(&["SPY"]);
    let mut upstream = relay.next_connection().await;
    upstream.handshake().await;

    let mut client = relay.client().await;
    client.subscribe(&["QQQ"]).await;
    assert_eq!(
        upstream.next_request().await,
        UpstreamRequest::Subscribe(vec!["QQQ".to_string(), "SPY".to_string()])
    );

    relay.handle.disconnect_client(client.id).await.unwrap();

    assert_eq!(
        upstream.next_request().await,
        UpstreamRequest::Unsubscribe(vec!["QQQ".to_string()])
    );
    assert_eq!(
        upstream.next_request().await,
        UpstreamRequest::Subscribe(vec!["SPY".to_string()])
    );
}

#[tokio::test]
async fn no_market_data_before_subscription_ack() {
    let mut relay = Harness::start(&["SPY"]);
    let mut upstream = relay.next_connection().await;

    let mut client = relay.client().await;
    client.subscribe(&["SPY"]).await;

    upstream.emit(TransportEvent::Opened).await;
    assert_eq!(upstream.next_request().await, UpstreamRequest::Authenticate);
    upstream.frame(UpstreamFrame::Authenticated).await;
    assert!(matches!(
        upstream.next_request().await,
        UpstreamRequest::Subscribe(_)
    ));

    upstream
        .frame(UpstreamFrame::Tick(trade("SPY", Utc::now(), 1, TickSource::AlpacaStream)))
        .await;
    client.expect_no_md().await;

    upstream
        .frame(UpstreamFrame::Subscribed {
            symbols: vec!["SPY".to_string()],
        })
        .await;
    client.wait_for_state("subscribed").await;

    upstream
        .frame(UpstreamFrame::Tick(trade("SPY", Utc::now(), 2, TickSource::AlpacaStream)))
        .await;
    assert_eq!(client.next_of_type("md").await["event"]["price"], "2");
}

#[tokio::test]
async fn reconnect_replays_gap_once() {
    let mut relay = Harness::start(&["SPY"]);
    let mut first = relay.next_connection().await;
    first.handshake().await;

    let mut client = relay.client().await;
    client.subscribe(&["SPY"]).await;
    first
        .frame(UpstreamFrame::Tick(trade("SPY", Utc::now(), 100, TickSource::AlpacaStream)))
        .await;
    client.next_of_type("md").await;

    first
        .emit(TransportEvent::Closed {
            reason: "reset by peer".to_string(),
        })
        .await;
    client.wait_for_state("reconnecting").await;

    let mut second = relay.next_connection().await;
    assert!(second.generation > first.generation);
    second.handshake().await;

    let replay = client.next_of_type("md").await;
    assert_eq!(replay["meta"]["backfill"], true);
    assert_eq!(replay["event"]["source"], "alpaca_rest");
    assert!(replay["meta"]["windowTo"].as_i64() > replay["meta"]["windowFrom"].as_i64());

    // Superseded connection is ignored.
    first
        .frame(UpstreamFrame::Tick(trade("SPY", Utc::now(), 999, TickSource::AlpacaStream)))
        .await;
    // A repeated ack does not start another run.
    second
        .frame(UpstreamFrame::Subscribed {
            symbols: vec!["SPY".to_string()],
        })
        .await;
    client.expect_no_md().await;

    let calls = relay.history.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "SPY");
    assert!(calls[0].1 < calls[0].2);

    let status = relay.handle.status();
    assert_eq!(status.provider_status.state, ConnectionState::Subscribed);
    assert_eq!(status.provider_status.reconnect_attempt, 0);
    assert!(status.provider_status.last_disconnect_at.is_none());
}

#[tokio::test]
async fn upstream_error_frame_schedules_retry() {
    let mut relay = Harness::start(&["SPY"]);
    let mut client = relay.client().await;
    let mut first = relay.next_connection().await;
    first.emit(TransportEvent::Opened).await;
    assert_eq!(first.next_request().await, UpstreamRequest::Authenticate);

    first
        .frame(UpstreamFrame::Error {
            code: 402,
            message: "auth failed".to_string(),
        })
        .await;

    let status = client
        .next_matching(|v| {
            v["type"] == "provider_status" && v["provider_status"]["state"] == "error"
        })
        .await;
    assert!(
        status["provider_status"]["lastError"]
            .as_str()
            .unwrap()
            .contains("authentication failed")
    );

    let second = relay.next_connection().await;
    assert!(second.generation > first.generation);
}

#[tokio::test]
async fn invalid_configuration_parks_in_error() {
    let relay = Relay::new(RelayOptions::default(), None, None, CancellationToken::new());
    let handle = relay.handle();
    relay.start(Err::<(), _>("missing required environment variable: ALPACA_KEY"));

    let (_id, mut rx) = handle.connect_client().await.unwrap();
    let mut state = String::new();
    for _ in 0..3 {
        let value: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        if value["type"] == "provider_status" {
            state = value["provider_status"]["state"].as_str().unwrap().to_string();
        }
    }
    assert_eq!(state, "error");

    let snapshot = handle.status();
    assert_eq!(snapshot.provider_status.state, ConnectionState::Error);
    assert!(
        snapshot
            .provider_status
            .last_error
            .unwrap()
            .contains("ALPACA_KEY")
    );
    handle.stop();
}
