//! WebSocket Protocol Tests
//!
//! Runs the `/ws` server on an ephemeral port and talks to it with a real
//! WebSocket client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use market_data_relay::infrastructure::alpaca::HeartbeatConfig;
use market_data_relay::{Relay, RelayHandle, RelayOptions, WsServer};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(3);

async fn start_server() -> (Client, CancellationToken) {
    let (client, _relay, cancel) = start_server_with_heartbeat(Duration::from_secs(30)).await;
    (client, cancel)
}

async fn start_server_with_heartbeat(
    heartbeat: Duration,
) -> (Client, RelayHandle, CancellationToken) {
    let cancel = CancellationToken::new();
    let options = RelayOptions {
        enabled: false,
        seed_symbols: vec!["SPY".to_string()],
        ..RelayOptions::default()
    };
    let relay = Relay::new(options, None, None, cancel.child_token());
    let handle = relay.handle();
    relay.start(Ok::<(), String>(()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = WsServer::new(
        0,
        handle.clone(),
        HeartbeatConfig::one_interval(heartbeat),
        cancel.clone(),
    );
    tokio::spawn(server.serve(listener));

    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    (client, handle, cancel)
}

/// Poll the status board until `connected_clients` reaches `expected`.
async fn wait_for_clients(relay: &RelayHandle, expected: usize) {
    timeout(WAIT, async {
        while relay.status().connected_clients != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

/// Next JSON text frame, skipping control frames.
async fn next_json(client: &mut Client) -> Value {
    timeout(WAIT, async {
        loop {
            match client.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Close(frame) => panic!("connection closed: {frame:?}"),
                _ => {}
            }
        }
    })
    .await
    .unwrap()
}

async fn next_of_type(client: &mut Client, kind: &str) -> Value {
    loop {
        let value = next_json(client).await;
        if value["type"] == kind {
            return value;
        }
    }
}

#[tokio::test]
async fn greets_with_hello_then_status() {
    let (mut client, cancel) = start_server().await;

    let hello = next_json(&mut client).await;
    assert_eq!(hello["type"], "hello");
    assert!(hello["now"].as_i64().unwrap() > 0);

    let status = next_json(&mut client).await;
    assert_eq!(status["type"], "provider_status");
    assert_eq!(status["provider_status"]["state"], "disabled");

    let symbols = next_json(&mut client).await;
    assert_eq!(symbols["type"], "symbol_status");
    assert_eq!(symbols["staleAfterMs"], 15_000);

    cancel.cancel();
}

#[tokio::test]
async fn malformed_input_keeps_connection_open() {
    let (mut client, cancel) = start_server().await;
    next_of_type(&mut client, "hello").await;

    client.send(Message::text("not json")).await.unwrap();
    let error = next_of_type(&mut client, "error").await;
    assert!(error["error"].as_str().is_some_and(|m| !m.is_empty()));

    client
        .send(Message::text(r#"{"type":"subscribe","symbols":["aapl"," msft "]}"#))
        .await
        .unwrap();
    let ack = next_of_type(&mut client, "subscribed").await;
    assert_eq!(ack["symbols"], serde_json::json!(["AAPL", "MSFT"]));

    client
        .send(Message::text(r#"{"type":"get_latest"}"#))
        .await
        .unwrap();
    let latest = next_of_type(&mut client, "latest").await;
    assert!(latest["latest"]["AAPL"].is_null());
    assert!(latest["latest"]["MSFT"].is_null());

    cancel.cancel();
}

#[tokio::test]
async fn binary_frames_are_rejected() {
    let (mut client, cancel) = start_server().await;
    next_of_type(&mut client, "hello").await;

    client
        .send(Message::Binary(vec![1, 2, 3].into()))
        .await
        .unwrap();
    let error = next_of_type(&mut client, "error").await;
    assert_eq!(error["error"], "binary frames are not supported");

    cancel.cancel();
}

#[tokio::test]
async fn silent_client_is_evicted_after_one_interval() {
    let (mut client, relay, cancel) = start_server_with_heartbeat(Duration::from_millis(200)).await;
    wait_for_clients(&relay, 1).await;

    // Not polling the client means the server's ping is never answered.
    tokio::time::sleep(Duration::from_millis(450)).await;
    wait_for_clients(&relay, 0).await;

    let closed = timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    cancel.cancel();
}

#[tokio::test]
async fn responsive_client_stays_connected() {
    let (mut client, relay, cancel) = start_server_with_heartbeat(Duration::from_millis(100)).await;

    // Reading lets the client answer pings automatically.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while let Ok(Some(message)) = tokio::time::timeout_at(deadline, client.next()).await {
        assert!(!matches!(message, Ok(Message::Close(_))), "client was closed");
    }
    assert_eq!(relay.status().connected_clients, 1);

    cancel.cancel();
}
