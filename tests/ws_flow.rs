//! End-to-end tests over a real listener with a WebSocket client

use futures_util::{SinkExt, StreamExt};
use relay_hub::collector::LatencyCollector;
use relay_hub::hub::{Hub, MasterPolicy};
use relay_hub::infrastructure::api::{serve, AppState};
use relay_hub::infrastructure::metrics::MetricsCollector;
use relay_hub::router::{EventRouter, RouterSettings};
use relay_hub::storage::StorageHandler;
use relay_hub::upstream::{self, topics, RecordingPublisher, UpstreamMessage};
use relay_hub::ws::WsSettings;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Relay {
    addr: SocketAddr,
    router: Arc<EventRouter>,
    upstream: mpsc::Sender<UpstreamMessage>,
}

async fn start_relay() -> Relay {
    let metrics = Arc::new(MetricsCollector::new());
    let (hub, _) = Hub::spawn(MasterPolicy::Cascade, 64, metrics.clone());
    let router = Arc::new(EventRouter::new(
        hub,
        Arc::new(LatencyCollector::new()),
        StorageHandler::disabled(),
        Arc::new(RecordingPublisher::new()),
        metrics.clone(),
        RouterSettings::default(),
    ));
    let (tx, rx) = upstream::channel(16);
    upstream::spawn_ingest(router.clone(), rx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState {
        router: router.clone(),
        metrics,
        upstream: tx.clone(),
        ws: WsSettings::default(),
    };
    tokio::spawn(serve(listener, state));

    Relay {
        addr,
        router,
        upstream: tx,
    }
}

async fn connect(relay: &Relay, query: &str) -> Client {
    let url = format!("ws://{}/ws?{}", relay.addr, query);
    let (client, _) = connect_async(url).await.unwrap();
    client
}

/// Wait until the hub sees `members` connections in `session`
async fn wait_for_members(relay: &Relay, session: &str, members: usize) {
    for _ in 0..100 {
        let snapshot = relay.router.hub().snapshot().await;
        let count = snapshot.session(session).map_or(0, |s| s.members.len());
        if count == members {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never reached {} members", session, members);
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("valid frame");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let got = timeout(Duration::from_millis(200), client.next()).await;
    assert!(got.is_err(), "expected no frame, got {:?}", got);
}

#[tokio::test]
async fn test_session_fan_out_and_master_commands() {
    let relay = start_relay().await;
    let mut alice = connect(&relay, "userId=Alice&sessionId=room").await;
    wait_for_members(&relay, "room", 1).await;
    let mut bob = connect(&relay, "userId=bob&sessionId=room").await;
    wait_for_members(&relay, "room", 2).await;

    let frame = json!({"eventType": "COMMAND_MOVE", "userId": "alice", "data": [1, 2]});
    bob.send(Message::Text(frame.to_string().into())).await.unwrap();

    let got = next_json(&mut alice).await;
    assert_eq!(got["eventType"], "COMMAND_MOVE");
    assert_eq!(got["userId"], "bob");
    assert_eq!(got["sessionId"], "room");

    relay
        .upstream
        .send(UpstreamMessage::new(
            topics::COMMAND,
            json!({"type": "screenshot"}).to_string(),
        ))
        .await
        .unwrap();

    let got = next_json(&mut alice).await;
    assert_eq!(got["eventType"], "COMMAND_SCREENSHOT");
    assert_eq!(got["userId"], "*");
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn test_master_leaving_closes_session() {
    let relay = start_relay().await;
    let mut alice = connect(&relay, "userId=alice&sessionId=room").await;
    wait_for_members(&relay, "room", 1).await;
    let mut bob = connect(&relay, "userId=bob&sessionId=room").await;
    wait_for_members(&relay, "room", 2).await;

    alice.close(None).await.unwrap();

    let ended = timeout(Duration::from_secs(2), async {
        loop {
            match bob.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "follower was not disconnected");
    wait_for_members(&relay, "room", 0).await;
    assert!(relay.router.hub().snapshot().await.sessions.is_empty());
}

#[tokio::test]
async fn test_handshake_without_user_is_closed() {
    let relay = start_relay().await;
    let mut client = connect(&relay, "sessionId=room").await;

    let message = timeout(Duration::from_secs(2), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match message {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected close frame, got {:?}", other),
    }
    assert_eq!(relay.router.hub().snapshot().await.connection_count(), 0);
}
