//! Shared harness: a real server on an ephemeral port plus small HTTP and
//! WebSocket helpers.
#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use sectorchat_server::config::Config;
use sectorchat_server::state::AppState;

pub const ADMIN_EMAIL: &str = "root@example.com";

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
pub type WsWrite = SplitSink<Socket, Message>;
pub type WsRead = SplitStream<Socket>;

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub state: AppState,
    pub data_dir: tempfile::TempDir,
}

/// Start the server on a random port with default limits.
pub async fn start_test_server() -> TestServer {
    start_test_server_with(|_| {}).await
}

pub async fn start_test_server_with(configure: impl FnOnce(&mut Config)) -> TestServer {
    let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = Config {
        data_dir: data_dir.path().to_str().unwrap().to_string(),
        admin_emails: vec![ADMIN_EMAIL.to_string()],
        ..Config::default()
    };
    configure(&mut config);

    let state = AppState::initialize(&config)
        .await
        .expect("Failed to initialize state");
    let app = sectorchat_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        state,
        data_dir,
    }
}

pub struct Registered {
    pub token: String,
    pub id: String,
    pub user: Value,
}

/// Register a user over HTTP and return its token and public record.
pub async fn register_user(base_url: &str, name: &str, email: &str, sector: &str) -> Registered {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/register", base_url))
        .json(&json!({
            "name": name,
            "email": email,
            "sector": sector,
            "password": format!("pw-{name}"),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "Registration failed for {}", name);

    let body: Value = resp.json().await.unwrap();
    Registered {
        token: body["token"].as_str().unwrap().to_string(),
        id: body["user"]["id"].as_str().unwrap().to_string(),
        user: body["user"].clone(),
    }
}

/// Open an authenticated WebSocket and drain the connect-time presence frames.
pub async fn connect(addr: SocketAddr, token: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    let (write, mut read) = ws_stream.split();
    drain(&mut read).await;
    (write, read)
}

/// Discard every frame that arrives within a short quiet period.
pub async fn drain(read: &mut WsRead) {
    while let Ok(Some(Ok(_))) = tokio::time::timeout(Duration::from_millis(200), read.next()).await {}
}

/// Next JSON event, skipping control frames. Panics after two seconds.
pub async fn next_event(read: &mut WsRead) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for an event")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("Event is JSON");
        }
    }
}

/// Next event with the given name; other events are skipped.
pub async fn next_named(read: &mut WsRead, name: &str) -> Value {
    loop {
        let event = next_event(read).await;
        if event["event"] == name {
            return event["data"].clone();
        }
    }
}

/// Assert that no event with the given name arrives within `wait`.
pub async fn assert_no_event(read: &mut WsRead, name: &str, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, read.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let event: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_ne!(event["event"], name, "Unexpected event: {}", event);
            }
            Ok(Some(Ok(_))) => {}
            Ok(_) => return,
        }
    }
}

/// Send a client event and wait for its ack.
pub async fn request(write: &mut WsWrite, read: &mut WsRead, event: &str, data: Value) -> Value {
    request_with_events(write, read, event, data).await.0
}

/// Like `request`, also returning the events that arrived before the ack.
pub async fn request_with_events(
    write: &mut WsWrite,
    read: &mut WsRead,
    event: &str,
    data: Value,
) -> (Value, Vec<Value>) {
    let request_id = uuid::Uuid::now_v7().to_string();
    let frame = json!({ "event": event, "requestId": request_id, "data": data });
    write
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("Failed to send");

    let mut before = Vec::new();
    loop {
        let event = next_event(read).await;
        if event["event"] == "ack" && event["data"]["requestId"] == request_id.as_str() {
            return (event["data"].clone(), before);
        }
        before.push(event);
    }
}

pub async fn join(write: &mut WsWrite, read: &mut WsRead, room: &str) -> Value {
    request(write, read, "join", json!({ "room": room })).await
}

pub async fn send_text(write: &mut WsWrite, read: &mut WsRead, room: &str, text: &str) -> Value {
    request(write, read, "message", json!({ "room": room, "text": text })).await
}
