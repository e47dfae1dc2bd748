//! Integration tests for WebSocket auth, rooms, messaging and presence.

mod common;

use common::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_sector_room_end_to_end() {
    let server = start_test_server().await;
    let alice = register_user(&server.base_url, "Alice", "alice@example.com", "Sales").await;
    let bob = register_user(&server.base_url, "Bob", "bob@example.com", "Sales").await;
    let carol = register_user(&server.base_url, "Carol", "carol@example.com", "Marketing").await;

    let (mut alice_w, mut alice_r) = connect(server.addr, &alice.token).await;
    let (mut bob_w, mut bob_r) = connect(server.addr, &bob.token).await;
    let (mut carol_w, mut carol_r) = connect(server.addr, &carol.token).await;

    let ack = join(&mut alice_w, &mut alice_r, "Sales").await;
    assert_eq!(ack["ok"], true);
    assert_eq!(ack["messages"], json!([]));

    let ack = join(&mut bob_w, &mut bob_r, "Sales").await;
    assert_eq!(ack["ok"], true);

    // Alice is told about Bob joining
    let joined = next_named(&mut alice_r, "user-joined").await;
    assert_eq!(joined, json!({ "user": "Bob", "userId": bob.id }));

    let (ack, before) = request_with_events(
        &mut alice_w,
        &mut alice_r,
        "message",
        json!({ "room": "Sales", "text": "Hello team!" }),
    )
    .await;
    assert_eq!(ack["ok"], true);
    let sent = ack["message"].clone();
    assert_eq!(sent["text"], "Hello team!");
    assert_eq!(sent["room"], "Sales");
    assert_eq!(sent["author"]["name"], "Alice");
    assert_eq!(sent["author"]["isAdmin"], false);

    // The sender receives its own broadcast, before the ack
    let own = before
        .iter()
        .find(|e| e["event"] == "message")
        .expect("sender receives the broadcast");
    assert_eq!(own["data"]["id"], sent["id"]);

    let received = next_named(&mut bob_r, "message").await;
    assert_eq!(received["id"], sent["id"]);
    assert_eq!(received["text"], "Hello team!");

    let ack = join(&mut carol_w, &mut carol_r, "Sales").await;
    assert_eq!(ack, json!({ "requestId": ack["requestId"], "ok": false, "msg": "not allowed" }));

    let ack = send_text(&mut carol_w, &mut carol_r, "Sales", "let me in").await;
    assert_eq!(ack["msg"], "not allowed");

    // Late joiners get the retained history
    let ack = join(&mut bob_w, &mut bob_r, "Sales").await;
    assert_eq!(ack["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ws_auth_failure_closes_with_4002() {
    let server = start_test_server().await;

    for url in [
        format!("ws://{}/ws?token=not-a-real-token", server.addr),
        format!("ws://{}/ws", server.addr),
    ] {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("WebSocket should upgrade even with invalid token");
        let (_write, mut read) = ws_stream.split();

        let error = next_named(&mut read, "error").await;
        assert_eq!(error["msg"], "unauthenticated");

        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Expected close message within timeout");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(frame.code, CloseCode::from(4002));
            }
            other => panic!("Expected close frame 4002, got: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_ws_accepts_bearer_header() {
    let server = start_test_server().await;
    let alice = register_user(&server.base_url, "Alice", "alice@example.com", "Sales").await;

    let mut req = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    req.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", alice.token).parse().unwrap(),
    );
    let (ws_stream, _) = tokio_tungstenite::connect_async(req)
        .await
        .expect("Failed to connect");
    let (mut write, mut read) = ws_stream.split();

    let list = next_named(&mut read, "presence-list").await;
    assert_eq!(list, json!([alice.id]));

    let ack = join(&mut write, &mut read, "Sales").await;
    assert_eq!(ack["ok"], true);
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let server = start_test_server().await;
    let alice = register_user(&server.base_url, "Alice", "alice@example.com", "Sales").await;
    let (mut write, mut read) = connect(server.addr, &alice.token).await;

    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected pong within timeout");
    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_presence_transitions_once_per_user() {
    let server = start_test_server().await;
    let alice = register_user(&server.base_url, "Alice", "alice@example.com", "Sales").await;
    let bob = register_user(&server.base_url, "Bob", "bob@example.com", "Sales").await;

    let (_alice_w, mut alice_r) = connect(server.addr, &alice.token).await;

    // Bob's first connection: everyone hears it, Bob gets the full list
    let url = format!("ws://{}/ws?token={}", server.addr, bob.token);
    let (bob1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut bob1_w, mut bob1_r) = bob1.split();
    let mut list = next_named(&mut bob1_r, "presence-list").await;
    list.as_array_mut().unwrap().sort_by_key(|v| v.as_str().unwrap().to_string());
    let mut expected = vec![alice.id.clone(), bob.id.clone()];
    expected.sort();
    assert_eq!(list, json!(expected));

    let online = next_named(&mut alice_r, "presence").await;
    assert_eq!(online, json!({ "userId": bob.id, "online": true }));

    // Second connection and its close are not transitions
    let (mut bob2_w, _bob2_r) = connect(server.addr, &bob.token).await;
    assert_no_event(&mut alice_r, "presence", Duration::from_millis(300)).await;
    bob2_w.send(Message::Close(None)).await.unwrap();
    assert_no_event(&mut alice_r, "presence", Duration::from_millis(300)).await;
    assert!(server.state.presence.is_online(&bob.id));

    bob1_w.send(Message::Close(None)).await.unwrap();
    let offline = next_named(&mut alice_r, "presence").await;
    assert_eq!(offline, json!({ "userId": bob.id, "online": false }));
    assert!(!server.state.presence.is_online(&bob.id));
}

#[tokio::test]
async fn test_rate_limit_rejects_eighth_message() {
    let server = start_test_server().await;
    let alice = register_user(&server.base_url, "Alice", "alice@example.com", "Sales").await;
    let (mut write, mut read) = connect(server.addr, &alice.token).await;

    for i in 0..7 {
        let ack = send_text(&mut write, &mut read, "Sales", &format!("msg {i}")).await;
        assert_eq!(ack["ok"], true, "message {i} should be admitted");
    }
    let ack = send_text(&mut write, &mut read, "Sales", "one too many").await;
    assert_eq!(ack["ok"], false);
    assert_eq!(ack["msg"], "rate limit");

    // A second connection of the same user has its own window
    let (mut other_w, mut other_r) = connect(server.addr, &alice.token).await;
    let ack = send_text(&mut other_w, &mut other_r, "Sales", "fresh window").await;
    assert_eq!(ack["ok"], true);

    assert_eq!(server.state.store.history("Sales").len(), 8);
}

#[tokio::test]
async fn test_rate_limit_window_is_configurable() {
    let server = start_test_server_with(|config| {
        config.rate_limit = Some(sectorchat_server::config::RateLimitConfig {
            max_messages: 2,
            window_secs: 1,
            ..Default::default()
        });
    })
    .await;
    let alice = register_user(&server.base_url, "Alice", "alice@example.com", "Sales").await;
    let (mut write, mut read) = connect(server.addr, &alice.token).await;

    assert_eq!(send_text(&mut write, &mut read, "Sales", "a").await["ok"], true);
    assert_eq!(send_text(&mut write, &mut read, "Sales", "b").await["ok"], true);
    assert_eq!(send_text(&mut write, &mut read, "Sales", "c").await["msg"], "rate limit");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(send_text(&mut write, &mut read, "Sales", "d").await["ok"], true);
}

#[tokio::test]
async fn test_message_text_is_sanitized() {
    let server = start_test_server().await;
    let alice = register_user(&server.base_url, "Alice", "alice@example.com", "Sales").await;
    let (mut write, mut read) = connect(server.addr, &alice.token).await;

    let ack = send_text(&mut write, &mut read, "Sales", "<script>alert(1)</script>hello ").await;
    assert_eq!(ack["message"]["text"], "hello");

    // Markup-only text is still delivered, as an empty message
    let ack = send_text(&mut write, &mut read, "Sales", "<b></b>").await;
    assert_eq!(ack["ok"], true);
    assert_eq!(ack["message"]["text"], "");
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_on_their_ack() {
    let server = start_test_server().await;
    let alice = register_user(&server.base_url, "Alice", "alice@example.com", "Sales").await;
    let (mut write, mut read) = connect(server.addr, &alice.token).await;

    let ack = request(&mut write, &mut read, "message", json!({ "room": "Sales" })).await;
    assert_eq!(ack["msg"], "invalid payload");
    let ack = request(&mut write, &mut read, "message", json!({ "room": "", "text": "hi" })).await;
    assert_eq!(ack["msg"], "invalid payload");
    let ack = request(&mut write, &mut read, "message", json!({ "room": "Sales", "text": 5 })).await;
    assert_eq!(ack["msg"], "invalid payload");
    let ack = request(&mut write, &mut read, "join", json!({ "room": "dm:only-one" })).await;
    assert_eq!(ack["msg"], "invalid room");
    let ack = request(&mut write, &mut read, "shout", json!({})).await;
    assert_eq!(ack["ok"], false);

    // Garbage frames get an error event and the connection stays usable
    write.send(Message::Text("{not json".to_string().into())).await.unwrap();
    let error = next_named(&mut read, "error").await;
    assert_eq!(error["msg"], "invalid payload");
    assert_eq!(join(&mut write, &mut read, "Sales").await["ok"], true);
}

#[tokio::test]
async fn test_direct_rooms() {
    let server = start_test_server().await;
    let alice = register_user(&server.base_url, "Alice", "alice@example.com", "Sales").await;
    let bob = register_user(&server.base_url, "Bob", "bob@example.com", "Marketing").await;
    let carol = register_user(&server.base_url, "Carol", "carol@example.com", "Sales").await;
    let root = register_user(&server.base_url, "Root", ADMIN_EMAIL, "Ops").await;
    assert_eq!(root.user["admin"], true);

    let (mut alice_w, mut alice_r) = connect(server.addr, &alice.token).await;
    let (mut bob_w, mut bob_r) = connect(server.addr, &bob.token).await;
    let (mut carol_w, mut carol_r) = connect(server.addr, &carol.token).await;
    let (mut root_w, mut root_r) = connect(server.addr, &root.token).await;

    let (low, high) = if alice.id < bob.id {
        (&alice.id, &bob.id)
    } else {
        (&bob.id, &alice.id)
    };
    let canonical = format!("dm:{}:{}", low, high);
    let reversed = format!("dm:{}:{}", high, low);

    assert_eq!(join(&mut alice_w, &mut alice_r, &canonical).await["ok"], true);
    assert_eq!(join(&mut bob_w, &mut bob_r, &reversed).await["ok"], true);
    assert_eq!(
        join(&mut carol_w, &mut carol_r, &canonical).await["msg"],
        "not allowed"
    );
    assert_eq!(join(&mut root_w, &mut root_r, &canonical).await["ok"], true);

    // Both spellings address the same room
    let ack = send_text(&mut bob_w, &mut bob_r, &reversed, "psst").await;
    assert_eq!(ack["message"]["room"], canonical.as_str());
    let received = next_named(&mut alice_r, "message").await;
    assert_eq!(received["text"], "psst");

    // Admins may use any sector room too
    assert_eq!(join(&mut root_w, &mut root_r, "Marketing").await["ok"], true);
}

#[tokio::test]
async fn test_leave_notifies_but_disconnect_is_silent() {
    let server = start_test_server().await;
    let alice = register_user(&server.base_url, "Alice", "alice@example.com", "Sales").await;
    let bob = register_user(&server.base_url, "Bob", "bob@example.com", "Sales").await;

    let (mut alice_w, mut alice_r) = connect(server.addr, &alice.token).await;
    let (mut bob_w, mut bob_r) = connect(server.addr, &bob.token).await;
    join(&mut alice_w, &mut alice_r, "Sales").await;
    join(&mut bob_w, &mut bob_r, "Sales").await;
    next_named(&mut alice_r, "user-joined").await;

    let ack = request(&mut bob_w, &mut bob_r, "leave", json!({ "room": "Sales" })).await;
    assert_eq!(ack["ok"], true);
    let left = next_named(&mut alice_r, "user-left").await;
    assert_eq!(left, json!({ "user": "Bob", "userId": bob.id }));

    // Messages only reach current members
    send_text(&mut alice_w, &mut alice_r, "Sales", "bob is gone").await;
    assert_no_event(&mut bob_r, "message", Duration::from_millis(300)).await;

    // Leaving again is a harmless no-op
    let ack = request(&mut bob_w, &mut bob_r, "leave", json!({ "room": "Sales" })).await;
    assert_eq!(ack["ok"], true);

    join(&mut bob_w, &mut bob_r, "Sales").await;
    next_named(&mut alice_r, "user-joined").await;
    bob_w.send(Message::Close(None)).await.unwrap();

    let next = next_event(&mut alice_r).await;
    assert_eq!(next["event"], "presence");
    assert_eq!(next["data"], json!({ "userId": bob.id, "online": false }));
    assert_eq!(server.state.rooms.members("Sales").len(), 1);
}
