use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use super::*;
use crate::backend::memory::MemoryBackend;
use crate::frame::{Frame, Status};
use crate::state::test_helpers;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_app() -> (SocketAddr, MemoryBackend) {
    let (state, backend) = test_helpers::test_app_state();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.expect("serve");
    });
    (addr, backend)
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .expect("response timeout")
        .expect("read");
    response
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (mut stream, _) = connect_async(format!("ws://{addr}/api/ws"))
        .await
        .expect("ws connect");
    let welcome = recv_until(&mut stream, |f| f.syscall == "session:connected").await;
    assert_eq!(welcome.str_field("project_id"), Some("test-project"));
    let initial = recv_until(&mut stream, |f| f.syscall == "auth:state").await;
    assert_eq!(initial.data.get("session"), Some(&Value::Null));
    stream
}

async fn send(stream: &mut WsStream, syscall: &str, data: Value) -> Uuid {
    let Value::Object(data) = data else {
        panic!("frame data must be an object");
    };
    let frame = Frame::request(syscall, data.into_iter().collect());
    let json = serde_json::to_string(&frame).expect("serialize");
    stream.send(Message::Text(json.into())).await.expect("ws send");
    frame.id
}

/// Read frames until one matches `pred`, skipping the rest.
async fn recv_until(stream: &mut WsStream, pred: impl Fn(&Frame) -> bool) -> Frame {
    let fut = async {
        loop {
            let message = stream.next().await.expect("stream open").expect("ws recv");
            let Message::Text(text) = message else {
                continue;
            };
            let frame: Frame = serde_json::from_str(text.as_str()).expect("frame json");
            if pred(&frame) {
                return frame;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for frame")
}

/// Read frames until both predicates have matched, in either order.
async fn recv_both(
    stream: &mut WsStream,
    first: impl Fn(&Frame) -> bool,
    second: impl Fn(&Frame) -> bool,
) -> (Frame, Frame) {
    let (mut a, mut b) = (None, None);
    while a.is_none() || b.is_none() {
        let frame = recv_until(stream, |f| (a.is_none() && first(f)) || (b.is_none() && second(f))).await;
        if a.is_none() && first(&frame) {
            a = Some(frame);
        } else {
            b = Some(frame);
        }
    }
    (a.expect("first frame"), b.expect("second frame"))
}

fn reply_to(id: Uuid) -> impl Fn(&Frame) -> bool {
    move |f| f.parent_id == Some(id)
}

fn messages_of(frame: &Frame) -> Vec<Value> {
    frame.data.get("messages").and_then(Value::as_array).cloned().unwrap_or_default()
}

async fn sign_in(stream: &mut WsStream, name: &str) {
    let id = send(stream, "auth:sign_in", json!({ "provider": "google", "display_name": name })).await;
    let reply = recv_until(stream, reply_to(id)).await;
    assert_eq!(reply.status, Status::Done);
}

// =============================================================================
// PAGES
// =============================================================================

#[tokio::test]
async fn healthz_is_ok() {
    let (addr, _backend) = spawn_app().await;
    let response = http_get(addr, "/healthz").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
}

#[tokio::test]
async fn view_routes_serve_pages() {
    let (addr, _backend) = spawn_app().await;
    for (path, title) in [("/", "Marketplace"), ("/buyer", "Buy"), ("/seller", "Sell")] {
        let response = http_get(addr, path).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{path}: {response}");
        assert!(response.contains(&format!("<title>{title}</title>")), "{path}");
    }
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let (addr, _backend) = spawn_app().await;
    let response = http_get(addr, "/checkout").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
}

// =============================================================================
// SESSION SOCKET
// =============================================================================

#[tokio::test]
async fn sign_in_pushes_session_and_feed() {
    let (addr, _backend) = spawn_app().await;
    let mut stream = connect(addr).await;

    sign_in(&mut stream, "Alice").await;
    let (state, feed) =
        recv_both(&mut stream, |f| f.syscall == "auth:state", |f| f.syscall == "chat:messages").await;
    assert_eq!(state.data["session"]["displayName"], "Alice");
    assert!(messages_of(&feed).is_empty());
}

#[tokio::test]
async fn sent_message_arrives_through_the_feed() {
    let (addr, backend) = spawn_app().await;
    let mut stream = connect(addr).await;
    sign_in(&mut stream, "Alice").await;

    let id = send(&mut stream, "chat:send", json!({ "text": "still available?" })).await;
    let reply = recv_until(&mut stream, reply_to(id)).await;
    assert_eq!(reply.data.get("sent"), Some(&json!(true)));

    let feed = recv_until(&mut stream, |f| f.syscall == "chat:messages" && !messages_of(f).is_empty()).await;
    let messages = messages_of(&feed);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["text"], "still available?");
    assert_eq!(messages[0]["userName"], "Alice");
    assert!(messages[0]["createdAt"].is_i64());
    assert_eq!(backend.store().document_count(crate::chat::MESSAGES_COLLECTION), 1);
}

#[tokio::test]
async fn signed_out_send_is_acknowledged_without_writing() {
    let (addr, backend) = spawn_app().await;
    let mut stream = connect(addr).await;

    let id = send(&mut stream, "chat:send", json!({ "text": "hello?" })).await;
    let reply = recv_until(&mut stream, reply_to(id)).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data.get("sent"), Some(&json!(false)));
    assert_eq!(backend.store().document_count(crate::chat::MESSAGES_COLLECTION), 0);
}

#[tokio::test]
async fn blocked_send_is_reported_and_never_broadcast() {
    let (addr, backend) = spawn_app().await;
    let mut stream = connect(addr).await;
    sign_in(&mut stream, "Alice").await;

    let id = send(&mut stream, "chat:send", json!({ "text": "let's continue on signal" })).await;
    let reply = recv_until(&mut stream, reply_to(id)).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data.get("blocked"), Some(&json!(true)));
    assert_eq!(reply.data["alerts"][0]["type"], "external_platform");
    assert_eq!(backend.store().document_count(crate::chat::MESSAGES_COLLECTION), 0);
}

#[tokio::test]
async fn messages_reach_other_signed_in_clients() {
    let (addr, _backend) = spawn_app().await;
    let mut buyer = connect(addr).await;
    let mut seller = connect(addr).await;
    sign_in(&mut buyer, "Buyer").await;
    sign_in(&mut seller, "Seller").await;

    send(&mut buyer, "chat:send", json!({ "text": "would you take 20?" })).await;
    let feed = recv_until(&mut seller, |f| f.syscall == "chat:messages" && !messages_of(f).is_empty()).await;
    let messages = messages_of(&feed);
    assert_eq!(messages[0]["userName"], "Buyer");
    assert_eq!(messages[0]["text"], "would you take 20?");
}

#[tokio::test]
async fn sign_out_pushes_empty_feed() {
    let (addr, _backend) = spawn_app().await;
    let mut stream = connect(addr).await;
    sign_in(&mut stream, "Alice").await;
    send(&mut stream, "chat:send", json!({ "text": "hello" })).await;
    recv_until(&mut stream, |f| f.syscall == "chat:messages" && !messages_of(f).is_empty()).await;

    let id = send(&mut stream, "auth:sign_out", json!({})).await;
    let reply = recv_until(&mut stream, reply_to(id)).await;
    assert_eq!(reply.status, Status::Done);
    let (state, feed) = recv_both(
        &mut stream,
        |f| f.syscall == "auth:state" && f.data.get("session") == Some(&Value::Null),
        |f| f.syscall == "chat:messages" && messages_of(f).is_empty(),
    )
    .await;
    assert_eq!(state.data.get("session"), Some(&Value::Null));
    assert!(messages_of(&feed).is_empty());
}

#[tokio::test]
async fn closing_the_socket_releases_the_subscription() {
    let (addr, backend) = spawn_app().await;
    let mut stream = connect(addr).await;
    sign_in(&mut stream, "Alice").await;
    assert_eq!(backend.store().subscription_count(), 1);

    stream.close(None).await.expect("close");

    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.store().subscription_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscription still open after disconnect");
}

#[tokio::test]
async fn malformed_frame_yields_gateway_error() {
    let (addr, _backend) = spawn_app().await;
    let mut stream = connect(addr).await;

    stream.send(Message::Text("not a frame".into())).await.expect("ws send");
    let err = recv_until(&mut stream, |f| f.syscall == "gateway:error").await;
    assert!(err.str_field("message").is_some_and(|m| m.starts_with("invalid json")));
}
