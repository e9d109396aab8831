use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
};
use coedit_common::protocol::frames::{Registration, ServerFrame};
use coedit_relay::{app, hub::CollabHub, ot::LoopbackEngine};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;

type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: std::net::SocketAddr,
    hub: CollabHub,
    engine: Arc<LoopbackEngine>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("test listener should bind");
        let addr = listener.local_addr().expect("listener should expose local address");
        let hub = CollabHub::default();
        let engine = Arc::new(LoopbackEngine::default());

        let router = app::build_router(hub.clone(), engine.clone());
        let task = tokio::spawn(async move {
            app::serve(listener, router, std::future::pending())
                .await
                .expect("relay server should run");
        });

        Self { addr, hub, engine, task }
    }

    async fn connect(&self) -> ClientSocket {
        let (socket, _) =
            connect_async(format!("ws://{}/ws", self.addr)).await.expect("client should connect");
        socket
    }

    async fn admin(&self, uri: &str) -> (StatusCode, String) {
        let response = app::build_router(self.hub.clone(), self.engine.clone())
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .body(Body::empty())
                    .expect("admin request should build"),
            )
            .await
            .expect("admin request should return a response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("admin response body should be readable");
        (status, String::from_utf8(bytes.to_vec()).expect("admin response should be utf8"))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn register(socket: &mut ClientSocket, doc_id: &str, user_id: &str) {
    let frame = Registration {
        doc_id: doc_id.into(),
        user_id: user_id.into(),
        user_name: user_id.to_uppercase(),
        user_url: format!("/wiki/User:{user_id}"),
        user_gravatar: String::new(),
    }
    .encode()
    .expect("registration should encode");
    socket.send(WsMessage::Text(frame.into())).await.expect("registration should send");
}

async fn recv_text(socket: &mut ClientSocket) -> String {
    loop {
        let next = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for websocket frame");
        let message =
            next.expect("websocket should remain open").expect("websocket read should succeed");

        match message {
            WsMessage::Text(payload) => return payload.as_str().to_owned(),
            WsMessage::Ping(payload) => {
                socket.send(WsMessage::Pong(payload)).await.expect("websocket should reply to ping");
            }
            WsMessage::Close(frame) => panic!("websocket closed unexpectedly: {frame:?}"),
            WsMessage::Binary(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }
}

async fn recv_frame(socket: &mut ClientSocket) -> ServerFrame {
    let raw = recv_text(socket).await;
    ServerFrame::decode(&raw).expect("server frame should decode")
}

async fn recv_users(socket: &mut ClientSocket) -> Vec<(String, u32)> {
    match recv_frame(socket).await {
        ServerFrame::Meta { users } => {
            users.into_iter().map(|(user_id, entry)| (user_id, entry.count)).collect()
        }
        other => panic!("expected meta frame, got {other:?}"),
    }
}

/// Waits for the server to close the socket and returns the close code.
async fn recv_close_code(socket: &mut ClientSocket) -> Option<u16> {
    loop {
        let next = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(WsMessage::Close(frame))) => return frame.map(|frame| u16::from(frame.code)),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

/// Polls the engine until `expected` relay streams remain open.
async fn wait_for_open_streams(engine: &LoopbackEngine, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while engine.open_streams() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!("expected {expected} open engine streams, found {}", engine.open_streams())
    });
}

fn users(entries: &[(&str, u32)]) -> Vec<(String, u32)> {
    entries.iter().map(|(user_id, count)| ((*user_id).to_string(), *count)).collect()
}

#[tokio::test]
async fn lock_edit_disconnect_over_real_sockets() {
    let server = TestServer::start().await;

    let mut alice = server.connect().await;
    register(&mut alice, "doc1", "alice").await;
    assert_eq!(recv_users(&mut alice).await, users(&[("alice", 1)]));

    let mut bob = server.connect().await;
    register(&mut bob, "doc1", "bob").await;
    assert_eq!(recv_users(&mut bob).await, users(&[("alice", 1), ("bob", 1)]));
    assert_eq!(recv_users(&mut alice).await, users(&[("alice", 1), ("bob", 1)]));

    assert_eq!(server.admin("/lock/doc1").await, (StatusCode::OK, "doc1 was locked.".to_string()));
    assert_eq!(recv_frame(&mut alice).await, ServerFrame::Lock);
    assert_eq!(recv_frame(&mut bob).await, ServerFrame::Lock);

    alice
        .send(WsMessage::Text(r#"{"a":"op","op":[{"p":[0],"si":"x"}]}"#.into()))
        .await
        .expect("edit should send");
    assert_eq!(recv_frame(&mut alice).await, ServerFrame::Lock);
    assert_eq!(recv_frame(&mut bob).await, ServerFrame::Lock);
    assert_eq!(server.engine.frames_relayed(), 0);
    wait_for_open_streams(&server.engine, 2).await;

    alice.close(None).await.expect("alice should close");
    assert_eq!(recv_users(&mut bob).await, users(&[("bob", 1)]));
    wait_for_open_streams(&server.engine, 1).await;

    assert_eq!(
        server.admin("/unlock/doc1").await,
        (StatusCode::OK, "doc1 was unlocked.".to_string())
    );
    assert_eq!(recv_frame(&mut bob).await, ServerFrame::Unlock);
}

#[tokio::test]
async fn edits_reach_other_editors_through_engine() {
    let server = TestServer::start().await;

    let mut alice = server.connect().await;
    register(&mut alice, "doc1", "alice").await;
    recv_users(&mut alice).await;
    let mut bob = server.connect().await;
    register(&mut bob, "doc1", "bob").await;
    recv_users(&mut bob).await;
    recv_users(&mut alice).await;

    let edit = r#"{"a":"op","c":"wiki","d":"doc1","v":3,"op":[{"p":[4],"si":"hi"}]}"#;
    alice.send(WsMessage::Text(edit.into())).await.expect("edit should send");

    assert_eq!(recv_text(&mut bob).await, edit);
    assert_eq!(server.engine.frames_relayed(), 1);
}

#[tokio::test]
async fn late_joiner_on_locked_document_is_told_directly() {
    let server = TestServer::start().await;
    server.admin("/lock/doc1").await;

    let mut carol = server.connect().await;
    register(&mut carol, "doc1", "carol").await;
    assert_eq!(recv_users(&mut carol).await, users(&[("carol", 1)]));
    assert_eq!(recv_frame(&mut carol).await, ServerFrame::Lock);
}

#[tokio::test]
async fn redirect_and_delete_reach_only_that_document() {
    let server = TestServer::start().await;

    let mut alice = server.connect().await;
    register(&mut alice, "doc1", "alice").await;
    recv_users(&mut alice).await;
    let mut dave = server.connect().await;
    register(&mut dave, "doc2", "dave").await;
    recv_users(&mut dave).await;

    let (status, body) = server.admin("/redirect/doc1/wiki/Renamed_Page").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "doc1 was redirected to wiki/Renamed_Page");
    assert_eq!(
        recv_frame(&mut alice).await,
        ServerFrame::Redirect { redirect: "wiki/Renamed_Page".into() }
    );

    let (_, body) = server.admin("/delete/doc2/wiki/Main_Page").await;
    assert_eq!(body, "doc2 was deleted and redirected to wiki/Main_Page");
    assert_eq!(
        recv_frame(&mut dave).await,
        ServerFrame::Delete { redirect: "wiki/Main_Page".into() }
    );
}

#[tokio::test]
async fn malformed_frame_closes_only_the_offending_session() {
    let server = TestServer::start().await;

    let mut alice = server.connect().await;
    register(&mut alice, "doc1", "alice").await;
    recv_users(&mut alice).await;

    let mut mallory = server.connect().await;
    mallory.send(WsMessage::Text("definitely not json".into())).await.expect("frame should send");
    assert_eq!(recv_close_code(&mut mallory).await, Some(1002));

    server.admin("/lock/doc1").await;
    assert_eq!(recv_frame(&mut alice).await, ServerFrame::Lock);
}

#[tokio::test]
async fn registration_without_user_id_is_a_protocol_error() {
    let server = TestServer::start().await;

    let mut client = server.connect().await;
    client
        .send(WsMessage::Text(r#"{"registration":true,"docId":"doc1"}"#.into()))
        .await
        .expect("frame should send");

    assert_eq!(recv_close_code(&mut client).await, Some(1002));
    assert!(server.hub.presence("doc1").await.is_empty());
}

#[tokio::test]
async fn binary_frame_is_a_protocol_error() {
    let server = TestServer::start().await;

    let mut client = server.connect().await;
    client.send(WsMessage::Binary(vec![1, 2, 3].into())).await.expect("frame should send");
    assert_eq!(recv_close_code(&mut client).await, Some(1002));
}

#[tokio::test]
async fn oversized_frame_ends_the_session() {
    let server = TestServer::start().await;

    let mut client = server.connect().await;
    let oversized = format!(r#"{{"pad":"{}"}}"#, "x".repeat(300_000));
    let _ = client.send(WsMessage::Text(oversized.into())).await;

    if let Some(code) = recv_close_code(&mut client).await {
        assert_eq!(code, 1009);
    }
}
