//! Integration tests for the live composition pipeline.
//!
//! These tests run an in-process WebSocket peer standing in for the server
//! and connect a real client, verifying frames on the wire in both
//! directions.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use liveboard_collab::client::{ClientConfig, ConnectionState, SyncClient};
use liveboard_collab::composer::{ComposerConfig, PostComposer};
use liveboard_collab::composer::state::CompositionState;
use liveboard_collab::context::Context;
use liveboard_collab::dispatch::{ClientEvent, Dispatcher};
use liveboard_collab::protocol::{MessageType, ServerMessage};
use liveboard_core::{PostRegistry, ThreadRegistry};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

/// Server side of a single connection.
struct FakeServer {
    url: String,
    /// Frames the client sent
    received: mpsc::UnboundedReceiver<String>,
    /// Frames to push to the client. Dropping it closes the socket.
    push: mpsc::UnboundedSender<String>,
}

impl FakeServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut writer, mut reader) = ws.split();
            tokio::spawn(async move {
                while let Some(Ok(msg)) = reader.next().await {
                    if let Message::Text(text) = msg {
                        let _ = received_tx.send(text.as_str().to_string());
                    }
                }
            });
            while let Some(frame) = push_rx.recv().await {
                if writer.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = writer.close().await;
        });

        Self {
            url: format!("ws://127.0.0.1:{port}/api/socket"),
            received,
            push,
        }
    }

    async fn next_frame(&mut self) -> String {
        timeout(Duration::from_secs(2), self.received.recv())
            .await
            .expect("Timed out waiting for a client frame")
            .expect("Client connection ended")
    }

    fn send(&self, msg: ServerMessage) {
        self.push.send(msg.encode().unwrap()).unwrap();
    }
}

struct Session {
    client: Arc<SyncClient>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ThreadRegistry>,
    events: mpsc::Receiver<ClientEvent>,
}

impl Session {
    async fn connect(server: &FakeServer) -> Self {
        let client = Arc::new(SyncClient::new(ClientConfig {
            server_url: server.url.clone(),
            board: "a".into(),
            thread: 1,
            ..ClientConfig::default()
        }));
        let registry = Arc::new(ThreadRegistry::new());
        let ctx = Context::new(registry.clone(), client.clone(), "a", 1);
        let dispatcher = Arc::new(Dispatcher::new(ctx));
        let events = dispatcher.take_event_rx().unwrap();
        client.connect(dispatcher.clone()).await.unwrap();
        Self {
            client,
            dispatcher,
            registry,
            events,
        }
    }

    fn composer(&self) -> PostComposer {
        self.dispatcher.new_composer(ComposerConfig::default())
    }

    /// Wait for the first event matching `pred`, skipping others.
    async fn wait_for(&mut self, pred: impl Fn(&ClientEvent) -> bool) -> ClientEvent {
        loop {
            let event = timeout(Duration::from_secs(2), self.events.recv())
                .await
                .expect("Timed out waiting for an event")
                .expect("Event channel closed");
            if pred(&event) {
                return event;
            }
        }
    }
}

#[tokio::test]
async fn test_synchronise_sent_first() {
    let mut server = FakeServer::start().await;
    let mut session = Session::connect(&server).await;

    assert_eq!(server.next_frame().await, r#"30{"board":"a","thread":1}"#);
    assert_eq!(
        session.wait_for(|_| true).await,
        ClientEvent::Connected
    );
    assert_eq!(session.client.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_allocation_lifecycle() {
    let mut server = FakeServer::start().await;
    let mut session = Session::connect(&server).await;
    server.next_frame().await;
    let composer = session.composer();

    composer.submit_edit("h").unwrap();
    assert_eq!(server.next_frame().await, r#"01{"open":true,"body":"h"}"#);
    assert_eq!(composer.state(), CompositionState::Allocating);

    // Typed while the allocation is in flight, held back
    composer.submit_edit("he").unwrap();
    composer.submit_edit("hel").unwrap();

    server.send(ServerMessage::PostId(42));
    session
        .wait_for(|e| matches!(e, ClientEvent::Allocated(42)))
        .await;
    assert_eq!(composer.state(), CompositionState::Allocated);
    assert_eq!(session.registry.get(42).unwrap().body, "h");

    // One corrective edit covers the whole gap
    composer.submit_edit("hell").unwrap();
    assert_eq!(
        server.next_frame().await,
        r#"04{"start":1,"len":0,"text":"ell"}"#
    );
    composer.submit_edit("hello").unwrap();
    assert_eq!(server.next_frame().await, "02111");
    composer.submit_edit("hell").unwrap();
    assert_eq!(server.next_frame().await, "03");

    composer.request_close("hell").unwrap();
    assert_eq!(server.next_frame().await, "05");
    assert_eq!(composer.state(), CompositionState::Halted);
    assert!(!session.registry.get(42).unwrap().editing);
}

#[tokio::test]
async fn test_remote_post_updates() {
    let mut server = FakeServer::start().await;
    let mut session = Session::connect(&server).await;
    server.next_frame().await;

    server.push
        .send(r#"01{"id":7,"editing":true,"body":""}"#.to_string())
        .unwrap();
    server.send(ServerMessage::Concat(vec![
        "02[7,104]".into(),
        "02[99,33]".into(),
        "02[7,105]".into(),
    ]));
    server.send(ServerMessage::ClosePost(
        serde_json::from_str(r#"{"id":7,"links":null,"commands":null}"#).unwrap(),
    ));

    session
        .wait_for(|e| {
            matches!(
                e,
                ClientEvent::PostChanged {
                    id: 7,
                    kind: MessageType::ClosePost
                }
            )
        })
        .await;

    let post = session.registry.get(7).unwrap();
    assert_eq!(post.body, "hi");
    assert!(!post.editing);
    assert!(!session.registry.contains(99));
}

#[tokio::test]
async fn test_invalid_halts_session() {
    let mut server = FakeServer::start().await;
    let mut session = Session::connect(&server).await;
    server.next_frame().await;
    let composer = session.composer();

    composer.submit_edit("x").unwrap();
    server.next_frame().await;

    server.send(ServerMessage::Invalid("banned".into()));
    assert_eq!(
        session
            .wait_for(|e| matches!(e, ClientEvent::Fatal(_)))
            .await,
        ClientEvent::Fatal("banned".into())
    );
    assert_eq!(composer.state(), CompositionState::Halted);
    assert_eq!(session.client.connection_state(), ConnectionState::Errored);

    // Nothing is sent after the halt
    composer.submit_edit("xyz").unwrap();
    assert!(composer.request_spoiler().is_ok_and(|sent| !sent));

    session
        .wait_for(|e| *e == ClientEvent::Disconnected)
        .await;
    assert_eq!(session.client.connection_state(), ConnectionState::Errored);
}

#[tokio::test]
async fn test_server_close_disconnects() {
    let server = FakeServer::start().await;
    let mut session = Session::connect(&server).await;

    drop(server);
    session
        .wait_for(|e| *e == ClientEvent::Disconnected)
        .await;
    assert_eq!(
        session.client.connection_state(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_server_time_and_notifications() {
    let mut server = FakeServer::start().await;
    let mut session = Session::connect(&server).await;
    server.next_frame().await;

    server.send(ServerMessage::Notification("hello".into()));
    assert_eq!(
        session
            .wait_for(|e| matches!(e, ClientEvent::Notification(_)))
            .await,
        ClientEvent::Notification("hello".into())
    );

    server.send(ServerMessage::ServerTime(0));
    session
        .wait_for(|e| matches!(e, ClientEvent::ServerTime { server: 0, .. }))
        .await;
    assert!(session.dispatcher.server_offset() < 0);
}
