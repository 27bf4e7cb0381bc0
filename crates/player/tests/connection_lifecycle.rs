//! Connection manager against an in-process WebSocket server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tavern_player::application::credentials::CredentialResolver;
use tavern_player::config::ConnectionConfig;
use tavern_player::infrastructure::messaging::{
    ConnectionState, DisconnectReason, EventDispatcher, LifecycleEvent, SessionEvent,
};
use tavern_player::infrastructure::storage::MemoryStorageProvider;
use tavern_player::infrastructure::websocket::{
    ConnectionError, ConnectionManager, EndpointConfig, ErrorKind, ReconnectPolicy,
};
use tavern_domain::ConnectionStatus;
use tavern_player::ports::outbound::SendError;
use tavern_protocol::{ClientCommand, Envelope, ServerEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(5);

enum Outbound {
    Text(String),
    Close(u16),
}

/// Server side of one accepted socket
struct ServerLink {
    index: usize,
    uri: String,
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<Outbound>,
}

impl ServerLink {
    fn send(&self, kind: &str, data: Value) {
        let text = Envelope::new(kind, data).to_json().unwrap();
        let _ = self.outgoing.send(Outbound::Text(text));
    }

    fn close(&self, code: u16) {
        let _ = self.outgoing.send(Outbound::Close(code));
    }

    async fn recv_text(&mut self) -> String {
        timeout(WAIT, self.incoming.recv())
            .await
            .expect("no frame from client")
            .expect("link closed")
    }

    async fn recv(&mut self) -> Envelope {
        let text = self.recv_text().await;
        Envelope::from_json(&text).unwrap()
    }

    /// Resolves once the client side has gone away
    async fn closed(&mut self) {
        timeout(WAIT, async { while self.incoming.recv().await.is_some() {} })
            .await
            .expect("link still open");
    }
}

struct TestServer {
    addr: SocketAddr,
    links: mpsc::UnboundedReceiver<ServerLink>,
    /// Non-zero: refuse handshakes with this HTTP status
    reject_with: Arc<AtomicU16>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, links) = mpsc::unbounded_channel();
        let reject_with = Arc::new(AtomicU16::new(0));
        let reject = Arc::clone(&reject_with);
        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                index += 1;
                tokio::spawn(serve(stream, index, Arc::clone(&reject), tx.clone()));
            }
        });
        Self {
            addr,
            links,
            reject_with,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/ws/game/{{session_id}}", self.addr)
    }

    fn reject(&self, status: StatusCode) {
        self.reject_with.store(status.as_u16(), Ordering::SeqCst);
    }

    /// Next session link. Every attempt opens a probe first, so the later of
    /// the next two sockets is the real one.
    async fn next_link(&mut self) -> ServerLink {
        let first = self.next_socket().await;
        let second = self.next_socket().await;
        if first.index > second.index {
            first
        } else {
            second
        }
    }

    async fn next_socket(&mut self) -> ServerLink {
        timeout(WAIT, self.links.recv())
            .await
            .expect("no connection")
            .expect("server stopped")
    }

    async fn assert_no_connection(&mut self, within: Duration) {
        assert!(timeout(within, self.links.recv()).await.is_err());
    }
}

async fn serve(
    stream: TcpStream,
    index: usize,
    reject: Arc<AtomicU16>,
    links: mpsc::UnboundedSender<ServerLink>,
) {
    let (uri_tx, uri_rx) = oneshot::channel();
    let status = reject.load(Ordering::SeqCst);
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let _ = uri_tx.send(req.uri().to_string());
        if status != 0 {
            let mut refused = ErrorResponse::new(Some("refused".to_string()));
            *refused.status_mut() = StatusCode::from_u16(status).unwrap();
            return Err(refused);
        }
        Ok(resp)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    let (outgoing, mut actions) = mpsc::unbounded_channel();
    let (incoming_tx, incoming) = mpsc::unbounded_channel();
    let uri = uri_rx.await.unwrap_or_default();
    if links
        .send(ServerLink {
            index,
            uri,
            incoming,
            outgoing,
        })
        .is_err()
    {
        return;
    }

    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = incoming_tx.send(text);
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            action = actions.recv() => match action {
                Some(Outbound::Text(text)) => {
                    if write.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "test".into(),
                    };
                    let _ = write.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
        }
    }
}

fn config(url: String, heartbeat: Duration) -> ConnectionConfig {
    ConnectionConfig {
        endpoint: EndpointConfig {
            url_override: Some(url),
            ..EndpointConfig::default()
        },
        heartbeat_interval: heartbeat,
        probe_timeout: Duration::from_millis(500),
        handshake_timeout: Duration::from_secs(2),
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            max_attempts: 3,
        },
        ..ConnectionConfig::default()
    }
}

fn manager(config: ConnectionConfig) -> (ConnectionManager, mpsc::UnboundedReceiver<SessionEvent>) {
    let credentials = CredentialResolver::new(Arc::new(MemoryStorageProvider::new()))
        .with_configured_token(Some("tok".to_string()));
    let dispatcher = EventDispatcher::new();
    let (tx, rx) = mpsc::unbounded_channel();
    dispatcher.subscribe_all(move |event| {
        let _ = tx.send(event.clone());
        Ok(())
    });
    (ConnectionManager::new(config, credentials, dispatcher), rx)
}

async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<SessionEvent>, mut matches: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("dispatcher dropped");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event never arrived")
}

fn chat(content: &str) -> Envelope {
    ClientCommand::ChatMessage {
        content: content.to_string(),
        is_ooc: false,
        client_message_id: None,
    }
    .into_envelope()
}

#[tokio::test]
async fn connects_with_token_and_exchanges_frames() {
    let mut server = TestServer::start().await;
    let (manager, mut events) = manager(config(server.url(), Duration::from_secs(30)));

    manager.connect("s1").await.unwrap();
    let mut link = server.next_link().await;
    assert_eq!(link.uri, "/ws/game/s1?token=tok");
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.session_id().as_deref(), Some("s1"));
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Lifecycle(LifecycleEvent::Connected))
    })
    .await;

    link.send("connected", json!({ "players": [{ "user_id": "u1", "username": "ann" }] }));
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Server(_))).await;
    match event {
        SessionEvent::Server(ServerEvent::Connected(snapshot)) => {
            assert_eq!(snapshot.players[0].user_id, "u1");
        }
        other => panic!("unexpected event {other:?}"),
    }

    manager.send(chat("hello")).unwrap();
    let raw = link.recv_text().await;
    let top: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(top["type"], "chat_message");
    assert_eq!(top["content"], "hello");
    let frame = Envelope::from_json(&raw).unwrap();
    assert_eq!(frame.data["content"], "hello");
    assert!(frame.timestamp.is_some());

    // Same session while connected is a no-op
    manager.connect("s1").await.unwrap();
    server.assert_no_connection(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn sends_heartbeat_pings() {
    let mut server = TestServer::start().await;
    let (manager, _events) = manager(config(server.url(), Duration::from_millis(100)));

    manager.connect("s1").await.unwrap();
    let mut link = server.next_link().await;
    assert_eq!(link.recv().await.kind, "ping");
    assert_eq!(link.recv().await.kind, "ping");
}

#[tokio::test]
async fn unknown_frames_do_not_break_the_link() {
    let mut server = TestServer::start().await;
    let (manager, mut events) = manager(config(server.url(), Duration::from_secs(30)));

    manager.connect("s1").await.unwrap();
    let link = server.next_link().await;
    link.send("weather_report", json!({ "sky": "grey" }));
    link.send("chat_message", json!({ "content": 42 }));
    link.send("system", json!({ "message": "still here" }));

    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Server(_))).await;
    assert!(matches!(
        event,
        SessionEvent::Server(ServerEvent::System(ref p)) if p.message == "still here"
    ));
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn reconnects_after_abnormal_close() {
    let mut server = TestServer::start().await;
    let (manager, mut events) = manager(config(server.url(), Duration::from_secs(30)));

    manager.connect("s1").await.unwrap();
    let link = server.next_link().await;
    link.close(1011);

    let event = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Lifecycle(LifecycleEvent::Disconnected { .. }))
    })
    .await;
    assert!(matches!(
        event,
        SessionEvent::Lifecycle(LifecycleEvent::Disconnected {
            reason: DisconnectReason::Unexpected(_)
        })
    ));
    let scheduled = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Lifecycle(LifecycleEvent::ReconnectScheduled { .. }))
    })
    .await;
    assert_eq!(
        scheduled,
        SessionEvent::Lifecycle(LifecycleEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(20),
        })
    );

    let mut link = server.next_link().await;
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Lifecycle(LifecycleEvent::Reconnected))
    })
    .await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.reconnect_attempts(), 0);

    manager.send(chat("back again")).unwrap();
    assert_eq!(link.recv().await.data["content"], "back again");
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let mut server = TestServer::start().await;
    let (manager, mut events) = manager(config(server.url(), Duration::from_secs(30)));

    // Sends attempted while each retry is pending
    let retry_sends = Arc::new(Mutex::new(Vec::new()));
    let subscription = {
        let sender = manager.clone();
        let results = Arc::clone(&retry_sends);
        manager.dispatcher().subscribe_all(move |event| {
            if matches!(event, SessionEvent::Lifecycle(LifecycleEvent::ReconnectScheduled { .. })) {
                results.lock().unwrap().push(sender.send(chat("anyone?")));
            }
            Ok(())
        })
    };

    manager.connect("s1").await.unwrap();
    let link = server.next_link().await;
    server.reject(StatusCode::BAD_GATEWAY);
    link.close(1011);

    let mut scheduled = Vec::new();
    let failure = wait_for(&mut events, |e| match e {
        SessionEvent::Lifecycle(LifecycleEvent::ReconnectScheduled { attempt, .. }) => {
            scheduled.push(*attempt);
            false
        }
        SessionEvent::Lifecycle(LifecycleEvent::Error { terminal, .. }) => *terminal,
        _ => false,
    })
    .await;

    assert_eq!(scheduled, [1, 2, 3]);
    assert!(matches!(
        failure,
        SessionEvent::Lifecycle(LifecycleEvent::Error {
            kind: ErrorKind::ReconnectExhausted,
            terminal: true,
            ..
        })
    ));
    assert_eq!(manager.state(), ConnectionState::Error);
    assert_eq!(
        manager.send(chat("anyone?")),
        Err(SendError::SendWhileDisconnected {
            state: ConnectionStatus::Error
        })
    );

    assert!(manager.dispatcher().unsubscribe(subscription));
    let retry_sends = retry_sends.lock().unwrap().clone();
    assert_eq!(retry_sends.len(), 3);
    for result in retry_sends {
        assert_eq!(
            result,
            Err(SendError::SendWhileDisconnected {
                state: ConnectionStatus::Reconnecting
            })
        );
    }
}

#[tokio::test]
async fn policy_violation_close_is_not_retried() {
    let mut server = TestServer::start().await;
    let (manager, mut events) = manager(config(server.url(), Duration::from_secs(30)));

    manager.connect("s1").await.unwrap();
    let link = server.next_link().await;
    link.close(1008);

    let failure = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Lifecycle(LifecycleEvent::Error { .. }))
    })
    .await;
    assert!(matches!(
        failure,
        SessionEvent::Lifecycle(LifecycleEvent::Error {
            kind: ErrorKind::AuthRejected,
            terminal: true,
            ..
        })
    ));
    assert_eq!(manager.state(), ConnectionState::Error);
    server.assert_no_connection(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn normal_close_ends_the_session() {
    let mut server = TestServer::start().await;
    let (manager, mut events) = manager(config(server.url(), Duration::from_secs(30)));

    manager.connect("s1").await.unwrap();
    let link = server.next_link().await;
    link.close(1000);

    let event = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Lifecycle(LifecycleEvent::Disconnected { .. }))
    })
    .await;
    assert!(matches!(
        event,
        SessionEvent::Lifecycle(LifecycleEvent::Disconnected {
            reason: DisconnectReason::ClosedByServer(_)
        })
    ));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    server.assert_no_connection(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn rejected_handshake_is_an_auth_error() {
    let server = TestServer::start().await;
    server.reject(StatusCode::UNAUTHORIZED);
    let (manager, _events) = manager(config(server.url(), Duration::from_secs(30)));

    let err = manager.connect("s1").await.unwrap_err();
    assert!(matches!(err, ConnectionError::AuthRejected(_)));
    assert_eq!(manager.state(), ConnectionState::Error);
}

#[tokio::test]
async fn switching_sessions_replaces_the_link() {
    let mut server = TestServer::start().await;
    let (manager, mut events) = manager(config(server.url(), Duration::from_secs(30)));

    manager.connect("s1").await.unwrap();
    let mut first = server.next_link().await;

    manager.connect("s2").await.unwrap();
    let mut second = server.next_link().await;
    assert_eq!(second.uri, "/ws/game/s2?token=tok");
    first.closed().await;

    wait_for(&mut events, |e| {
        matches!(
            e,
            SessionEvent::Lifecycle(LifecycleEvent::Disconnected {
                reason: DisconnectReason::SessionChanged
            })
        )
    })
    .await;

    manager.send(chat("new table")).unwrap();
    assert_eq!(second.recv().await.data["content"], "new table");

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.session_id(), None);
    second.closed().await;
    assert!(matches!(
        manager.send(chat("anyone?")),
        Err(SendError::SendWhileDisconnected { .. })
    ));
}

#[tokio::test]
async fn disconnect_while_connecting_discards_the_attempt() {
    // Accepts TCP but never answers the handshake
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let (manager, _events) = manager(config(
        format!("ws://{addr}/ws/game/{{session_id}}"),
        Duration::from_secs(30),
    ));
    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("s1").await })
    };

    timeout(WAIT, async {
        while manager.state() != ConnectionState::Connecting {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        manager.send(chat("too early")),
        Err(SendError::SendWhileDisconnected {
            state: ConnectionStatus::Connecting
        })
    );
    assert_eq!(
        manager.connect("s2").await,
        Err(ConnectionError::ConnectInProgress)
    );

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let result = connecting.await.unwrap();
    assert_eq!(result, Err(ConnectionError::Cancelled));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}
