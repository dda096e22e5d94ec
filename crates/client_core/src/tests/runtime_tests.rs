use super::*;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shared::domain::{MessageOrigin, SessionStatus};
use tokio::{net::TcpListener, sync::mpsc::error::TryRecvError, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

enum PeerFrame {
    Text(String),
    Close,
}

/// Server side of one client connection, as seen by a test.
struct MockPeer {
    from_client: mpsc::UnboundedReceiver<Value>,
    to_client: mpsc::UnboundedSender<PeerFrame>,
}

impl MockPeer {
    async fn next_frame(&mut self) -> Option<Value> {
        timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
    }

    fn push(&self, frame: Value) {
        self.to_client
            .send(PeerFrame::Text(frame.to_string()))
            .expect("peer task alive");
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(peers): State<mpsc::UnboundedSender<MockPeer>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_peer(socket, peers))
}

async fn serve_peer(socket: WebSocket, peers: mpsc::UnboundedSender<MockPeer>) {
    let (mut sink, mut stream) = socket.split();
    let (from_client_tx, from_client) = mpsc::unbounded_channel();
    let (to_client, mut to_client_rx) = mpsc::unbounded_channel();
    if peers
        .send(MockPeer {
            from_client,
            to_client,
        })
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            frame = to_client_rx.recv() => match frame {
                Some(PeerFrame::Text(text)) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(PeerFrame::Close) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            message = stream.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        let _ = from_client_tx.send(value);
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn spawn_pairing_server() -> Result<(String, mpsc::UnboundedReceiver<MockPeer>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (peers_tx, peers_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(peers_tx);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("ws://{addr}/ws"), peers_rx))
}

async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MockPeer>) -> MockPeer {
    timeout(WAIT, peers.recv())
        .await
        .expect("timed out waiting for client connection")
        .expect("server alive")
}

async fn wait_for<F>(handle: &SessionHandle, predicate: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let snapshot = handle.snapshot().await.expect("runtime alive");
        if predicate(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached, last snapshot: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn spawn_runtime(server_url: &str, identity: Option<LocalIdentity>) -> SessionHandle {
    let (handle, _task) =
        SessionRuntime::spawn(RuntimeConfig::new(server_url), identity).expect("spawn runtime");
    handle
}

async fn pair(
    handle: &SessionHandle,
    peers: &mut mpsc::UnboundedReceiver<MockPeer>,
    partner_id: &str,
) -> MockPeer {
    handle.start_search().await.expect("start search");
    let mut peer = next_peer(peers).await;
    let frame = peer.next_frame().await.expect("find_partner frame");
    assert_eq!(frame["type"], "find_partner");
    peer.push(json!({"type": "partner_found", "partnerId": partner_id, "roomId": "room-1"}));
    wait_for(handle, |s| s.status == SessionStatus::Paired).await;
    peer
}

#[tokio::test]
async fn pairs_and_exchanges_messages_over_websocket() {
    let (server_url, mut peers) = spawn_pairing_server().await.expect("spawn server");
    let handle = spawn_runtime(&server_url, Some(LocalIdentity::telegram("777")));

    handle.start_search().await.expect("start search");
    let mut peer = next_peer(&mut peers).await;
    assert_eq!(
        peer.next_frame().await.expect("find_partner"),
        json!({"type": "find_partner", "telegramId": "777"})
    );

    peer.push(json!({"type": "partner_found", "partnerId": "42", "roomId": "room-1"}));
    let snapshot = wait_for(&handle, |s| s.status == SessionStatus::Paired).await;
    assert_eq!(snapshot.partner_id.as_deref(), Some("42"));
    assert_eq!(snapshot.room_id.as_deref(), Some("room-1"));
    assert_eq!(snapshot.transcript.len(), 1);
    assert_eq!(snapshot.transcript[0].origin, MessageOrigin::System);

    handle.send_message("hi").await.expect("send");
    assert_eq!(
        peer.next_frame().await.expect("message frame"),
        json!({"type": "message", "message": "hi", "telegramId": "777"})
    );

    peer.push(json!({"type": "message", "message": "hey"}));
    let snapshot = wait_for(&handle, |s| {
        s.transcript
            .iter()
            .any(|m| m.origin == MessageOrigin::Remote && m.text == "hey")
    })
    .await;
    let origins: Vec<_> = snapshot.transcript.iter().map(|m| m.origin).collect();
    assert_eq!(
        origins,
        vec![
            MessageOrigin::System,
            MessageOrigin::Own,
            MessageOrigin::Remote
        ]
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn partner_disconnect_reconnects_and_searches_again() {
    let (server_url, mut peers) = spawn_pairing_server().await.expect("spawn server");
    let handle = spawn_runtime(&server_url, Some(LocalIdentity::anonymous("dev_tester01")));
    let mut first = pair(&handle, &mut peers, "42").await;

    first.push(json!({"type": "partner_disconnected"}));
    let snapshot = wait_for(&handle, |s| s.status == SessionStatus::Searching).await;
    assert!(snapshot.transcript.is_empty());
    assert_eq!(snapshot.partner_id, None);

    let mut second = next_peer(&mut peers).await;
    assert_eq!(
        second.next_frame().await.expect("find_partner"),
        json!({"type": "find_partner", "userId": "dev_tester01"})
    );
    // The superseded socket is closed by the client.
    assert_eq!(first.next_frame().await, None);

    handle.shutdown().await;
}

#[tokio::test]
async fn next_partner_reconnects_only_after_old_socket_closes() {
    let (server_url, mut peers) = spawn_pairing_server().await.expect("spawn server");
    let handle = spawn_runtime(&server_url, Some(LocalIdentity::telegram("777")));
    let mut first = pair(&handle, &mut peers, "42").await;

    handle.next_partner().await.expect("next partner");
    assert_eq!(
        first.next_frame().await.expect("disconnect frame"),
        json!({"type": "disconnect"})
    );

    let mut second = next_peer(&mut peers).await;
    assert!(matches!(
        first.from_client.try_recv(),
        Err(TryRecvError::Disconnected)
    ));
    assert_eq!(
        second.next_frame().await.expect("find_partner"),
        json!({"type": "find_partner", "telegramId": "777"})
    );
    let snapshot = wait_for(&handle, |s| s.status == SessionStatus::Searching).await;
    assert!(snapshot.transcript.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn stop_search_notifies_server_and_closes() {
    let (server_url, mut peers) = spawn_pairing_server().await.expect("spawn server");
    let handle = spawn_runtime(&server_url, Some(LocalIdentity::telegram("777")));

    handle.start_search().await.expect("start search");
    let mut peer = next_peer(&mut peers).await;
    peer.next_frame().await.expect("find_partner");

    handle.stop_search().await.expect("stop");
    assert_eq!(
        peer.next_frame().await.expect("stop frame"),
        json!({"type": "stop_search"})
    );
    assert_eq!(peer.next_frame().await, None);
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.status, SessionStatus::Idle);

    handle.stop_search().await.expect("idle stop is a no-op");
    handle.shutdown().await;
}

#[tokio::test]
async fn missing_identity_never_opens_a_connection() {
    let (server_url, mut peers) = spawn_pairing_server().await.expect("spawn server");
    let handle = spawn_runtime(&server_url, None);

    handle.start_search().await.expect("precondition is recovered");
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.status, SessionStatus::Idle);
    assert_eq!(snapshot.transcript.len(), 1);
    assert_eq!(snapshot.transcript[0].origin, MessageOrigin::System);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(peers.try_recv(), Err(TryRecvError::Empty)));

    handle.shutdown().await;
}

#[tokio::test]
async fn search_timer_stops_once_paired() {
    let (server_url, mut peers) = spawn_pairing_server().await.expect("spawn server");
    let mut config = RuntimeConfig::new(&server_url);
    config.search_tick = Duration::from_millis(20);
    let (handle, _task) =
        SessionRuntime::spawn(config, Some(LocalIdentity::telegram("777"))).expect("spawn");

    handle.start_search().await.expect("start search");
    let mut peer = next_peer(&mut peers).await;
    peer.next_frame().await.expect("find_partner");
    wait_for(&handle, |s| s.elapsed_search_seconds >= 2).await;

    peer.push(json!({"type": "partner_found", "partnerId": "42"}));
    let paired = wait_for(&handle, |s| s.status == SessionStatus::Paired).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let later = handle.snapshot().await.expect("snapshot");
    assert_eq!(later.elapsed_search_seconds, paired.elapsed_search_seconds);

    handle.shutdown().await;
}

#[tokio::test]
async fn search_timeout_returns_to_idle_and_closes_socket() {
    let (server_url, mut peers) = spawn_pairing_server().await.expect("spawn server");
    let handle = spawn_runtime(&server_url, Some(LocalIdentity::telegram("777")));

    handle.start_search().await.expect("start search");
    let mut peer = next_peer(&mut peers).await;
    peer.next_frame().await.expect("find_partner");

    peer.push(json!({"type": "search_timeout", "message": "nobody around"}));
    let snapshot = wait_for(&handle, |s| s.status == SessionStatus::Idle).await;
    assert_eq!(
        snapshot.transcript.last().map(|m| m.text.as_str()),
        Some("nobody around")
    );
    assert_eq!(peer.next_frame().await, None);

    handle.shutdown().await;
}

#[tokio::test]
async fn server_closing_the_socket_forces_idle() {
    let (server_url, mut peers) = spawn_pairing_server().await.expect("spawn server");
    let handle = spawn_runtime(&server_url, Some(LocalIdentity::telegram("777")));
    let peer = pair(&handle, &mut peers, "42").await;

    peer.to_client.send(PeerFrame::Close).expect("peer alive");
    let snapshot = wait_for(&handle, |s| s.status == SessionStatus::Idle).await;
    assert_eq!(snapshot.partner_id, None);
    assert_eq!(
        snapshot.transcript.last().map(|m| m.text.as_str()),
        Some("Connection to the server was lost")
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn unreachable_server_reports_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let handle = spawn_runtime(
        &format!("http://{addr}/ws"),
        Some(LocalIdentity::telegram("777")),
    );
    handle.start_search().await.expect("start search");
    let snapshot = wait_for(&handle, |s| {
        s.status == SessionStatus::Idle && !s.transcript.is_empty()
    })
    .await;
    assert_eq!(
        snapshot.transcript.last().map(|m| m.text.as_str()),
        Some("Connection error")
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_ignored() {
    let (server_url, mut peers) = spawn_pairing_server().await.expect("spawn server");
    let handle = spawn_runtime(&server_url, Some(LocalIdentity::telegram("777")));
    let peer = pair(&handle, &mut peers, "42").await;

    peer.to_client
        .send(PeerFrame::Text("{not json".into()))
        .expect("peer alive");
    peer.push(json!({"type": "typing"}));
    peer.push(json!({"type": "message", "message": "still here"}));

    let snapshot = wait_for(&handle, |s| {
        s.transcript.iter().any(|m| m.text == "still here")
    })
    .await;
    assert_eq!(snapshot.status, SessionStatus::Paired);
    assert_eq!(snapshot.transcript.len(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn publishes_snapshots_to_subscribers() {
    let (server_url, _peers) = spawn_pairing_server().await.expect("spawn server");
    let handle = spawn_runtime(&server_url, Some(LocalIdentity::telegram("777")));
    let mut events = handle.subscribe_events();

    handle.start_search().await.expect("start search");
    let event = timeout(WAIT, events.recv())
        .await
        .expect("event in time")
        .expect("event");
    assert!(matches!(
        event,
        ClientEvent::Updated(snapshot) if snapshot.status == SessionStatus::Searching
    ));

    handle.shutdown().await;
}

#[tokio::test]
async fn commands_after_shutdown_report_stopped_runtime() {
    let (server_url, _peers) = spawn_pairing_server().await.expect("spawn server");
    let handle = spawn_runtime(&server_url, Some(LocalIdentity::telegram("777")));

    handle.shutdown().await;
    assert_eq!(
        handle.start_search().await,
        Err(SessionError::RuntimeStopped)
    );
}

#[test]
fn spawn_rejects_unsupported_server_urls() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let result = SessionRuntime::spawn(RuntimeConfig::new("ftp://chat.example.com"), None);
        assert!(result.is_err());
    });
}
