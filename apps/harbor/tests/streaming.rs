#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use harbor::subscription::{ReconnectPolicy, StreamClient, StreamEvent, StreamHub, StreamServer};
use harbor_proto::{ControlMessage, encode_frame};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

fn quick_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        max_attempts: 10,
    }
}

async fn next_event(events: &mut UnboundedReceiver<StreamEvent>) -> StreamEvent {
    events.recv().await.expect("client stopped emitting events")
}

async fn read_control<S>(socket: &mut WebSocketStream<S>) -> ControlMessage
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match socket.next().await {
        Some(Ok(Message::Text(text))) => ControlMessage::from_json(&text).unwrap(),
        other => panic!("expected a control message, got {other:?}"),
    }
}

fn frame(pane_id: &str, payload: &[u8]) -> Message {
    Message::Binary(encode_frame(pane_id, payload).unwrap().to_vec())
}

fn frame_event(pane_id: &str, payload: &[u8]) -> StreamEvent {
    StreamEvent::Frame {
        pane_id: pane_id.to_string(),
        payload: payload.to_vec(),
    }
}

#[test_timeout::tokio_timeout_test(10)]
async fn reconnect_resubscribes_once_with_full_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harbor-test.stream.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let (client, mut events) = StreamClient::spawn(&path, quick_policy());
    client.subscribe(["p1"]);

    let (stream, _) = listener.accept().await.unwrap();
    let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
    assert_eq!(read_control(&mut socket).await, ControlMessage::subscribe(["p1"]));
    for chunk in [&b"one"[..], b"two", b"three"] {
        socket.send(frame("p1", chunk)).await.unwrap();
    }
    drop(socket);

    assert_eq!(next_event(&mut events).await, StreamEvent::Connected);
    assert_eq!(next_event(&mut events).await, frame_event("p1", b"one"));
    assert_eq!(next_event(&mut events).await, frame_event("p1", b"two"));
    assert_eq!(next_event(&mut events).await, frame_event("p1", b"three"));
    assert_eq!(next_event(&mut events).await, StreamEvent::Disconnected);

    let (stream, _) = listener.accept().await.unwrap();
    let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
    assert_eq!(read_control(&mut socket).await, ControlMessage::subscribe(["p1"]));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), socket.next()).await.is_err(),
        "client sent more than one control message after reconnecting"
    );
    socket.send(frame("p1", b"again")).await.unwrap();

    assert_eq!(next_event(&mut events).await, StreamEvent::Connected);
    assert_eq!(next_event(&mut events).await, frame_event("p1", b"again"));
    client.close();
}

#[test_timeout::tokio_timeout_test(10)]
async fn gives_up_after_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let policy = ReconnectPolicy {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        max_attempts: 3,
    };
    let (_client, mut events) = StreamClient::spawn(dir.path().join("missing.sock"), policy);

    match next_event(&mut events).await {
        StreamEvent::Fatal { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected fatal event, got {other:?}"),
    }
    assert!(events.recv().await.is_none());
}

#[test_timeout::tokio_timeout_test(10)]
async fn server_delivers_only_subscribed_panes() {
    let dir = tempfile::tempdir().unwrap();
    let hub = Arc::new(StreamHub::new(16));
    let server = Arc::new(StreamServer::bind(&dir.path().join("harbor-hub.stream.sock"), hub.clone()).unwrap());
    let accept = server.clone();
    tokio::spawn(async move { accept.accept_loop().await });

    let mut subscriptions = hub.watch_subscriptions();
    let (client, mut events) = StreamClient::spawn(server.path(), quick_policy());
    client.subscribe(["%1"]);
    assert_eq!(next_event(&mut events).await, StreamEvent::Connected);
    while !subscriptions.borrow_and_update().contains("%1") {
        subscriptions.changed().await.unwrap();
    }

    assert_eq!(hub.publish("%2", b"elsewhere"), 0);
    assert_eq!(hub.publish("%1", b"hello"), 1);
    assert_eq!(next_event(&mut events).await, frame_event("%1", b"hello"));

    client.unsubscribe(["%1"]);
    while subscriptions.borrow_and_update().contains("%1") {
        subscriptions.changed().await.unwrap();
    }
    assert_eq!(hub.publish("%1", b"late"), 0);

    hub.kick_all();
    assert_eq!(next_event(&mut events).await, StreamEvent::Disconnected);
    client.close();
}

#[test_timeout::tokio_timeout_test(10)]
async fn client_drops_malformed_frames_and_stays_connected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harbor-junk.stream.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let (client, mut events) = StreamClient::spawn(&path, quick_policy());
    client.subscribe(["%1"]);
    let (stream, _) = listener.accept().await.unwrap();
    let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
    assert_eq!(read_control(&mut socket).await, ControlMessage::subscribe(["%1"]));

    // Zero-length pane id, then a length prefix running past the payload.
    socket.send(Message::Binary(vec![0, b'x'])).await.unwrap();
    socket.send(Message::Binary(vec![9, b'%', b'1'])).await.unwrap();
    socket.send(Message::Binary(Vec::new())).await.unwrap();
    socket.send(frame("%1", b"valid")).await.unwrap();

    assert_eq!(next_event(&mut events).await, StreamEvent::Connected);
    assert_eq!(next_event(&mut events).await, frame_event("%1", b"valid"));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await.is_err(),
        "malformed frames produced an event"
    );

    socket.send(frame("%1", b"after")).await.unwrap();
    assert_eq!(next_event(&mut events).await, frame_event("%1", b"after"));
    client.close();
}

#[test_timeout::tokio_timeout_test(10)]
async fn server_ignores_malformed_control_messages() {
    let dir = tempfile::tempdir().unwrap();
    let hub = Arc::new(StreamHub::new(16));
    let server = Arc::new(StreamServer::bind(&dir.path().join("harbor-ctl.stream.sock"), hub.clone()).unwrap());
    let accept = server.clone();
    tokio::spawn(async move { accept.accept_loop().await });

    let stream = UnixStream::connect(server.path()).await.unwrap();
    let (mut socket, _) = tokio_tungstenite::client_async("ws://localhost/stream", stream)
        .await
        .unwrap();
    socket.send(Message::Text("not json".to_string())).await.unwrap();
    socket
        .send(Message::Text(r#"{"action":"explode","paneIds":["%1"]}"#.to_string()))
        .await
        .unwrap();
    socket.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    let subscribe = ControlMessage::subscribe(["%1"]).to_json().unwrap();
    socket.send(Message::Text(subscribe)).await.unwrap();

    let mut subscriptions = hub.watch_subscriptions();
    while !subscriptions.borrow_and_update().contains("%1") {
        subscriptions.changed().await.unwrap();
    }
    assert_eq!(hub.publish("%1", b"still open"), 1);
    match socket.next().await {
        Some(Ok(message)) => assert_eq!(message, frame("%1", b"still open")),
        other => panic!("expected a frame, got {other:?}"),
    }
}
