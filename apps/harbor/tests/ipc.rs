#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use harbor::command::{CommandRouter, RouterDefaults};
use harbor::server::pane_store::{PaneStateStore, PaneStoreConfig};
use harbor::session::SessionStore;
use harbor::transport::{IpcServer, send_request};
use harbor_proto::{Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const TIMEOUT: Duration = Duration::from_secs(2);

fn router() -> Arc<CommandRouter> {
    let panes = Arc::new(PaneStateStore::new(PaneStoreConfig::default()));
    let sessions = Arc::new(SessionStore::new(panes));
    Arc::new(CommandRouter::new(sessions, RouterDefaults::default()))
}

fn start(dir: &tempfile::TempDir) -> Arc<IpcServer> {
    let server = Arc::new(IpcServer::bind(&dir.path().join("harbor-test.sock"), router(), TIMEOUT).unwrap());
    let accept = server.clone();
    tokio::spawn(async move { accept.accept_loop().await });
    server
}

#[test_timeout::tokio_timeout_test(10)]
async fn commands_round_trip_over_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(&dir);

    let created = send_request(
        server.path(),
        &Request::new("new-session").flag("s", "work").flag("P", true),
        TIMEOUT,
    )
    .await
    .unwrap();
    assert_eq!(created, Response::success("work:\n"));

    let listed = send_request(server.path(), &Request::new("list-sessions"), TIMEOUT)
        .await
        .unwrap();
    assert!(listed.is_success());
    assert!(listed.stdout.starts_with("work: 1 windows"), "{listed:?}");

    let missing = send_request(server.path(), &Request::new("has-session").flag("t", "nope"), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(missing.exit_code, 1);
    assert_eq!(missing.stderr, "can't find session: nope");
}

#[test_timeout::tokio_timeout_test(10)]
async fn undecodable_request_gets_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(&dir);

    let mut stream = UnixStream::connect(server.path()).await.unwrap();
    stream.write_all(b"this is not json\n").await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();

    let response = Response::decode_line(raw.trim_ascii_end()).unwrap();
    assert_eq!(response.exit_code, 1);
    assert!(response.stderr.starts_with("protocol error"), "{response:?}");
}

#[test_timeout::tokio_timeout_test(10)]
async fn stale_socket_is_replaced_and_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harbor-stale.sock");
    std::fs::write(&path, b"left over").unwrap();

    let server = IpcServer::bind(&path, router(), TIMEOUT).unwrap();
    assert!(path.exists());
    drop(server);
    assert!(!path.exists());
}
