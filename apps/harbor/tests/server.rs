#![cfg(unix)]

use std::time::Duration;

use harbor::config::Config;
use harbor::server::{Server, ServerOptions};
use harbor::subscription::{ReconnectPolicy, StreamClient, StreamEvent};
use harbor::transport::send_request;
use harbor_proto::{Request, Response};

const TIMEOUT: Duration = Duration::from_secs(5);

fn config(dir: &tempfile::TempDir) -> Config {
    Config {
        runtime_dir: dir.path().to_path_buf(),
        channel_override: Some("harbor-e2e".to_string()),
        shell: "/bin/sh".to_string(),
        ..Config::default()
    }
}

#[test_timeout::tokio_timeout_test(30)]
async fn shell_output_reaches_stream_and_capture() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::bind(&config(&dir)).await.unwrap();
    let paths = server.paths().clone();
    let stop = server.cancellation_token();
    let running = tokio::spawn(server.run(ServerOptions { initial_session: false }));

    let request = |request: Request| {
        let path = paths.request.clone();
        async move { send_request(&path, &request, TIMEOUT).await.unwrap() }
    };

    let created = request(Request::new("new-session").flag("s", "work").flag("P", true).flag("F", "#{pane_id}")).await;
    assert_eq!(created, Response::success("%0\n"));

    let (client, mut events) = StreamClient::spawn(&paths.stream, ReconnectPolicy::default());
    client.subscribe(["%0"]);
    assert_eq!(events.recv().await, Some(StreamEvent::Connected));

    // Retry the command until the subscription is in place and output flows.
    let mut seen = String::new();
    'outer: for _ in 0..20 {
        let sent = request(Request::new("send-keys").flag("t", "work").arg("echo harbor-$((6*7))").arg("Enter")).await;
        assert!(sent.is_success(), "{sent:?}");
        let deadline = tokio::time::sleep(Duration::from_millis(500));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.recv() => {
                    if let Some(StreamEvent::Frame { payload, .. }) = event {
                        seen.push_str(&String::from_utf8_lossy(&payload));
                        if seen.contains("harbor-42") {
                            break 'outer;
                        }
                    }
                }
            }
        }
    }
    assert!(seen.contains("harbor-42"), "stream output: {seen:?}");

    let captured = request(Request::new("capture-pane").flag("t", "%0").flag("p", true)).await;
    assert!(captured.stdout.contains("harbor-42"), "{captured:?}");

    let killed = request(Request::new("kill-session").flag("t", "work")).await;
    assert!(killed.is_success());
    let listed = request(Request::new("list-sessions")).await;
    assert_eq!(listed, Response::success(""));

    client.close();
    stop.cancel();
    running.await.unwrap().unwrap();
    assert!(!paths.request.exists());
    assert!(!paths.stream.exists());
}
