//! Consumer side of the streaming channel.
//!
//! The client keeps the set of panes it wants. Every time a connection comes
//! up it sends that whole set in one `subscribe` message before reading any
//! frames. Lost connections are retried with a doubling delay; after
//! `max_attempts` consecutive failures a `Fatal` event is emitted and the
//! client stops.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use harbor_proto::{ControlMessage, decode_frame};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use worker_supervisor::Backoff;

use super::StreamError;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Connected,
    Frame { pane_id: String, payload: Vec<u8> },
    Disconnected,
    /// Reconnecting was abandoned; no further events follow.
    Fatal { attempts: u32, reason: String },
}

enum ClientCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Handle to a running client task. Dropping it cancels the task.
pub struct StreamClient {
    commands: mpsc::UnboundedSender<ClientCommand>,
    cancel: CancellationToken,
}

impl StreamClient {
    pub fn spawn(path: impl Into<PathBuf>, policy: ReconnectPolicy) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = ClientWorker {
            path: path.into(),
            policy,
            wanted: BTreeSet::new(),
            commands: command_rx,
            events,
        };
        tokio::spawn(worker.run(cancel.clone()));
        (Self { commands, cancel }, event_rx)
    }

    pub fn subscribe<I, S>(&self, pane_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _ = self
            .commands
            .send(ClientCommand::Subscribe(pane_ids.into_iter().map(Into::into).collect()));
    }

    pub fn unsubscribe<I, S>(&self, pane_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _ = self
            .commands
            .send(ClientCommand::Unsubscribe(pane_ids.into_iter().map(Into::into).collect()));
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type Socket = WebSocketStream<UnixStream>;

/// How a live connection ended.
enum SessionEnd {
    Lost,
    Stopped,
}

struct ClientWorker {
    path: PathBuf,
    policy: ReconnectPolicy,
    wanted: BTreeSet<String>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl ClientWorker {
    async fn run(mut self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.policy.initial_backoff, self.policy.max_backoff);
        let mut failures: u32 = 0;

        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return,
                attempt = connect(&self.path) => attempt,
            };
            match attempt {
                Ok(socket) => {
                    failures = 0;
                    backoff.reset();
                    info!(target = "subscription::client", socket_path = %self.path.display(), "stream connected");
                    let _ = self.events.send(StreamEvent::Connected);
                    match self.drive(socket, &cancel).await {
                        SessionEnd::Stopped => return,
                        SessionEnd::Lost => {
                            let _ = self.events.send(StreamEvent::Disconnected);
                        }
                    }
                }
                Err(err) => {
                    failures += 1;
                    warn!(
                        target = "subscription::client",
                        attempt = failures,
                        error = %err,
                        "stream connect failed"
                    );
                    if failures >= self.policy.max_attempts {
                        let _ = self.events.send(StreamEvent::Fatal {
                            attempts: failures,
                            reason: err.to_string(),
                        });
                        return;
                    }
                }
            }

            let delay = backoff.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Runs one live connection until it drops or the client stops.
    async fn drive(&mut self, socket: Socket, cancel: &CancellationToken) -> SessionEnd {
        let (mut sink, mut source) = socket.split();
        while let Ok(command) = self.commands.try_recv() {
            self.record(command);
        }
        if !self.wanted.is_empty() {
            let resubscribe = ControlMessage::subscribe(self.wanted.iter().cloned());
            if send_control(&mut sink, &resubscribe).await.is_err() {
                return SessionEnd::Lost;
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Stopped;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Stopped;
                    };
                    let Some(message) = self.record(command) else {
                        continue;
                    };
                    if send_control(&mut sink, &message).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                message = source.next() => match message {
                    Some(Ok(Message::Binary(bytes))) => match decode_frame(&bytes) {
                        Ok(frame) => {
                            let _ = self.events.send(StreamEvent::Frame {
                                pane_id: frame.pane_id.to_string(),
                                payload: frame.payload.to_vec(),
                            });
                        }
                        Err(err) => debug!(target = "subscription::client", error = %err, "dropping malformed frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(target = "subscription::client", error = %err, "stream read failed");
                        return SessionEnd::Lost;
                    }
                },
            }
        }
    }

    /// Updates the wanted set and returns the message for the server, if
    /// anything changed.
    fn record(&mut self, command: ClientCommand) -> Option<ControlMessage> {
        match command {
            ClientCommand::Subscribe(ids) => {
                let added: Vec<String> = ids.into_iter().filter(|id| self.wanted.insert(id.clone())).collect();
                (!added.is_empty()).then(|| ControlMessage::subscribe(added))
            }
            ClientCommand::Unsubscribe(ids) => {
                let removed: Vec<String> = ids.into_iter().filter(|id| self.wanted.remove(id)).collect();
                (!removed.is_empty()).then(|| ControlMessage::unsubscribe(removed))
            }
        }
    }
}

async fn connect(path: &Path) -> Result<Socket, StreamError> {
    let stream = UnixStream::connect(path).await?;
    let (socket, _) = tokio_tungstenite::client_async("ws://localhost/stream", stream).await?;
    Ok(socket)
}

async fn send_control<S>(sink: &mut S, message: &ControlMessage) -> Result<(), StreamError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    sink.send(Message::Text(message.to_json()?)).await?;
    Ok(())
}
