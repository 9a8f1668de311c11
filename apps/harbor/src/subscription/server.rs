//! Streaming listener: WebSocket over a Unix socket. Binary messages carry
//! pane frames to the consumer, text messages carry control messages back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use harbor_proto::ControlMessage;
use tokio::net::{UnixListener, UnixStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use super::StreamError;
use super::hub::StreamHub;

pub struct StreamServer {
    listener: UnixListener,
    path: PathBuf,
    hub: Arc<StreamHub>,
}

impl StreamServer {
    pub fn bind(path: &Path, hub: Arc<StreamHub>) -> Result<Self, StreamError> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        debug!(target = "subscription::server", socket_path = %path.display(), "stream listener started");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            hub,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn accept_loop(&self) -> anyhow::Result<()> {
        loop {
            let (stream, _) = self.listener.accept().await?;
            let hub = self.hub.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_consumer(stream, hub).await {
                    warn!(target = "subscription::server", error = %err, "stream connection error");
                }
            });
        }
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn serve_consumer(stream: UnixStream, hub: Arc<StreamHub>) -> Result<(), StreamError> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    let (id, mut frames) = hub.register();
    let (mut sink, mut source) = socket.split();

    let result = loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = sink.send(Message::Binary(frame.to_vec())).await {
                        break Err(err.into());
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break Ok(());
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => match ControlMessage::from_json(&text) {
                    Ok(control) => hub.apply(id, &control),
                    Err(err) => debug!(target = "subscription::server", connection = id, error = %err, "dropping malformed control message"),
                },
                Some(Ok(Message::Binary(bytes))) => {
                    trace!(target = "subscription::server", connection = id, len = bytes.len(), "ignoring binary message from consumer");
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(err)) => break Err(err.into()),
            },
        }
    };

    hub.unregister(id);
    result
}
