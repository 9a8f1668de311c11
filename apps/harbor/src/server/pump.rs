//! Moves process output from a blocking PTY reader into the pane store and
//! out to streaming consumers.
//!
//! One OS thread per pane does the blocking reads and forwards chunks over an
//! unbounded channel. A single async task drains that channel, so chunks for
//! a pane are fed and published in the order they were read.

use std::io::Read;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use worker_supervisor::{Supervisor, SupervisorExit};

use crate::server::pane_store::PaneStateStore;
use crate::subscription::StreamHub;

const READ_CHUNK: usize = 8192;

pub fn spawn_pump<R>(
    pane_id: String,
    reader: R,
    panes: Arc<PaneStateStore>,
    hub: Arc<StreamHub>,
    cancel: CancellationToken,
) -> std::io::Result<JoinHandle<SupervisorExit>>
where
    R: Read + Send + 'static,
{
    let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name(format!("pty-reader-{pane_id}"))
        .spawn({
            let pane_id = pane_id.clone();
            move || read_until_eof(&pane_id, reader, chunks_tx)
        })?;

    let chunks = Arc::new(Mutex::new(chunks_rx));
    let handle = Supervisor::new(format!("output-pump-{pane_id}"))
        .with_cancellation(cancel)
        .spawn(move || {
            let chunks = chunks.clone();
            let pane_id = pane_id.clone();
            let panes = panes.clone();
            let hub = hub.clone();
            async move {
                let mut chunks = chunks.lock().await;
                while let Some(chunk) = chunks.recv().await {
                    panes.feed(&pane_id, &chunk);
                    let consumers = hub.publish(&pane_id, &chunk);
                    trace!(target = "server::pump", pane_id = %pane_id, len = chunk.len(), consumers, "pane output");
                }
                debug!(target = "server::pump", pane_id = %pane_id, "pane process exited");
                Ok(())
            }
        });
    Ok(handle)
}

fn read_until_eof<R: Read>(pane_id: &str, mut reader: R, chunks: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if chunks.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                // A PTY master reports EIO once the child side is gone.
                trace!(target = "server::pump", pane_id, error = %err, "pty read ended");
                break;
            }
        }
    }
}
