//! Request/response transport: one JSON line in, one JSON line out, then the
//! connection closes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use harbor_proto::{Request, Response, WireError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::command::CommandRouter;

pub const MAX_REQUEST_BYTES: usize = 1 << 20;
pub const MAX_RESPONSE_BYTES: usize = 16 << 20;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Decode(#[from] WireError),
    #[error("message exceeds {0} bytes")]
    RequestTooLarge(usize),
    #[error("connection closed before a complete message")]
    Closed,
    #[error("unix domain sockets are not supported on this platform")]
    Unsupported,
}

/// Reads one `\n`-terminated line of at most `limit` bytes, newline excluded.
async fn read_bounded_line<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = reader.take(limit as u64 + 1).read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Err(TransportError::Closed);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() > limit {
        return Err(TransportError::RequestTooLarge(limit));
    }
    Ok(line)
}

#[cfg(unix)]
pub use self::unix::{IpcServer, send_request};

#[cfg(unix)]
mod unix {
    use super::*;

    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::net::{UnixListener, UnixStream};
    use tokio::time::timeout;
    use tracing::{debug, trace, warn};

    /// Listening half. Owns the socket file and removes it when dropped.
    pub struct IpcServer {
        listener: UnixListener,
        path: PathBuf,
        router: Arc<CommandRouter>,
        io_timeout: Duration,
    }

    impl IpcServer {
        /// Binds `path`, replacing a stale socket left by an earlier run.
        pub fn bind(path: &Path, router: Arc<CommandRouter>, io_timeout: Duration) -> Result<Self, TransportError> {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            let listener = UnixListener::bind(path)?;
            debug!(target = "transport::ipc", socket_path = %path.display(), "request listener started");
            Ok(Self {
                listener,
                path: path.to_path_buf(),
                router,
                io_timeout,
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Accepts until the listener fails. Each connection gets its own task.
        pub async fn accept_loop(&self) -> anyhow::Result<()> {
            loop {
                let (stream, _) = self.listener.accept().await?;
                let router = self.router.clone();
                let io_timeout = self.io_timeout;
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, router, io_timeout).await {
                        warn!(target = "transport::ipc", error = %err, "request connection error");
                    }
                });
            }
        }
    }

    impl Drop for IpcServer {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    async fn serve_connection(
        stream: UnixStream,
        router: Arc<CommandRouter>,
        io_timeout: Duration,
    ) -> Result<(), TransportError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let line = timeout(io_timeout, read_bounded_line(&mut reader, MAX_REQUEST_BYTES))
            .await
            .map_err(|_| TransportError::Timeout(io_timeout))?;

        let response = match line.and_then(|line| Ok(Request::decode_line(&line)?)) {
            Ok(request) => {
                trace!(target = "transport::ipc", command = %request.command, caller = %request.caller_pane, "request received");
                tokio::task::spawn_blocking(move || router.execute(&request))
                    .await
                    .unwrap_or_else(|err| Response::failure(1, format!("internal error: {err}")))
            }
            Err(err @ (TransportError::Decode(_) | TransportError::RequestTooLarge(_))) => {
                debug!(target = "transport::ipc", error = %err, "rejecting malformed request");
                Response::failure(1, format!("protocol error: {err}"))
            }
            Err(err) => return Err(err),
        };

        let bytes = response.encode_line()?;
        timeout(io_timeout, async {
            writer.write_all(&bytes).await?;
            writer.shutdown().await
        })
        .await
        .map_err(|_| TransportError::Timeout(io_timeout))??;
        Ok(())
    }

    /// Client half: sends one request and waits for its response.
    pub async fn send_request(path: &Path, request: &Request, io_timeout: Duration) -> Result<Response, TransportError> {
        let exchange = async {
            let mut stream = UnixStream::connect(path).await?;
            stream.write_all(&request.encode_line()?).await?;
            let mut reader = BufReader::new(stream);
            let line = read_bounded_line(&mut reader, MAX_RESPONSE_BYTES).await?;
            Ok::<_, TransportError>(Response::decode_line(&line)?)
        };
        timeout(io_timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(io_timeout))?
    }
}

#[cfg(not(unix))]
pub struct IpcServer;

#[cfg(not(unix))]
impl IpcServer {
    pub fn bind(_path: &Path, _router: Arc<CommandRouter>, _io_timeout: Duration) -> Result<Self, TransportError> {
        Err(TransportError::Unsupported)
    }

    pub fn path(&self) -> &Path {
        Path::new("")
    }

    pub async fn accept_loop(&self) -> anyhow::Result<()> {
        Err(TransportError::Unsupported.into())
    }
}

#[cfg(not(unix))]
pub async fn send_request(_path: &Path, _request: &Request, _io_timeout: Duration) -> Result<Response, TransportError> {
    Err(TransportError::Unsupported)
}
