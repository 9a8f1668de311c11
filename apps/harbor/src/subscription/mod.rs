//! Pane output streaming: the hub that fans frames out, the listener that
//! serves consumers and the reconnecting consumer client.

#[cfg(unix)]
pub mod client;
pub mod hub;
#[cfg(unix)]
pub mod server;

use harbor_proto::WireError;

#[cfg(unix)]
pub use client::{ReconnectPolicy, StreamClient, StreamEvent};
pub use hub::{ConnectionId, StreamHub};
#[cfg(unix)]
pub use server::StreamServer;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("protocol error: {0}")]
    Wire(#[from] WireError),
}
