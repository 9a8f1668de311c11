pub mod channel;
pub mod ipc;

pub use channel::{ChannelPaths, derive_channel_name};
pub use ipc::{IpcServer, TransportError, send_request};
