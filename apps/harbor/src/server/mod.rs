pub mod pane_store;
pub mod processes;
pub mod pty;
pub mod pump;
#[cfg(unix)]
mod runtime;
pub mod terminal_state;

#[cfg(unix)]
pub use runtime::{Server, ServerOptions};
