use std::collections::HashMap;
use std::path::Path;

use crate::session::{PaneId, PaneRef};

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to start process for pane {pane}: {reason}")]
    Start { pane: PaneId, reason: String },
    #[error("pane {0} was killed before its process started")]
    PaneGone(PaneId),
    #[error("no process running in pane {0}")]
    NoProcess(PaneId),
    #[error("write to pane {pane} failed: {reason}")]
    Write { pane: PaneId, reason: String },
}

/// What to run in a freshly created pane.
#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest<'a> {
    pub pane: PaneRef,
    /// Shell command line; `None` starts the default shell.
    pub command: Option<&'a str>,
    pub cwd: Option<&'a Path>,
    pub env: &'a HashMap<String, String>,
}

/// Starts and feeds pane processes. Teardown and resizing follow the session
/// store's pane effects instead of going through this trait.
pub trait PaneSpawner: Send + Sync {
    fn spawn(&self, request: SpawnRequest<'_>) -> Result<(), SpawnError>;

    fn send(&self, pane: PaneId, bytes: &[u8]) -> Result<(), SpawnError>;
}
