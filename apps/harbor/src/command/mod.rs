//! Command router: maps a decoded [`Request`] onto session and pane store
//! operations and renders a [`Response`].
//!
//! Handlers never publish anything themselves. A handler that changed the
//! tree returns its [`SessionDelta`] in the [`Outcome`], and the router sends
//! it on the delta channel once the handler has returned `Ok`.

pub mod format;
pub mod keys;
mod panes;
mod sessions;
pub mod spawn;
pub mod table;
mod windows;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use harbor_proto::{FlagTypeError, Request, Response};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::server::pane_store::PaneStateStore;
use crate::session::{PaneContext, SessionDelta, SessionStore, StoreError};

pub use format::FormatVars;
pub use spawn::{PaneSpawner, SpawnError, SpawnRequest};
pub use table::{COMMANDS, CommandSpec, lookup, parse_argv};

const DELTA_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(String),
    #[error(transparent)]
    FlagType(#[from] FlagTypeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Result of a successful handler.
#[derive(Debug, Default)]
pub struct Outcome {
    pub stdout: String,
    pub delta: Option<SessionDelta>,
}

impl Outcome {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn output(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            delta: None,
        }
    }

    pub fn lines(lines: impl IntoIterator<Item = String>) -> Self {
        let mut stdout = String::new();
        for line in lines {
            stdout.push_str(&line);
            stdout.push('\n');
        }
        Self::output(stdout)
    }

    pub fn with_delta(mut self, delta: SessionDelta) -> Self {
        self.delta = Some(delta);
        self
    }
}

/// Sizes and names used when a request does not give them.
#[derive(Debug, Clone)]
pub struct RouterDefaults {
    pub cols: u16,
    pub rows: u16,
}

impl Default for RouterDefaults {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Borrowed view of the router handed to each handler.
pub struct CommandContext<'a> {
    pub sessions: &'a SessionStore,
    pub panes: &'a PaneStateStore,
    pub spawner: Option<&'a dyn PaneSpawner>,
    pub defaults: &'a RouterDefaults,
}

impl CommandContext<'_> {
    /// Starts the pane's process when the router owns a spawner.
    pub fn launch(
        &self,
        pane: &PaneContext,
        command: Option<&str>,
        cwd: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<(), SpawnError> {
        let Some(spawner) = self.spawner else {
            return Ok(());
        };
        spawner.spawn(SpawnRequest {
            pane: pane.pane_ref(),
            command,
            cwd,
            env,
        })
    }

    pub fn render(&self, template: &str, pane: &PaneContext) -> String {
        let cursor = self.panes.cursor(&pane.pane_id.to_string());
        format::expand(template, &FormatVars::new(pane).with_cursor(cursor))
    }
}

pub struct CommandRouter {
    sessions: Arc<SessionStore>,
    spawner: Option<Arc<dyn PaneSpawner>>,
    deltas: broadcast::Sender<SessionDelta>,
    defaults: RouterDefaults,
}

impl CommandRouter {
    pub fn new(sessions: Arc<SessionStore>, defaults: RouterDefaults) -> Self {
        let (deltas, _) = broadcast::channel(DELTA_CAPACITY);
        Self {
            sessions,
            spawner: None,
            deltas,
            defaults,
        }
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn PaneSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn subscribe_deltas(&self) -> broadcast::Receiver<SessionDelta> {
        self.deltas.subscribe()
    }

    pub fn execute(&self, request: &Request) -> Response {
        match self.dispatch(request) {
            Ok(outcome) => {
                if let Some(delta) = outcome.delta {
                    trace!(target = "command::router", command = %request.command, ?delta, "publishing delta");
                    // No receivers is fine; nobody is watching the tree yet.
                    let _ = self.deltas.send(delta);
                }
                Response::success(outcome.stdout)
            }
            Err(err) => {
                debug!(
                    target = "command::router",
                    command = %request.command,
                    caller = %request.caller_pane,
                    error = %err,
                    "command failed"
                );
                Response::failure(1, err.to_string())
            }
        }
    }

    fn dispatch(&self, request: &Request) -> Result<Outcome, CommandError> {
        let spec = lookup(&request.command).ok_or_else(|| CommandError::UnknownCommand(request.command.clone()))?;
        let context = CommandContext {
            sessions: &self.sessions,
            panes: self.sessions.panes(),
            spawner: self.spawner.as_deref(),
            defaults: &self.defaults,
        };
        (spec.handler)(&context, request)
    }
}

/// `-t` value, empty when absent.
fn target(request: &Request) -> Result<&str, CommandError> {
    Ok(request.flags.str("t")?.unwrap_or(""))
}

/// Positional arguments joined into one shell command line.
fn command_line(args: &[String]) -> Option<String> {
    (!args.is_empty()).then(|| args.join(" "))
}

fn dimension(flag: &str, value: Option<i64>) -> Result<Option<u16>, CommandError> {
    value
        .map(|value| {
            u16::try_from(value)
                .ok()
                .filter(|value| *value > 0)
                .ok_or_else(|| CommandError::Usage(format!("-{flag} must be between 1 and {}", u16::MAX)))
        })
        .transpose()
}
