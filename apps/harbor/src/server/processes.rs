//! Processes running inside panes.
//!
//! The table starts a PTY process for every pane the router creates and
//! follows the session store's pane effects afterwards: a resized pane
//! resizes its PTY, a removed pane has its process killed.
//!
//! A pane can be killed after the router created it but before its process
//! is registered. The removal is remembered in that case and the late spawn
//! is refused.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use portable_pty::CommandBuilder;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::spawn::{PaneSpawner, SpawnError, SpawnRequest};
use crate::server::pane_store::PaneStateStore;
use crate::server::pty::PtyProcess;
use crate::server::pump::spawn_pump;
use crate::session::{PaneEffect, PaneEffectSink, PaneId};
use crate::subscription::StreamHub;

pub const PANE_ENV: &str = "HARBOR_PANE";
pub const CHANNEL_ENV: &str = "HARBOR_CHANNEL";

pub struct ProcessTable {
    processes: RwLock<HashMap<PaneId, Arc<PtyProcess>>>,
    // Panes removed while no process was registered. Guarded by `processes`.
    orphaned: Mutex<HashSet<PaneId>>,
    panes: Arc<PaneStateStore>,
    hub: Arc<StreamHub>,
    shell: String,
    channel: String,
    runtime: Handle,
    cancel: CancellationToken,
}

impl ProcessTable {
    pub fn new(
        panes: Arc<PaneStateStore>,
        hub: Arc<StreamHub>,
        shell: impl Into<String>,
        channel: impl Into<String>,
        runtime: Handle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            orphaned: Mutex::new(HashSet::new()),
            panes,
            hub,
            shell: shell.into(),
            channel: channel.into(),
            runtime,
            cancel,
        }
    }

    pub fn contains(&self, pane: PaneId) -> bool {
        self.processes.read().contains_key(&pane)
    }

    pub fn len(&self) -> usize {
        self.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.read().is_empty()
    }

    /// Kills every process and stops their output pumps.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let processes: Vec<(PaneId, Arc<PtyProcess>)> = self.processes.write().drain().collect();
        if !processes.is_empty() {
            info!(target = "server::processes", count = processes.len(), "stopping pane processes");
        }
        for (_, process) in processes {
            process.kill();
        }
    }

    fn command(&self, request: &SpawnRequest<'_>) -> CommandBuilder {
        let mut command = CommandBuilder::new(&self.shell);
        if let Some(line) = request.command {
            command.arg("-c");
            command.arg(line);
        }
        if let Some(cwd) = request.cwd {
            command.cwd(cwd);
        }
        for (key, value) in request.env {
            command.env(key, value);
        }
        command.env(PANE_ENV, request.pane.pane_id.to_string());
        command.env(CHANNEL_ENV, &self.channel);
        command
    }
}

impl PaneSpawner for ProcessTable {
    fn spawn(&self, request: SpawnRequest<'_>) -> Result<(), SpawnError> {
        let pane = request.pane.pane_id;
        let start_failed = |reason: String| SpawnError::Start { pane, reason };

        let (process, reader) = PtyProcess::spawn(self.command(&request), request.pane.width, request.pane.height)
            .map_err(|err| start_failed(format!("{err:#}")))?;
        let process = Arc::new(process);

        {
            let _runtime = self.runtime.enter();
            spawn_pump(
                pane.to_string(),
                reader,
                self.panes.clone(),
                self.hub.clone(),
                self.cancel.child_token(),
            )
            .map_err(|err| start_failed(err.to_string()))?;
        }

        let mut processes = self.processes.write();
        if self.orphaned.lock().remove(&pane) {
            drop(processes);
            debug!(target = "server::processes", pane_id = %pane, "pane killed while starting; stopping its process");
            process.kill();
            return Err(SpawnError::PaneGone(pane));
        }
        debug!(
            target = "server::processes",
            pane_id = %pane,
            pid = ?process.process_id(),
            command = request.command.unwrap_or(&self.shell),
            "pane process started"
        );
        let replaced = processes.insert(pane, process);
        drop(processes);
        if let Some(previous) = replaced {
            previous.kill();
        }
        Ok(())
    }

    fn send(&self, pane: PaneId, bytes: &[u8]) -> Result<(), SpawnError> {
        let process = self
            .processes
            .read()
            .get(&pane)
            .cloned()
            .ok_or(SpawnError::NoProcess(pane))?;
        process.write(bytes).map_err(|err| SpawnError::Write {
            pane,
            reason: err.to_string(),
        })
    }
}

impl PaneEffectSink for ProcessTable {
    fn apply(&self, effect: &PaneEffect) {
        match effect {
            PaneEffect::Ensure { .. } => {}
            PaneEffect::Resize { pane_id, cols, rows } => {
                let process = self.processes.read().get(pane_id).cloned();
                if let Some(process) = process {
                    if let Err(err) = process.resize(*cols, *rows) {
                        warn!(target = "server::processes", pane_id = %pane_id, error = %err, "pty resize failed");
                    }
                }
            }
            PaneEffect::Remove { pane_id } => {
                let mut processes = self.processes.write();
                match processes.remove(pane_id) {
                    Some(process) => {
                        drop(processes);
                        debug!(target = "server::processes", pane_id = %pane_id, "killing pane process");
                        process.kill();
                    }
                    None => {
                        self.orphaned.lock().insert(*pane_id);
                    }
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::server::pane_store::PaneStoreConfig;
    use crate::session::{NewSession, PaneRef, SessionId, SessionStore, SplitOptions, WindowId};

    fn pane_ref(id: u32) -> PaneRef {
        PaneRef {
            session_id: SessionId(0),
            window_id: WindowId(0),
            pane_id: PaneId(id),
            index: 0,
            width: 40,
            height: 5,
        }
    }

    fn table(panes: Arc<PaneStateStore>) -> ProcessTable {
        ProcessTable::new(
            panes,
            Arc::new(StreamHub::new(16)),
            "/bin/sh",
            "harbor-test",
            Handle::current(),
            CancellationToken::new(),
        )
    }

    #[test_timeout::tokio_timeout_test(20)]
    async fn pane_killed_before_launch_gets_no_process() {
        let panes = Arc::new(PaneStateStore::new(PaneStoreConfig::default()));
        let sessions = SessionStore::new(panes.clone());
        let table = Arc::new(table(panes));
        sessions.add_sink(table.clone());

        let root = sessions
            .create_session(NewSession {
                cols: 80,
                rows: 24,
                ..NewSession::default()
            })
            .unwrap();
        let created = sessions.split_pane(root.pane_id, SplitOptions::default()).unwrap();
        sessions.kill_pane(created.pane_id).unwrap();

        let env = HashMap::new();
        let late = table.spawn(SpawnRequest {
            pane: created.pane_ref(),
            command: Some("sleep 30"),
            cwd: None,
            env: &env,
        });
        assert!(matches!(late, Err(SpawnError::PaneGone(id)) if id == created.pane_id));
        assert!(!table.contains(created.pane_id));

        // Only the one late spawn is refused.
        table
            .spawn(SpawnRequest {
                pane: root.pane_ref(),
                command: Some("sleep 30"),
                cwd: None,
                env: &env,
            })
            .unwrap();
        assert_eq!(table.len(), 1);
        table.shutdown();
        assert!(table.is_empty());
    }

    #[test_timeout::tokio_timeout_test(20)]
    async fn command_output_lands_in_pane_and_remove_kills() {
        let panes = Arc::new(PaneStateStore::new(PaneStoreConfig::default()));
        panes.ensure_pane("%3", 40, 5);
        let table = table(panes.clone());
        let env = HashMap::new();
        table
            .spawn(SpawnRequest {
                pane: pane_ref(3),
                command: Some("printf '%s ready' \"$HARBOR_PANE\"; sleep 30"),
                cwd: None,
                env: &env,
            })
            .unwrap();
        assert!(table.contains(PaneId(3)));

        loop {
            if panes.snapshot("%3").is_some_and(|text| text.contains("%3 ready")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        table.apply(&PaneEffect::Remove { pane_id: PaneId(3) });
        assert!(table.is_empty());
        assert!(matches!(table.send(PaneId(3), b"x"), Err(SpawnError::NoProcess(_))));
        table.shutdown();
    }
}
