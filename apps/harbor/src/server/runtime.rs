//! Wires the stores, router and listeners into one running server.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use harbor_proto::Request;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use worker_supervisor::{Supervisor, SupervisorExit};

use crate::command::{CommandRouter, RouterDefaults};
use crate::config::Config;
use crate::server::pane_store::PaneStateStore;
use crate::server::processes::ProcessTable;
use crate::session::SessionStore;
use crate::subscription::{StreamHub, StreamServer};
use crate::transport::{ChannelPaths, IpcServer};

const RETENTION_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Create one session before accepting requests.
    pub initial_session: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self { initial_session: true }
    }
}

pub struct Server {
    channel: String,
    paths: ChannelPaths,
    panes: Arc<PaneStateStore>,
    sessions: Arc<SessionStore>,
    router: Arc<CommandRouter>,
    hub: Arc<StreamHub>,
    processes: Arc<ProcessTable>,
    ipc: Arc<IpcServer>,
    stream: Arc<StreamServer>,
    cancel: CancellationToken,
}

impl Server {
    /// Builds every component and binds both sockets. Must run inside a Tokio
    /// runtime; pane output pumps are spawned onto it.
    pub async fn bind(config: &Config) -> Result<Self> {
        let channel = config.channel_name();
        let paths = ChannelPaths::new(&config.runtime_dir, &channel);
        std::fs::create_dir_all(&config.runtime_dir)
            .with_context(|| format!("failed to create runtime dir {}", config.runtime_dir.display()))?;

        let cancel = CancellationToken::new();
        let panes = Arc::new(PaneStateStore::new(config.pane_store()));
        let sessions = Arc::new(SessionStore::new(panes.clone()));
        let hub = Arc::new(StreamHub::new(config.stream_queue_depth));
        let processes = Arc::new(ProcessTable::new(
            panes.clone(),
            hub.clone(),
            config.shell.clone(),
            channel.clone(),
            Handle::current(),
            cancel.child_token(),
        ));
        sessions.add_sink(processes.clone());

        let router = Arc::new(
            CommandRouter::new(
                sessions.clone(),
                RouterDefaults {
                    cols: config.default_cols,
                    rows: config.default_rows,
                },
            )
            .with_spawner(processes.clone()),
        );

        let ipc = Arc::new(
            IpcServer::bind(&paths.request, router.clone(), config.io_timeout)
                .with_context(|| format!("failed to bind {}", paths.request.display()))?,
        );
        let stream = Arc::new(
            StreamServer::bind(&paths.stream, hub.clone())
                .with_context(|| format!("failed to bind {}", paths.stream.display()))?,
        );

        info!(
            target = "server",
            channel = %channel,
            request_socket = %paths.request.display(),
            stream_socket = %paths.stream.display(),
            "server bound"
        );

        Ok(Self {
            channel,
            paths,
            panes,
            sessions,
            router,
            hub,
            processes,
            ipc,
            stream,
            cancel,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn paths(&self) -> &ChannelPaths {
        &self.paths
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn hub(&self) -> &Arc<StreamHub> {
        &self.hub
    }

    /// Cancelling the token stops [`Server::run`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serves until Ctrl-C or until the cancellation token fires.
    pub async fn run(self, options: ServerOptions) -> Result<()> {
        if options.initial_session {
            let router = self.router.clone();
            let response = tokio::task::spawn_blocking(move || router.execute(&Request::new("new-session")))
                .await
                .context("initial session task failed")?;
            if !response.is_success() {
                anyhow::bail!("failed to create initial session: {}", response.stderr.trim_end());
            }
        }

        let mut tasks = vec![
            self.supervise_ipc(),
            self.supervise_stream(),
            self.watch_subscriptions(),
            self.log_deltas(),
            self.retain_panes(),
        ];

        tokio::select! {
            _ = self.cancel.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(target = "server", error = %err, "failed to listen for ctrl-c");
                }
                info!(target = "server", "interrupt received; shutting down");
            }
        }

        self.shutdown(&mut tasks).await;
        Ok(())
    }

    fn supervise_ipc(&self) -> JoinHandle<()> {
        let ipc = self.ipc.clone();
        let handle = Supervisor::new("ipc-accept")
            .with_cancellation(self.cancel.child_token())
            .spawn(move || {
                let ipc = ipc.clone();
                async move { ipc.accept_loop().await }
            });
        report_exit("ipc-accept", handle)
    }

    fn supervise_stream(&self) -> JoinHandle<()> {
        let stream = self.stream.clone();
        let handle = Supervisor::new("stream-accept")
            .with_cancellation(self.cancel.child_token())
            .spawn(move || {
                let stream = stream.clone();
                async move { stream.accept_loop().await }
            });
        report_exit("stream-accept", handle)
    }

    /// Keeps the pane store's eagerly emulated set equal to what consumers
    /// are subscribed to.
    fn watch_subscriptions(&self) -> JoinHandle<()> {
        let mut subscriptions = self.hub.watch_subscriptions();
        let panes = self.panes.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = subscriptions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let active: HashSet<String> = subscriptions.borrow_and_update().clone();
                        debug!(target = "server", panes = active.len(), "active pane set changed");
                        panes.set_active_panes(&active);
                    }
                }
            }
        })
    }

    fn log_deltas(&self) -> JoinHandle<()> {
        let mut deltas = self.router.subscribe_deltas();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    delta = deltas.recv() => match delta {
                        Ok(delta) => debug!(target = "server::deltas", ?delta, "session tree changed"),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target = "server::deltas", skipped, "delta log lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Drops pane content whose pane no longer exists in the session tree.
    fn retain_panes(&self) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let panes = self.panes.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = panes.retain_panes(&sessions.pane_ids());
                        if !removed.is_empty() {
                            debug!(target = "server", removed = ?removed, "released orphaned pane state");
                        }
                    }
                }
            }
        })
    }

    async fn shutdown(self, tasks: &mut Vec<JoinHandle<()>>) {
        self.cancel.cancel();
        self.hub.kick_all();
        let processes = self.processes.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || processes.shutdown()).await {
            warn!(target = "server", error = %err, "process shutdown task failed");
        }
        for task in tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(target = "server", error = %err, "server task failed");
            }
        }
        info!(target = "server", channel = %self.channel, "server stopped");
    }
}

fn report_exit(name: &'static str, handle: JoinHandle<SupervisorExit>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match handle.await {
            Ok(SupervisorExit::GaveUp) => warn!(target = "server", worker = name, "listener gave up"),
            Ok(exit) => debug!(target = "server", worker = name, ?exit, "listener stopped"),
            Err(err) => warn!(target = "server", worker = name, error = %err, "listener task failed"),
        }
    })
}
