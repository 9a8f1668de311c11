//! Restart harness for long-lived background loops.
//!
//! A supervised worker is a closure producing a future. When the future
//! panics or resolves to an error the supervisor logs the failure (with a
//! backtrace for panics), notifies the optional failure hook, waits out an
//! exponential backoff and starts a fresh future. After `max_retries`
//! restarts the give-up hook fires and the loop exits for good. Panics never
//! leave the supervising task, so sibling workers are unaffected.

mod backoff;
mod panic_trace;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub use backoff::Backoff;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Panic,
    Error,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Panic => "panic",
            FailureKind::Error => "error",
        })
    }
}

/// One failed run of a supervised worker.
#[derive(Debug, Clone)]
pub struct WorkerFailure {
    pub worker: String,
    /// 1-based count of consecutive failures, including this one.
    pub attempt: u32,
    pub kind: FailureKind,
    pub message: String,
    pub backtrace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The worker returned `Ok(())`.
    Completed,
    /// The cancellation token fired.
    Cancelled,
    /// A failure happened while the shutdown predicate held.
    ShuttingDown,
    /// Retries were exhausted.
    GaveUp,
}

pub type FailureHook = Arc<dyn Fn(&WorkerFailure) + Send + Sync>;
pub type ShutdownPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

pub struct Supervisor {
    name: String,
    config: SupervisorConfig,
    on_failure: Option<FailureHook>,
    on_give_up: Option<FailureHook>,
    shutting_down: Option<ShutdownPredicate>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: SupervisorConfig::default(),
            on_failure: None,
            on_give_up: None,
            shutting_down: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Called after every failure, before the restart decision.
    pub fn on_failure(mut self, hook: impl Fn(&WorkerFailure) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Called once when retries are exhausted.
    pub fn on_give_up(mut self, hook: impl Fn(&WorkerFailure) + Send + Sync + 'static) -> Self {
        self.on_give_up = Some(Arc::new(hook));
        self
    }

    /// Checked after each failure; when it returns `true` the loop exits
    /// without restarting or notifying.
    pub fn shutdown_when(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.shutting_down = Some(Arc::new(predicate));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spawn<F, Fut>(self, worker: F) -> JoinHandle<SupervisorExit>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        tokio::spawn(self.run(worker))
    }

    pub async fn run<F, Fut>(self, mut worker: F) -> SupervisorExit
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        panic_trace::install();
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return SupervisorExit::Cancelled;
            }

            // The closure call sits inside the guarded future so a panic while
            // building the future is caught as well.
            let guarded = AssertUnwindSafe(async { worker().await }).catch_unwind();
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(target = "supervisor", worker = %self.name, "worker cancelled");
                    return SupervisorExit::Cancelled;
                }
                outcome = guarded => outcome,
            };

            let (kind, message, backtrace) = match outcome {
                Ok(Ok(())) => {
                    debug!(target = "supervisor", worker = %self.name, "worker completed");
                    return SupervisorExit::Completed;
                }
                Ok(Err(err)) => (FailureKind::Error, format!("{err:#}"), None),
                Err(payload) => (
                    FailureKind::Panic,
                    panic_trace::payload_message(payload.as_ref()),
                    panic_trace::take(),
                ),
            };

            if self.shutting_down.as_ref().is_some_and(|predicate| predicate()) {
                debug!(
                    target = "supervisor",
                    worker = %self.name,
                    %kind,
                    "worker failed during shutdown; not restarting"
                );
                return SupervisorExit::ShuttingDown;
            }

            failures = failures.saturating_add(1);
            let failure = WorkerFailure {
                worker: self.name.clone(),
                attempt: failures,
                kind,
                message,
                backtrace,
            };
            error!(
                target = "supervisor",
                worker = %failure.worker,
                attempt = failure.attempt,
                kind = %failure.kind,
                reason = %failure.message,
                backtrace = failure.backtrace.as_deref().unwrap_or("<unavailable>"),
                "worker failed"
            );
            if let Some(hook) = &self.on_failure {
                hook(&failure);
            }

            if failures > self.config.max_retries {
                error!(
                    target = "supervisor",
                    worker = %self.name,
                    retries = self.config.max_retries,
                    "worker exhausted restarts; giving up"
                );
                if let Some(hook) = &self.on_give_up {
                    hook(&failure);
                }
                return SupervisorExit::GaveUp;
            }

            let delay = backoff.next_delay();
            warn!(
                target = "supervisor",
                worker = %self.name,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "restarting worker after backoff"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SupervisorExit::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Instant;

    fn explode(message: &str) -> anyhow::Result<()> {
        panic!("{message}")
    }

    fn quick_config(max_retries: u32) -> SupervisorConfig {
        SupervisorConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn gives_up_after_max_retries() {
        let runs = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(AtomicU32::new(0));
        let give_ups = Arc::new(AtomicU32::new(0));

        let exit = {
            let runs = runs.clone();
            let failures = failures.clone();
            let give_ups = give_ups.clone();
            Supervisor::new("always-panics")
                .with_config(quick_config(10))
                .on_failure(move |_| {
                    failures.fetch_add(1, Ordering::SeqCst);
                })
                .on_give_up(move |failure| {
                    assert_eq!(failure.attempt, 11);
                    give_ups.fetch_add(1, Ordering::SeqCst);
                })
                .run(move || {
                    let runs = runs.clone();
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        explode("boom")
                    }
                })
                .await
        };

        assert_eq!(exit, SupervisorExit::GaveUp);
        // first run plus exactly ten restarts
        assert_eq!(runs.load(Ordering::SeqCst), 11);
        assert_eq!(failures.load(Ordering::SeqCst), 11);
        assert_eq!(give_ups.load(Ordering::SeqCst), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn restarts_then_completes() {
        let runs = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let exit = {
            let runs = runs.clone();
            let seen = seen.clone();
            Supervisor::new("flaky")
                .with_config(quick_config(10))
                .on_failure(move |failure| {
                    seen.lock().unwrap().push(failure.clone());
                })
                .run(move || {
                    let attempt = runs.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt == 0 {
                            return explode("first run explodes");
                        }
                        if attempt == 1 {
                            anyhow::bail!("second run errors");
                        }
                        anyhow::Ok(())
                    }
                })
                .await
        };

        assert_eq!(exit, SupervisorExit::Completed);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, FailureKind::Panic);
        assert_eq!(seen[0].message, "first run explodes");
        assert!(seen[0].backtrace.is_some());
        assert_eq!(seen[1].kind, FailureKind::Error);
        assert_eq!(seen[1].message, "second run errors");
        assert_eq!(seen[1].attempt, 2);
    }

    #[test_timeout::tokio_timeout_test]
    async fn shutdown_predicate_suppresses_restart_and_hooks() {
        let runs = Arc::new(AtomicU32::new(0));
        let notified = Arc::new(AtomicBool::new(false));
        let exit = {
            let runs = runs.clone();
            let on_failure = notified.clone();
            let on_give_up = notified.clone();
            Supervisor::new("tearing-down")
                .with_config(quick_config(10))
                .shutdown_when(|| true)
                .on_failure(move |_| on_failure.store(true, Ordering::SeqCst))
                .on_give_up(move |_| on_give_up.store(true, Ordering::SeqCst))
                .run(move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    async { explode("dependency already gone") }
                })
                .await
        };

        assert_eq!(exit, SupervisorExit::ShuttingDown);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!notified.load(Ordering::SeqCst));
    }

    #[test_timeout::tokio_timeout_test]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let config = SupervisorConfig {
            max_retries: 10,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let handle = Supervisor::new("slow-backoff")
            .with_config(config)
            .with_cancellation(cancel.clone())
            .spawn(|| async { anyhow::bail!("fails immediately") });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        cancel.cancel();
        let exit = handle.await.expect("join supervisor");
        assert_eq!(exit, SupervisorExit::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test_timeout::tokio_timeout_test]
    async fn cancellation_stops_running_worker() {
        let cancel = CancellationToken::new();
        let handle = Supervisor::new("forever")
            .with_cancellation(cancel.clone())
            .spawn(|| async {
                std::future::pending::<()>().await;
                anyhow::Ok(())
            });
        cancel.cancel();
        assert_eq!(handle.await.expect("join"), SupervisorExit::Cancelled);
    }

    #[test_timeout::tokio_timeout_test]
    async fn panicking_worker_does_not_affect_siblings() {
        let healthy_runs = Arc::new(AtomicU32::new(0));
        let bad = Supervisor::new("bad")
            .with_config(quick_config(2))
            .spawn(|| async { explode("isolated") });
        let good = {
            let healthy_runs = healthy_runs.clone();
            Supervisor::new("good").spawn(move || {
                let healthy_runs = healthy_runs.clone();
                async move {
                    healthy_runs.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })
        };

        assert_eq!(bad.await.expect("bad joins"), SupervisorExit::GaveUp);
        assert_eq!(good.await.expect("good joins"), SupervisorExit::Completed);
        assert_eq!(healthy_runs.load(Ordering::SeqCst), 1);
    }
}
