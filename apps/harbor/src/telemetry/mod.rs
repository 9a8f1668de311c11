//! Process-wide tracing subscriber, configured from [`LogSettings`].
//!
//! Harbor's own crates log at the configured level. Everything else is held
//! at `info` so the socket and websocket libraries do not bury harbor's
//! events at `debug`/`trace`, unless `trace_deps` is set.

use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogSettings;

const OWN_TARGETS: &[&str] = &["harbor", "harbor_proto", "worker_supervisor"];
const DEPENDENCY_CEILING: LevelFilter = LevelFilter::INFO;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Keeps the background log writer alive. Buffered lines are flushed when it
/// is dropped, so hold it until the process is about to exit.
#[must_use = "dropping the guard stops log output"]
pub struct LogGuard {
    _writer: WorkerGuard,
}

/// Installs the global subscriber described by `settings`.
pub fn init(settings: &LogSettings) -> Result<LogGuard, InitError> {
    let directives = directives(settings);
    let filter = EnvFilter::try_new(&directives).map_err(|err| InitError::Filter {
        filter: directives.clone(),
        reason: err.to_string(),
    })?;

    let (writer, guard) = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::OpenFile {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let output = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(settings.file.is_none())
        .with_target(settings.level >= LevelFilter::DEBUG)
        .with_thread_names(settings.level == LevelFilter::TRACE);
    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .map_err(|_| InitError::AlreadyInstalled)?;

    tracing::debug!(target = "telemetry", filter = %directives, "logging initialised");
    Ok(LogGuard { _writer: guard })
}

/// The `EnvFilter` directive string for `settings`. An explicit filter wins
/// over the level.
pub fn directives(settings: &LogSettings) -> String {
    if let Some(filter) = settings.filter.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        return filter.to_string();
    }
    let level = settings.level;
    let others = if settings.trace_deps {
        level
    } else {
        level.min(DEPENDENCY_CEILING)
    };
    if others == level {
        return level.to_string();
    }
    OWN_TARGETS
        .iter()
        .fold(others.to_string(), |acc, target| format!("{acc},{target}={level}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(level: LevelFilter) -> LogSettings {
        LogSettings {
            level,
            ..LogSettings::default()
        }
    }

    #[test]
    fn quiet_levels_apply_everywhere() {
        assert_eq!(directives(&LogSettings::default()), "warn");
        assert_eq!(directives(&at(LevelFilter::INFO)), "info");
        assert_eq!(directives(&at(LevelFilter::OFF)), "off");
    }

    #[test]
    fn verbose_levels_only_reach_harbor_crates() {
        assert_eq!(
            directives(&at(LevelFilter::DEBUG)),
            "info,harbor=debug,harbor_proto=debug,worker_supervisor=debug"
        );
        let everything = LogSettings {
            trace_deps: true,
            ..at(LevelFilter::TRACE)
        };
        assert_eq!(directives(&everything), "trace");
    }

    #[test]
    fn explicit_filter_replaces_level() {
        let settings = LogSettings {
            filter: Some(" harbor::server=trace ".to_string()),
            ..at(LevelFilter::ERROR)
        };
        assert_eq!(directives(&settings), "harbor::server=trace");
        let blank = LogSettings {
            filter: Some("  ".to_string()),
            ..at(LevelFilter::ERROR)
        };
        assert_eq!(directives(&blank), "error");
    }

    #[test]
    fn bad_settings_fail_before_installing() {
        let unparsable = LogSettings {
            filter: Some("harbor=loud".to_string()),
            ..LogSettings::default()
        };
        assert!(matches!(init(&unparsable), Err(InitError::Filter { .. })));

        let dir = tempfile::tempdir().unwrap();
        let unreachable = LogSettings {
            file: Some(dir.path().join("missing").join("harbor.log")),
            ..LogSettings::default()
        };
        assert!(matches!(init(&unreachable), Err(InitError::OpenFile { .. })));
    }
}
