use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::level_filters::LevelFilter;

use crate::server::pane_store::PaneStoreConfig;
use crate::transport::channel::{self, ChannelPaths};

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;
const DEFAULT_SHELL: &str = "/bin/sh";

/// Harbor server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Local user name the channel is derived from
    pub identity: String,
    pub channel_override: Option<String>,
    /// Directory holding the request and streaming sockets
    pub runtime_dir: PathBuf,
    pub replay_capacity: usize,
    pub scrollback_lines: usize,
    pub default_cols: u16,
    pub default_rows: u16,
    pub io_timeout: Duration,
    /// Frames buffered per streaming consumer before frames are dropped
    pub stream_queue_depth: usize,
    pub shell: String,
    pub log: LogSettings,
}

/// Logging knobs read by [`crate::telemetry::init`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    /// Complete `EnvFilter` directive string; replaces `level` when set
    pub filter: Option<String>,
    /// Append to this file instead of writing to stderr
    pub file: Option<PathBuf>,
    /// Let dependency crates log below `info`
    pub trace_deps: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::WARN,
            filter: None,
            file: None,
            trace_deps: false,
        }
    }
}

impl LogSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: parsed_var("HARBOR_LOG_LEVEL").unwrap_or(defaults.level),
            filter: non_empty_var("HARBOR_LOG_FILTER"),
            file: non_empty_var("HARBOR_LOG_FILE").map(PathBuf::from),
            trace_deps: non_empty_var("HARBOR_TRACE_DEPS")
                .is_some_and(|value| !matches!(value.trim(), "0" | "false" | "no")),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let (default_cols, default_rows) = env::var("HARBOR_DEFAULT_SIZE")
            .ok()
            .and_then(|value| parse_size(&value))
            .unwrap_or((defaults.default_cols, defaults.default_rows));

        Self {
            identity: ["USER", "LOGNAME", "USERNAME"]
                .into_iter()
                .find_map(non_empty_var)
                .unwrap_or(defaults.identity),
            channel_override: non_empty_var("HARBOR_CHANNEL"),
            runtime_dir: non_empty_var("HARBOR_RUNTIME_DIR")
                .or_else(|| non_empty_var("XDG_RUNTIME_DIR"))
                .map(PathBuf::from)
                .unwrap_or(defaults.runtime_dir),
            replay_capacity: parsed_var("HARBOR_REPLAY_BYTES").unwrap_or(defaults.replay_capacity),
            scrollback_lines: parsed_var("HARBOR_SCROLLBACK_LINES").unwrap_or(defaults.scrollback_lines),
            default_cols,
            default_rows,
            io_timeout: parsed_var("HARBOR_IO_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.io_timeout),
            stream_queue_depth: parsed_var("HARBOR_STREAM_QUEUE").unwrap_or(defaults.stream_queue_depth),
            shell: non_empty_var("HARBOR_SHELL")
                .or_else(|| non_empty_var("SHELL"))
                .unwrap_or(defaults.shell),
            log: LogSettings::from_env(),
        }
    }

    pub fn channel_name(&self) -> String {
        channel::derive_channel_name(&self.identity, self.channel_override.as_deref())
    }

    pub fn channel_paths(&self) -> ChannelPaths {
        ChannelPaths::new(&self.runtime_dir, &self.channel_name())
    }

    pub fn pane_store(&self) -> PaneStoreConfig {
        PaneStoreConfig {
            default_cols: self.default_cols as usize,
            default_rows: self.default_rows as usize,
            replay_capacity: self.replay_capacity,
            scrollback_lines: self.scrollback_lines,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let pane_store = PaneStoreConfig::default();
        Self {
            identity: channel::FALLBACK_IDENTITY.to_string(),
            channel_override: None,
            runtime_dir: env::temp_dir(),
            replay_capacity: pane_store.replay_capacity,
            scrollback_lines: pane_store.scrollback_lines,
            default_cols: DEFAULT_COLS,
            default_rows: DEFAULT_ROWS,
            io_timeout: Duration::from_secs(5),
            stream_queue_depth: 256,
            shell: DEFAULT_SHELL.to_string(),
            log: LogSettings::default(),
        }
    }
}

/// Parses `COLSxROWS`, e.g. `120x40`.
pub fn parse_size(value: &str) -> Option<(u16, u16)> {
    let (cols, rows) = value.trim().split_once(['x', 'X'])?;
    let cols: u16 = cols.trim().parse().ok()?;
    let rows: u16 = rows.trim().parse().ok()?;
    (cols > 0 && rows > 0).then_some((cols, rows))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    non_empty_var(name).and_then(|value| value.trim().parse().ok())
}
