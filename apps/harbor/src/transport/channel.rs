//! Local channel naming. The name is a pure function of the caller's
//! identity and an optional override; nothing here reads the environment.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

pub const CHANNEL_PREFIX: &str = "harbor";
pub const FALLBACK_IDENTITY: &str = "default";

// Fails closed: without a pattern no override is trusted.
static OVERRIDE_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(&format!(r"(?i)^{CHANNEL_PREFIX}-[a-z0-9._-]{{1,128}}$")).ok());

/// Replaces everything but ASCII letters and digits with `_`.
pub fn sanitize_identity(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect();
    if cleaned.is_empty() {
        FALLBACK_IDENTITY.to_string()
    } else {
        cleaned
    }
}

pub fn is_trusted_override(name: &str) -> bool {
    OVERRIDE_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(name))
}

/// `harbor-<identity>`, unless a trusted override is given. An override that
/// fails validation is ignored with a warning.
pub fn derive_channel_name(identity: &str, override_name: Option<&str>) -> String {
    if let Some(candidate) = override_name.filter(|name| !name.is_empty()) {
        if is_trusted_override(candidate) {
            return candidate.to_string();
        }
        warn!(
            target = "transport::channel",
            rejected = %candidate.escape_debug(),
            "ignoring untrusted channel override"
        );
    }
    format!("{CHANNEL_PREFIX}-{}", sanitize_identity(identity))
}

/// Socket files for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    pub request: PathBuf,
    pub stream: PathBuf,
}

impl ChannelPaths {
    pub fn new(runtime_dir: &Path, channel: &str) -> Self {
        Self {
            request: runtime_dir.join(format!("{channel}.sock")),
            stream: runtime_dir.join(format!("{channel}.stream.sock")),
        }
    }
}
