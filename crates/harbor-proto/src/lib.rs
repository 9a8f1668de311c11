//! Wire definitions shared by the harbor server and its consumers.
//! Kept in a dedicated crate so command-line shims and front ends can speak
//! the protocol without pulling in the server runtime.

mod control;
mod frame;
mod request;

pub use control::{ControlAction, ControlMessage};
pub use frame::{FrameError, MAX_PANE_ID_LEN, PaneFrame, decode_frame, encode_frame};
pub use request::{FlagType, FlagTypeError, FlagValue, Flags, Request, Response};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("empty message")]
    Empty,
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Treats an explicit `null` the same as an absent field, so peers that
/// encode empty collections as `null` decode to empty values.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de> + Default,
{
    use serde::Deserialize;
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
