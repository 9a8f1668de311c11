use serde::{Deserialize, Serialize};

use crate::{WireError, null_as_default};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

/// Consumer → server message on the streaming channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub action: ControlAction,
    #[serde(rename = "paneIds", default, deserialize_with = "null_as_default")]
    pub pane_ids: Vec<String>,
}

impl ControlMessage {
    pub fn subscribe<I, S>(pane_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: ControlAction::Subscribe,
            pane_ids: pane_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn unsubscribe<I, S>(pane_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: ControlAction::Unsubscribe,
            pane_ids: pane_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, WireError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(WireError::Empty);
        }
        Ok(serde_json::from_str(trimmed)?)
    }
}
