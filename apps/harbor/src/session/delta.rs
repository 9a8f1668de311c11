use serde::Serialize;

use super::model::{PaneId, SessionId, WindowId};

/// Structural change announced after a command commits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionDelta {
    SessionCreated {
        session_id: SessionId,
        name: String,
    },
    SessionRemoved {
        session_id: SessionId,
    },
    SessionRenamed {
        session_id: SessionId,
        name: String,
    },
    WindowAdded {
        session_id: SessionId,
        window_id: WindowId,
    },
    WindowRemoved {
        session_id: SessionId,
        window_ids: Vec<WindowId>,
    },
    WindowRenamed {
        window_id: WindowId,
        name: String,
    },
    PaneAdded {
        window_id: WindowId,
        pane_id: PaneId,
    },
    PaneRemoved {
        window_id: WindowId,
        pane_ids: Vec<PaneId>,
    },
    PaneRenamed {
        pane_id: PaneId,
        title: String,
    },
    ActiveChanged {
        session_id: SessionId,
        window_id: WindowId,
        pane_id: PaneId,
    },
    LayoutChanged {
        window_id: WindowId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_serialize_with_type_tag() {
        let delta = SessionDelta::PaneAdded {
            window_id: WindowId(1),
            pane_id: PaneId(4),
        };
        assert_eq!(
            serde_json::to_string(&delta).unwrap(),
            r#"{"type":"pane_added","window_id":"@1","pane_id":"%4"}"#
        );
    }
}
