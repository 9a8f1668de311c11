use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::layout::LayoutNode;

macro_rules! tree_id {
    ($name:ident, $sigil:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// Parses the sigil-prefixed form, e.g. `%3`.
            pub fn parse(text: &str) -> Option<Self> {
                text.strip_prefix($sigil)?.parse().ok().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $sigil, self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }
    };
}

tree_id!(SessionId, '$');
tree_id!(WindowId, '@');
tree_id!(PaneId, '%');

/// Project directory a session was opened for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub root: PathBuf,
    pub worktree: Option<Worktree>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worktree {
    pub branch: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub idle: bool,
    pub active_window: Option<WindowId>,
    pub windows: Vec<Window>,
    pub workspace: Option<Workspace>,
    pub cols: u16,
    pub rows: u16,
}

impl Session {
    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.iter().find(|window| window.id == id)
    }

    pub fn window_position(&self, id: WindowId) -> Option<usize> {
        self.windows.iter().position(|window| window.id == id)
    }

    pub fn active_window(&self) -> Option<&Window> {
        self.active_window.and_then(|id| self.window(id))
    }

    /// Lowest window index not in use.
    pub fn next_window_index(&self) -> u32 {
        (0..)
            .find(|index| self.windows.iter().all(|window| window.index != *index))
            .unwrap_or(0)
    }

    pub fn sort_windows(&mut self) {
        self.windows.sort_by_key(|window| window.index);
    }
}

#[derive(Debug, Clone)]
pub struct Window {
    pub id: WindowId,
    pub index: u32,
    pub name: String,
    pub layout: LayoutNode,
    pub panes: Vec<Pane>,
    pub active_pane: Option<PaneId>,
    pub cols: u16,
    pub rows: u16,
}

impl Window {
    pub fn pane(&self, id: PaneId) -> Option<&Pane> {
        self.panes.iter().find(|pane| pane.id == id)
    }

    pub fn pane_position(&self, id: PaneId) -> Option<usize> {
        self.panes.iter().position(|pane| pane.id == id)
    }

    pub fn set_active_pane(&mut self, id: Option<PaneId>) {
        self.active_pane = id;
        for pane in &mut self.panes {
            pane.active = Some(pane.id) == id;
        }
    }

    /// Keeps `Pane::index` equal to the pane's position.
    pub fn reindex(&mut self) {
        for (position, pane) in self.panes.iter_mut().enumerate() {
            pane.index = position as u32;
        }
    }
}

/// Structural pane record; terminal content lives in the pane state store.
#[derive(Debug, Clone)]
pub struct Pane {
    pub id: PaneId,
    pub index: u32,
    pub title: String,
    pub active: bool,
    pub width: u16,
    pub height: u16,
}

/// Scalars of a pane as seen at resolution time. May be stale once the
/// session lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneRef {
    pub session_id: SessionId,
    pub window_id: WindowId,
    pub pane_id: PaneId,
    pub index: u32,
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRef {
    pub session_id: SessionId,
    pub window_id: WindowId,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub session_id: SessionId,
    pub name: String,
}

/// Everything needed to describe a pane relationally, copied under the
/// session lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaneContext {
    pub session_id: SessionId,
    pub session_name: String,
    pub session_windows: usize,
    pub session_created: DateTime<Utc>,
    pub session_idle: bool,
    pub window_id: WindowId,
    pub window_index: u32,
    pub window_name: String,
    pub window_active: bool,
    pub window_panes: usize,
    pub window_width: u16,
    pub window_height: u16,
    pub pane_id: PaneId,
    pub pane_index: u32,
    pub pane_title: String,
    pub pane_active: bool,
    pub pane_width: u16,
    pub pane_height: u16,
    pub workspace: Option<Workspace>,
}

impl PaneContext {
    pub(crate) fn capture(session: &Session, window: &Window, pane: &Pane) -> Self {
        Self {
            session_id: session.id,
            session_name: session.name.clone(),
            session_windows: session.windows.len(),
            session_created: session.created_at,
            session_idle: session.idle,
            window_id: window.id,
            window_index: window.index,
            window_name: window.name.clone(),
            window_active: session.active_window == Some(window.id),
            window_panes: window.panes.len(),
            window_width: window.cols,
            window_height: window.rows,
            pane_id: pane.id,
            pane_index: pane.index,
            pane_title: pane.title.clone(),
            pane_active: pane.active,
            pane_width: pane.width,
            pane_height: pane.height,
            workspace: session.workspace.clone(),
        }
    }

    pub fn pane_ref(&self) -> PaneRef {
        PaneRef {
            session_id: self.session_id,
            window_id: self.window_id,
            pane_id: self.pane_id,
            index: self.pane_index,
            width: self.pane_width,
            height: self.pane_height,
        }
    }
}
