//! Session → window → pane tree.
//!
//! One `RwLock` guards the tree shape. Every mutation runs entirely under the
//! write guard and records the terminal-side consequences as [`PaneEffect`]s,
//! which are handed to the registered sinks only after the guard is dropped.
//! Readers get owned copies ([`PaneRef`], [`PaneContext`]), never references
//! into the tree.

mod delta;
mod error;
mod layout;
mod model;
mod target;

pub use delta::SessionDelta;
pub use error::StoreError;
pub use layout::{LayoutNode, MIN_SPLIT_EXTENT, Navigate, Rect, SplitDirection};
pub use model::{
    Pane, PaneContext, PaneId, PaneRef, Session, SessionId, SessionRef, Window, WindowId,
    WindowRef, Workspace, Worktree,
};
pub use target::{Target, TargetKind};

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::server::pane_store::PaneStateStore;

/// Terminal-side work implied by a structural change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneEffect {
    Ensure { pane_id: PaneId, cols: u16, rows: u16 },
    Resize { pane_id: PaneId, cols: u16, rows: u16 },
    Remove { pane_id: PaneId },
}

pub trait PaneEffectSink: Send + Sync {
    fn apply(&self, effect: &PaneEffect);
}

pub type StoreResult<T> = Result<T, StoreError>;

pub const DEFAULT_WINDOW_NAME: &str = "shell";

#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub name: Option<String>,
    pub window_name: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub workspace: Option<Workspace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitSize {
    Cells(u16),
    Percent(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitOptions {
    pub direction: SplitDirection,
    /// Place the new pane left of / above the target.
    pub before: bool,
    pub size: Option<SplitSize>,
    /// Make the new pane active.
    pub select: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            direction: SplitDirection::Vertical,
            before: false,
            size: None,
            select: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeChange {
    To(u16),
    By(i32),
}

impl SizeChange {
    fn apply(self, current: u16) -> u16 {
        match self {
            SizeChange::To(size) => size,
            SizeChange::By(delta) => (current as i32 + delta).clamp(1, u16::MAX as i32) as u16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneRemoval {
    pub session_id: SessionId,
    pub window_id: WindowId,
    pub window_removed: bool,
    pub session_removed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRemoval {
    pub session_id: SessionId,
    pub panes: Vec<PaneId>,
    pub session_removed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneScope {
    All,
    Session(SessionId),
    Window(WindowId),
}

#[derive(Debug, Default)]
struct SessionTree {
    sessions: BTreeMap<SessionId, Session>,
    next_session: u32,
    next_window: u32,
    next_pane: u32,
}

impl SessionTree {
    fn session(&self, id: SessionId) -> StoreResult<&Session> {
        self.sessions
            .get(&id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    fn session_mut(&mut self, id: SessionId) -> StoreResult<&mut Session> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    fn window_mut(&mut self, session: SessionId, window: WindowId) -> StoreResult<&mut Window> {
        self.session_mut(session)?
            .windows
            .iter_mut()
            .find(|candidate| candidate.id == window)
            .ok_or_else(|| StoreError::WindowNotFound(window.to_string()))
    }

    fn find_window(&self, window: WindowId) -> StoreResult<SessionId> {
        self.sessions
            .values()
            .find(|session| session.window(window).is_some())
            .map(|session| session.id)
            .ok_or_else(|| StoreError::WindowNotFound(window.to_string()))
    }

    fn find_pane(&self, pane: PaneId) -> StoreResult<(SessionId, WindowId)> {
        self.sessions
            .values()
            .flat_map(|session| session.windows.iter().map(move |window| (session.id, window)))
            .find(|(_, window)| window.pane(pane).is_some())
            .map(|(session, window)| (session, window.id))
            .ok_or_else(|| StoreError::PaneNotFound(pane.to_string()))
    }

    fn context(&self, session: SessionId, window: WindowId, pane: PaneId) -> StoreResult<PaneContext> {
        let session = self.session(session)?;
        let window = session
            .window(window)
            .ok_or_else(|| StoreError::WindowNotFound(window.to_string()))?;
        let pane = window
            .pane(pane)
            .ok_or_else(|| StoreError::PaneNotFound(pane.to_string()))?;
        Ok(PaneContext::capture(session, window, pane))
    }

    fn pane_context(&self, pane: PaneId) -> StoreResult<PaneContext> {
        let (session, window) = self.find_pane(pane)?;
        self.context(session, window, pane)
    }

    fn active_context(&self, session: SessionId, window: WindowId) -> StoreResult<PaneContext> {
        let pane = self
            .session(session)?
            .window(window)
            .and_then(|window| window.active_pane)
            .ok_or_else(|| StoreError::WindowNotFound(window.to_string()))?;
        self.context(session, window, pane)
    }

    fn allocate_pane(&mut self) -> PaneId {
        let id = PaneId(self.next_pane);
        self.next_pane += 1;
        id
    }

    fn allocate_window(&mut self) -> WindowId {
        let id = WindowId(self.next_window);
        self.next_window += 1;
        id
    }

    fn name_in_use(&self, name: &str, except: Option<SessionId>) -> bool {
        self.sessions
            .values()
            .any(|session| session.name == name && Some(session.id) != except)
    }

    fn new_window(&mut self, index: u32, name: String, cols: u16, rows: u16) -> (Window, PaneId) {
        let window_id = self.allocate_window();
        let pane_id = self.allocate_pane();
        let window = Window {
            id: window_id,
            index,
            name,
            layout: LayoutNode::Leaf(pane_id),
            panes: vec![Pane {
                id: pane_id,
                index: 0,
                title: String::new(),
                active: true,
                width: cols,
                height: rows,
            }],
            active_pane: Some(pane_id),
            cols,
            rows,
        };
        (window, pane_id)
    }

    /// Removes a window; drops the session with it when it was the last.
    fn remove_window(
        &mut self,
        session_id: SessionId,
        window_id: WindowId,
        effects: &mut Vec<PaneEffect>,
    ) -> StoreResult<WindowRemoval> {
        let session = self.session_mut(session_id)?;
        let position = session
            .window_position(window_id)
            .ok_or_else(|| StoreError::WindowNotFound(window_id.to_string()))?;
        let window = session.windows.remove(position);
        let panes: Vec<PaneId> = window.panes.iter().map(|pane| pane.id).collect();
        effects.extend(panes.iter().map(|&pane_id| PaneEffect::Remove { pane_id }));

        if session.windows.is_empty() {
            self.sessions.remove(&session_id);
            return Ok(WindowRemoval {
                session_id,
                panes,
                session_removed: true,
            });
        }
        if session.active_window == Some(window_id) {
            let fallback = session.windows[position.saturating_sub(1)].id;
            session.active_window = Some(fallback);
        }
        Ok(WindowRemoval {
            session_id,
            panes,
            session_removed: false,
        })
    }
}

/// Recomputes pane geometry from the layout, orders panes as the layout does
/// and records the size changes. Panes in `created` get an ensure effect.
fn relayout(window: &mut Window, created: &[PaneId], effects: &mut Vec<PaneEffect>) {
    let geometry = window.layout.geometry(Rect::sized(window.cols, window.rows));
    let order: Vec<PaneId> = geometry.iter().map(|(id, _)| *id).collect();
    window
        .panes
        .sort_by_key(|pane| order.iter().position(|id| *id == pane.id).unwrap_or(usize::MAX));
    window.reindex();

    for (pane_id, rect) in geometry {
        let Some(pane) = window.panes.iter_mut().find(|pane| pane.id == pane_id) else {
            continue;
        };
        let changed = pane.width != rect.cols || pane.height != rect.rows;
        pane.width = rect.cols;
        pane.height = rect.rows;
        if created.contains(&pane_id) {
            effects.push(PaneEffect::Ensure {
                pane_id,
                cols: rect.cols,
                rows: rect.rows,
            });
        } else if changed {
            effects.push(PaneEffect::Resize {
                pane_id,
                cols: rect.cols,
                rows: rect.rows,
            });
        }
    }
}

fn clean_name(name: &str) -> StoreResult<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c == ':' || c == '.' { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(cleaned)
}

pub struct SessionStore {
    tree: RwLock<SessionTree>,
    sinks: RwLock<Vec<Arc<dyn PaneEffectSink>>>,
    panes: Arc<PaneStateStore>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.tree.read().sessions.len())
            .field("sinks", &self.sinks.read().len())
            .finish()
    }
}

impl SessionStore {
    pub fn new(panes: Arc<PaneStateStore>) -> Self {
        let sink: Arc<dyn PaneEffectSink> = panes.clone();
        Self {
            tree: RwLock::new(SessionTree::default()),
            sinks: RwLock::new(vec![sink]),
            panes,
        }
    }

    pub fn panes(&self) -> &Arc<PaneStateStore> {
        &self.panes
    }

    pub fn add_sink(&self, sink: Arc<dyn PaneEffectSink>) {
        self.sinks.write().push(sink);
    }

    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut SessionTree, &mut Vec<PaneEffect>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut effects = Vec::new();
        let result = {
            let mut tree = self.tree.write();
            change(&mut tree, &mut effects)
        };
        if result.is_ok() && !effects.is_empty() {
            let sinks = self.sinks.read().clone();
            for effect in &effects {
                for sink in &sinks {
                    sink.apply(effect);
                }
            }
        }
        result
    }

    fn read<T>(&self, query: impl FnOnce(&SessionTree) -> StoreResult<T>) -> StoreResult<T> {
        query(&self.tree.read())
    }

    pub fn create_session(&self, request: NewSession) -> StoreResult<PaneContext> {
        self.mutate(|tree, effects| {
            let name = match &request.name {
                Some(name) => {
                    let name = clean_name(name)?;
                    if tree.name_in_use(&name, None) {
                        return Err(StoreError::DuplicateSession(name));
                    }
                    name
                }
                None => (0u32..)
                    .map(|n| n.to_string())
                    .find(|candidate| !tree.name_in_use(candidate, None))
                    .unwrap_or_default(),
            };
            let window_name = match &request.window_name {
                Some(name) => clean_name(name)?,
                None => DEFAULT_WINDOW_NAME.to_string(),
            };
            let cols = request.cols.max(1);
            let rows = request.rows.max(1);

            let session_id = SessionId(tree.next_session);
            tree.next_session += 1;
            let (window, pane_id) = tree.new_window(0, window_name, cols, rows);
            let window_id = window.id;
            effects.push(PaneEffect::Ensure { pane_id, cols, rows });

            tree.sessions.insert(
                session_id,
                Session {
                    id: session_id,
                    name,
                    created_at: Utc::now(),
                    idle: false,
                    active_window: Some(window_id),
                    windows: vec![window],
                    workspace: request.workspace.clone(),
                    cols,
                    rows,
                },
            );
            debug!(target = "session::store", session = %session_id, pane = %pane_id, "session created");
            tree.context(session_id, window_id, pane_id)
        })
    }

    /// Returns the panes that were destroyed.
    pub fn remove_session(&self, session_id: SessionId) -> StoreResult<Vec<PaneId>> {
        self.mutate(|tree, effects| {
            let session = tree
                .sessions
                .remove(&session_id)
                .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
            let panes: Vec<PaneId> = session
                .windows
                .iter()
                .flat_map(|window| window.panes.iter().map(|pane| pane.id))
                .collect();
            effects.extend(panes.iter().map(|&pane_id| PaneEffect::Remove { pane_id }));
            debug!(target = "session::store", session = %session_id, "session removed");
            Ok(panes)
        })
    }

    pub fn rename_session(&self, session_id: SessionId, name: &str) -> StoreResult<String> {
        self.mutate(|tree, _| {
            let name = clean_name(name)?;
            if tree.name_in_use(&name, Some(session_id)) {
                return Err(StoreError::DuplicateSession(name));
            }
            tree.session_mut(session_id)?.name = name.clone();
            Ok(name)
        })
    }

    pub fn set_idle(&self, session_id: SessionId, idle: bool) -> StoreResult<()> {
        self.mutate(|tree, _| {
            tree.session_mut(session_id)?.idle = idle;
            Ok(())
        })
    }

    pub fn set_workspace(&self, session_id: SessionId, workspace: Option<Workspace>) -> StoreResult<()> {
        self.mutate(|tree, _| {
            tree.session_mut(session_id)?.workspace = workspace;
            Ok(())
        })
    }

    /// Changes the size every window of the session is laid out in.
    pub fn resize_session(&self, session_id: SessionId, cols: u16, rows: u16) -> StoreResult<()> {
        self.mutate(|tree, effects| {
            let session = tree.session_mut(session_id)?;
            session.cols = cols.max(1);
            session.rows = rows.max(1);
            for window in &mut session.windows {
                window.cols = session.cols;
                window.rows = session.rows;
                relayout(window, &[], effects);
            }
            Ok(())
        })
    }

    pub fn add_window(&self, session_id: SessionId, name: Option<&str>, select: bool) -> StoreResult<PaneContext> {
        self.mutate(|tree, effects| {
            let name = match name {
                Some(name) => clean_name(name)?,
                None => DEFAULT_WINDOW_NAME.to_string(),
            };
            let session = tree.session(session_id)?;
            let (index, cols, rows) = (session.next_window_index(), session.cols, session.rows);
            let (window, pane_id) = tree.new_window(index, name, cols, rows);
            let window_id = window.id;
            effects.push(PaneEffect::Ensure { pane_id, cols, rows });

            let session = tree.session_mut(session_id)?;
            session.windows.push(window);
            session.sort_windows();
            if select || session.active_window.is_none() {
                session.active_window = Some(window_id);
            }
            tree.context(session_id, window_id, pane_id)
        })
    }

    pub fn remove_window(&self, window_id: WindowId) -> StoreResult<WindowRemoval> {
        self.mutate(|tree, effects| {
            let session_id = tree.find_window(window_id)?;
            tree.remove_window(session_id, window_id, effects)
        })
    }

    /// Removes every other window of the session, in index order.
    pub fn remove_other_windows(&self, keep: WindowId) -> StoreResult<Vec<WindowId>> {
        self.mutate(|tree, effects| {
            let session_id = tree.find_window(keep)?;
            let doomed: Vec<WindowId> = tree
                .session(session_id)?
                .windows
                .iter()
                .map(|window| window.id)
                .filter(|id| *id != keep)
                .collect();
            for window_id in &doomed {
                tree.remove_window(session_id, *window_id, effects)?;
            }
            tree.session_mut(session_id)?.active_window = Some(keep);
            Ok(doomed)
        })
    }

    pub fn rename_window(&self, window_id: WindowId, name: &str) -> StoreResult<String> {
        self.mutate(|tree, _| {
            let name = clean_name(name)?;
            let session_id = tree.find_window(window_id)?;
            tree.window_mut(session_id, window_id)?.name = name.clone();
            Ok(name)
        })
    }

    /// Makes the window current in its session; returns its active pane.
    pub fn select_window(&self, window_id: WindowId) -> StoreResult<PaneContext> {
        self.mutate(|tree, _| {
            let session_id = tree.find_window(window_id)?;
            tree.session_mut(session_id)?.active_window = Some(window_id);
            tree.active_context(session_id, window_id)
        })
    }

    /// Splits `target`; returns the new pane.
    pub fn split_pane(&self, target: PaneId, options: SplitOptions) -> StoreResult<PaneContext> {
        self.mutate(|tree, effects| {
            let (session_id, window_id) = tree.find_pane(target)?;
            let window = tree.window_mut(session_id, window_id)?;
            let rect = window
                .layout
                .rect_of(Rect::sized(window.cols, window.rows), target)
                .ok_or_else(|| StoreError::PaneNotFound(target.to_string()))?;
            let extent = match options.direction {
                SplitDirection::Horizontal => rect.cols,
                SplitDirection::Vertical => rect.rows,
            };
            if extent < MIN_SPLIT_EXTENT {
                return Err(StoreError::CannotSplit);
            }

            let available = f32::from(extent - 1);
            let added_share = match options.size {
                Some(SplitSize::Cells(cells)) => f32::from(cells) / available,
                Some(SplitSize::Percent(percent)) => f32::from(percent.min(100)) / 100.0,
                None => 0.5,
            };
            let ratio = if options.before {
                added_share
            } else {
                1.0 - added_share
            };
            let added = tree.allocate_pane();
            let window = tree.window_mut(session_id, window_id)?;
            window
                .layout
                .split(target, added, options.direction, options.before, ratio);
            window.panes.push(Pane {
                id: added,
                index: 0,
                title: String::new(),
                active: false,
                width: 0,
                height: 0,
            });
            relayout(window, &[added], effects);
            if options.select {
                window.set_active_pane(Some(added));
                tree.session_mut(session_id)?.active_window = Some(window_id);
            }
            debug!(target = "session::store", from = %target, pane = %added, "pane split");
            tree.context(session_id, window_id, added)
        })
    }

    pub fn kill_pane(&self, pane_id: PaneId) -> StoreResult<PaneRemoval> {
        self.mutate(|tree, effects| {
            let (session_id, window_id) = tree.find_pane(pane_id)?;
            let window = tree.window_mut(session_id, window_id)?;
            if window.panes.len() == 1 {
                let removal = tree.remove_window(session_id, window_id, effects)?;
                return Ok(PaneRemoval {
                    session_id,
                    window_id,
                    window_removed: true,
                    session_removed: removal.session_removed,
                });
            }

            let position = window
                .pane_position(pane_id)
                .ok_or_else(|| StoreError::PaneNotFound(pane_id.to_string()))?;
            window.layout.remove(pane_id);
            window.panes.remove(position);
            if window.active_pane == Some(pane_id) {
                let fallback = window.panes[position.min(window.panes.len() - 1)].id;
                window.set_active_pane(Some(fallback));
            }
            effects.push(PaneEffect::Remove { pane_id });
            relayout(window, &[], effects);
            Ok(PaneRemoval {
                session_id,
                window_id,
                window_removed: false,
                session_removed: false,
            })
        })
    }

    /// Kills every pane of the window except `keep`, in index order.
    pub fn kill_other_panes(&self, keep: PaneId) -> StoreResult<Vec<PaneId>> {
        self.mutate(|tree, effects| {
            let (session_id, window_id) = tree.find_pane(keep)?;
            let window = tree.window_mut(session_id, window_id)?;
            let doomed: Vec<PaneId> = window
                .panes
                .iter()
                .map(|pane| pane.id)
                .filter(|id| *id != keep)
                .collect();
            for pane_id in &doomed {
                window.layout.remove(*pane_id);
                effects.push(PaneEffect::Remove { pane_id: *pane_id });
            }
            window.panes.retain(|pane| pane.id == keep);
            window.set_active_pane(Some(keep));
            relayout(window, &[], effects);
            Ok(doomed)
        })
    }

    /// Makes the pane active in its window and its window current.
    pub fn select_pane(&self, pane_id: PaneId) -> StoreResult<PaneContext> {
        self.mutate(|tree, _| {
            let (session_id, window_id) = tree.find_pane(pane_id)?;
            tree.window_mut(session_id, window_id)?
                .set_active_pane(Some(pane_id));
            tree.session_mut(session_id)?.active_window = Some(window_id);
            tree.context(session_id, window_id, pane_id)
        })
    }

    /// Selects the geometric neighbour of `pane_id`. Without one the
    /// selection is unchanged.
    pub fn select_pane_direction(&self, pane_id: PaneId, toward: Navigate) -> StoreResult<PaneContext> {
        self.mutate(|tree, _| {
            let (session_id, window_id) = tree.find_pane(pane_id)?;
            let window = tree.window_mut(session_id, window_id)?;
            let area = Rect::sized(window.cols, window.rows);
            let selected = window.layout.neighbor(area, pane_id, toward).unwrap_or(pane_id);
            window.set_active_pane(Some(selected));
            tree.context(session_id, window_id, selected)
        })
    }

    pub fn rename_pane(&self, pane_id: PaneId, title: &str) -> StoreResult<()> {
        self.mutate(|tree, _| {
            let (session_id, window_id) = tree.find_pane(pane_id)?;
            let window = tree.window_mut(session_id, window_id)?;
            if let Some(pane) = window.panes.iter_mut().find(|pane| pane.id == pane_id) {
                pane.title = title.to_string();
            }
            Ok(())
        })
    }

    /// Adjusts the splits around a pane. Axes without an enclosing split in
    /// that direction are left alone.
    pub fn resize_pane(
        &self,
        pane_id: PaneId,
        width: Option<SizeChange>,
        height: Option<SizeChange>,
    ) -> StoreResult<PaneContext> {
        self.mutate(|tree, effects| {
            let (session_id, window_id) = tree.find_pane(pane_id)?;
            let window = tree.window_mut(session_id, window_id)?;
            let area = Rect::sized(window.cols, window.rows);
            let (current_width, current_height) = window
                .pane(pane_id)
                .map(|pane| (pane.width, pane.height))
                .ok_or_else(|| StoreError::PaneNotFound(pane_id.to_string()))?;
            if let Some(change) = width {
                let size = change.apply(current_width);
                window.layout.resize(area, pane_id, SplitDirection::Horizontal, size);
            }
            if let Some(change) = height {
                let size = change.apply(current_height);
                window.layout.resize(area, pane_id, SplitDirection::Vertical, size);
            }
            relayout(window, &[], effects);
            tree.context(session_id, window_id, pane_id)
        })
    }

    /// Exchanges two panes' positions. Within a window each pane keeps its
    /// active flag; across windows the active slot stays where it was.
    pub fn swap_panes(&self, a: PaneId, b: PaneId) -> StoreResult<()> {
        if a == b {
            return self.read(|tree| tree.find_pane(a).map(|_| ()));
        }
        self.mutate(|tree, effects| {
            let (session_a, window_a) = tree.find_pane(a)?;
            let (session_b, window_b) = tree.find_pane(b)?;

            if window_a == window_b {
                let window = tree.window_mut(session_a, window_a)?;
                window.layout.swap(a, b);
                relayout(window, &[], effects);
                return Ok(());
            }

            let pane_a = take_pane(tree.window_mut(session_a, window_a)?, a, b)?;
            let pane_b = take_pane(tree.window_mut(session_b, window_b)?, b, a)?;
            put_pane(tree.window_mut(session_a, window_a)?, pane_b, effects);
            put_pane(tree.window_mut(session_b, window_b)?, pane_a, effects);
            Ok(())
        })
    }

    pub fn resolve_target(&self, spec: &str, caller: &str) -> StoreResult<PaneRef> {
        let target = Target::parse(spec, TargetKind::Pane)?;
        self.read(|tree| {
            let (session, window, pane) = locate(tree, &target, caller)?;
            let pane = pane.ok_or_else(|| StoreError::PaneNotFound(spec.to_string()))?;
            Ok(tree.context(session, window, pane)?.pane_ref())
        })
    }

    pub fn resolve_window(&self, spec: &str, caller: &str) -> StoreResult<WindowRef> {
        let target = Target::parse(spec, TargetKind::Window)?;
        self.read(|tree| {
            let (session_id, window_id, _) = locate(tree, &target, caller)?;
            let window = tree
                .session(session_id)?
                .window(window_id)
                .ok_or_else(|| StoreError::WindowNotFound(spec.to_string()))?;
            Ok(WindowRef {
                session_id,
                window_id,
                index: window.index,
            })
        })
    }

    pub fn resolve_session(&self, spec: &str, caller: &str) -> StoreResult<SessionRef> {
        let target = Target::parse(spec, TargetKind::Session)?;
        self.read(|tree| {
            let session_id = locate_session(tree, &target, caller_location(tree, caller))?;
            let session = tree.session(session_id)?;
            Ok(SessionRef {
                session_id,
                name: session.name.clone(),
            })
        })
    }

    /// Relational snapshot of one pane, copied under the read lock.
    pub fn pane_context(&self, pane_id: PaneId) -> StoreResult<PaneContext> {
        self.read(|tree| tree.pane_context(pane_id))
    }

    /// Active pane of every session's current window.
    pub fn session_contexts(&self) -> Vec<PaneContext> {
        let tree = self.tree.read();
        tree.sessions
            .values()
            .filter_map(|session| {
                let window = session.active_window()?;
                tree.active_context(session.id, window.id).ok()
            })
            .collect()
    }

    /// Active pane of every window, for one session or all of them.
    pub fn window_contexts(&self, session: Option<SessionId>) -> Vec<PaneContext> {
        let tree = self.tree.read();
        tree.sessions
            .values()
            .filter(|candidate| session.is_none_or(|id| candidate.id == id))
            .flat_map(|session| session.windows.iter().map(move |window| (session.id, window.id)))
            .filter_map(|(session_id, window_id)| tree.active_context(session_id, window_id).ok())
            .collect()
    }

    /// Panes in tree order: sessions by id, windows by index, panes by index.
    pub fn pane_contexts(&self, scope: PaneScope) -> Vec<PaneContext> {
        let tree = self.tree.read();
        let mut out = Vec::new();
        for session in tree.sessions.values() {
            if matches!(scope, PaneScope::Session(id) if id != session.id) {
                continue;
            }
            for window in &session.windows {
                if matches!(scope, PaneScope::Window(id) if id != window.id) {
                    continue;
                }
                out.extend(
                    window
                        .panes
                        .iter()
                        .map(|pane| PaneContext::capture(session, window, pane)),
                );
            }
        }
        out
    }

    pub fn all_panes(&self) -> Vec<PaneContext> {
        self.pane_contexts(PaneScope::All)
    }

    /// Ids of every live pane, in pane-store key form.
    pub fn pane_ids(&self) -> HashSet<String> {
        let tree = self.tree.read();
        tree.sessions
            .values()
            .flat_map(|session| session.windows.iter())
            .flat_map(|window| window.panes.iter())
            .map(|pane| pane.id.to_string())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.tree.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session_count() == 0
    }
}

fn take_pane(window: &mut Window, pane_id: PaneId, replacement: PaneId) -> StoreResult<Pane> {
    let position = window
        .pane_position(pane_id)
        .ok_or_else(|| StoreError::PaneNotFound(pane_id.to_string()))?;
    window.layout.replace(pane_id, replacement);
    if window.active_pane == Some(pane_id) {
        window.active_pane = Some(replacement);
    }
    Ok(window.panes.remove(position))
}

fn put_pane(window: &mut Window, mut pane: Pane, effects: &mut Vec<PaneEffect>) {
    pane.active = window.active_pane == Some(pane.id);
    window.panes.push(pane);
    relayout(window, &[], effects);
}

fn caller_location(tree: &SessionTree, caller: &str) -> Option<(SessionId, WindowId, PaneId)> {
    let pane = PaneId::parse(caller)?;
    let (session, window) = tree.find_pane(pane).ok()?;
    Some((session, window, pane))
}

fn locate_session(
    tree: &SessionTree,
    target: &Target,
    caller: Option<(SessionId, WindowId, PaneId)>,
) -> StoreResult<SessionId> {
    if let Some(pane) = target.pane.as_deref().and_then(PaneId::parse) {
        return Ok(tree.find_pane(pane)?.0);
    }
    match target.session.as_deref() {
        Some(spec) => {
            if let Some(id) = SessionId::parse(spec) {
                return tree
                    .sessions
                    .contains_key(&id)
                    .then_some(id)
                    .ok_or_else(|| StoreError::SessionNotFound(spec.to_string()));
            }
            if let Some(session) = tree.sessions.values().find(|session| session.name == spec) {
                return Ok(session.id);
            }
            let mut prefixed = tree
                .sessions
                .values()
                .filter(|session| session.name.starts_with(spec));
            match (prefixed.next(), prefixed.next()) {
                (Some(session), None) => Ok(session.id),
                _ => Err(StoreError::SessionNotFound(spec.to_string())),
            }
        }
        None => {
            if let Some(window) = target.window.as_deref().and_then(WindowId::parse) {
                return tree.find_window(window);
            }
            if let Some((session, _, _)) = caller {
                return Ok(session);
            }
            tree.sessions
                .keys()
                .next()
                .copied()
                .ok_or(StoreError::NoCurrentSession)
        }
    }
}

/// Resolves a target to `(session, window, pane)`. The pane is `None` only
/// when the window has no active pane.
fn locate(
    tree: &SessionTree,
    target: &Target,
    caller: &str,
) -> StoreResult<(SessionId, WindowId, Option<PaneId>)> {
    let caller = caller_location(tree, caller);

    if let Some(pane) = target.pane.as_deref().and_then(PaneId::parse) {
        let (session, window) = tree.find_pane(pane)?;
        return Ok((session, window, Some(pane)));
    }

    let session_id = locate_session(tree, target, caller)?;
    let session = tree.session(session_id)?;
    let relative_to_caller = target.session.is_none()
        && target.window.is_none()
        && caller.is_some_and(|(session, _, _)| session == session_id);

    let window = match target.window.as_deref() {
        Some(spec) => {
            let by_id = WindowId::parse(spec).and_then(|id| session.window(id));
            let by_index = spec
                .parse::<u32>()
                .ok()
                .and_then(|index| session.windows.iter().find(|window| window.index == index));
            let by_name = || session.windows.iter().find(|window| window.name == spec);
            by_id
                .or(by_index)
                .or_else(by_name)
                .ok_or_else(|| StoreError::WindowNotFound(spec.to_string()))?
        }
        None => {
            let current = match caller {
                Some((_, window, _)) if relative_to_caller => Some(window),
                _ => session.active_window,
            };
            current
                .and_then(|id| session.window(id))
                .ok_or_else(|| StoreError::WindowNotFound(session.name.clone()))?
        }
    };

    let pane = match target.pane.as_deref() {
        Some(spec) => {
            let pane = spec
                .parse::<u32>()
                .ok()
                .and_then(|index| window.panes.iter().find(|pane| pane.index == index))
                .ok_or_else(|| StoreError::PaneNotFound(spec.to_string()))?;
            Some(pane.id)
        }
        None => match caller {
            Some((_, caller_window, pane)) if relative_to_caller && caller_window == window.id => {
                Some(pane)
            }
            _ => window.active_pane,
        },
    };
    Ok((session_id, window.id, pane))
}

#[cfg(test)]
mod tests;
