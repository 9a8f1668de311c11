//! Terminal content for every pane, keyed by pane id.
//!
//! Locking: `index` (coarse) only answers "which panes exist". Content lives
//! behind each pane's own mutex (fine). The index lock is always released
//! before a pane lock is taken, and the two are never held together.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::server::terminal_state::{Emulator, ReplayBuffer};
use crate::session::{PaneEffect, PaneEffectSink};

#[derive(Debug, Clone, Copy)]
pub struct PaneStoreConfig {
    pub default_cols: usize,
    pub default_rows: usize,
    pub replay_capacity: usize,
    pub scrollback_lines: usize,
}

impl Default for PaneStoreConfig {
    fn default() -> Self {
        Self {
            default_cols: 80,
            default_rows: 24,
            replay_capacity: 256 * 1024,
            scrollback_lines: 2000,
        }
    }
}

#[derive(Debug)]
struct PaneState {
    emulator: Emulator,
    replay: ReplayBuffer,
    // Replay holds bytes the grid has not seen.
    dirty: bool,
    active: bool,
    scrollback_lines: usize,
}

impl PaneState {
    fn new(cols: usize, rows: usize, config: &PaneStoreConfig) -> Self {
        Self {
            emulator: Emulator::new(cols, rows, config.scrollback_lines),
            replay: ReplayBuffer::new(config.replay_capacity),
            dirty: false,
            active: true,
            scrollback_lines: config.scrollback_lines,
        }
    }

    fn feed(&mut self, bytes: &[u8]) {
        self.replay.push(bytes);
        if self.active {
            self.emulator.write(bytes);
        } else {
            self.dirty = true;
        }
    }

    fn replayed(&self) -> Emulator {
        let (cols, rows) = self.emulator.size();
        let mut emulator = Emulator::new(cols, rows, self.scrollback_lines);
        emulator.write(&self.replay.contents());
        emulator
    }

    fn rebuild(&mut self) {
        self.emulator = self.replayed();
        self.dirty = false;
    }

    fn snapshot(&self) -> String {
        if !self.active && self.dirty {
            String::from_utf8_lossy(&self.replay.contents()).into_owned()
        } else {
            self.emulator.text()
        }
    }

    /// Runs `read` against an up-to-date grid without changing the pane's
    /// dirty/active state.
    fn with_current<T>(&self, read: impl FnOnce(&Emulator) -> T) -> T {
        if self.dirty {
            read(&self.replayed())
        } else {
            read(&self.emulator)
        }
    }
}

#[derive(Debug, Default)]
struct PaneIndex {
    states: HashMap<String, Arc<Mutex<PaneState>>>,
    // Ids removed since the last retention sweep; late output for them is
    // dropped instead of resurrecting the pane.
    tombstones: HashSet<String>,
}

#[derive(Debug)]
pub struct PaneStateStore {
    index: RwLock<PaneIndex>,
    config: PaneStoreConfig,
    warned_empty_id: AtomicBool,
    warned_ids: Mutex<HashSet<String>>,
}

impl Default for PaneStateStore {
    fn default() -> Self {
        Self::new(PaneStoreConfig::default())
    }
}

impl PaneStateStore {
    pub fn new(config: PaneStoreConfig) -> Self {
        Self {
            index: RwLock::new(PaneIndex::default()),
            config,
            warned_empty_id: AtomicBool::new(false),
            warned_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &PaneStoreConfig {
        &self.config
    }

    fn lookup(&self, pane_id: &str) -> Option<Arc<Mutex<PaneState>>> {
        self.index.read().states.get(pane_id).cloned()
    }

    /// Returns the pane, creating it at `cols` x `rows` when first seen.
    /// `None` when the id was removed and not yet swept.
    fn get_or_create(
        &self,
        pane_id: &str,
        cols: usize,
        rows: usize,
        revive: bool,
    ) -> Option<(Arc<Mutex<PaneState>>, bool)> {
        {
            let index = self.index.read();
            if let Some(state) = index.states.get(pane_id) {
                return Some((state.clone(), false));
            }
            if !revive && index.tombstones.contains(pane_id) {
                return None;
            }
        }

        let mut index = self.index.write();
        if let Some(state) = index.states.get(pane_id) {
            return Some((state.clone(), false));
        }
        if revive {
            index.tombstones.remove(pane_id);
        } else if index.tombstones.contains(pane_id) {
            return None;
        }
        let state = Arc::new(Mutex::new(PaneState::new(cols, rows, &self.config)));
        index.states.insert(pane_id.to_string(), state.clone());
        trace!(target = "server::panes", pane_id, cols, rows, "pane state created");
        Some((state, true))
    }

    /// Creates or resizes the pane. A removed id is brought back.
    pub fn ensure_pane(&self, pane_id: &str, cols: usize, rows: usize) {
        self.ensure(pane_id, cols, rows, true);
    }

    fn ensure(&self, pane_id: &str, cols: usize, rows: usize, revive: bool) {
        if pane_id.is_empty() {
            self.warn_empty_id("ensure");
            return;
        }
        let Some((state, created)) = self.get_or_create(pane_id, cols, rows, revive) else {
            return;
        };
        if !created {
            let mut state = state.lock();
            if state.emulator.size() != (cols.max(1), rows.max(1)) {
                state.emulator.resize(cols, rows);
            }
        }
    }

    /// Applies output to a pane. Unknown ids are created lazily at the
    /// default size; empty and removed ids are dropped.
    pub fn feed(&self, pane_id: &str, bytes: &[u8]) {
        if pane_id.is_empty() {
            self.warn_empty_id("feed");
            return;
        }
        let created = self.get_or_create(
            pane_id,
            self.config.default_cols,
            self.config.default_rows,
            false,
        );
        let Some((state, _)) = created else {
            self.warn_removed_id(pane_id, bytes.len());
            return;
        };
        state.lock().feed(bytes);
    }

    pub fn snapshot(&self, pane_id: &str) -> Option<String> {
        let state = self.lookup(pane_id)?;
        let state = state.lock();
        Some(state.snapshot())
    }

    /// Visible text, optionally preceded by scrollback.
    pub fn capture(&self, pane_id: &str, history_lines: Option<usize>) -> Option<String> {
        let state = self.lookup(pane_id)?;
        let state = state.lock();
        Some(state.with_current(|emulator| {
            let text = emulator.text();
            let Some(limit) = history_lines else {
                return text;
            };
            let skip = emulator.history_len().saturating_sub(limit);
            let mut lines: Vec<&str> = emulator.history().skip(skip).collect();
            if lines.is_empty() {
                return text;
            }
            lines.push(&text);
            lines.join("\n")
        }))
    }

    /// `(row, col)`
    pub fn cursor(&self, pane_id: &str) -> Option<(usize, usize)> {
        let state = self.lookup(pane_id)?;
        let state = state.lock();
        Some(state.with_current(Emulator::cursor))
    }

    /// `(cols, rows)`
    pub fn size(&self, pane_id: &str) -> Option<(usize, usize)> {
        let state = self.lookup(pane_id)?;
        let size = state.lock().emulator.size();
        Some(size)
    }

    pub fn resize_pane(&self, pane_id: &str, cols: usize, rows: usize) -> bool {
        let Some(state) = self.lookup(pane_id) else {
            return false;
        };
        state.lock().emulator.resize(cols, rows);
        true
    }

    pub fn remove_pane(&self, pane_id: &str) -> bool {
        let mut index = self.index.write();
        index.tombstones.insert(pane_id.to_string());
        let removed = index.states.remove(pane_id).is_some();
        if removed {
            debug!(target = "server::panes", pane_id, "pane state removed");
        }
        removed
    }

    /// Drops every pane not in `alive`. Returns the removed ids, sorted.
    pub fn retain_panes(&self, alive: &HashSet<String>) -> Vec<String> {
        let mut removed = Vec::new();
        {
            let mut index = self.index.write();
            index.states.retain(|id, _| {
                let keep = alive.contains(id);
                if !keep {
                    removed.push(id.clone());
                }
                keep
            });
            index.tombstones = removed.iter().cloned().collect();
        }
        {
            let mut warned = self.warned_ids.lock();
            warned.retain(|id| removed.contains(id));
        }
        removed.sort();
        if !removed.is_empty() {
            debug!(target = "server::panes", removed = removed.len(), "retention sweep");
        }
        removed
    }

    /// Marks exactly `active` as visible. Newly visible panes with output
    /// they have not emulated yet are rebuilt from replay before returning.
    pub fn set_active_panes(&self, active: &HashSet<String>) {
        let states: Vec<(String, Arc<Mutex<PaneState>>)> = self
            .index
            .read()
            .states
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();

        for (id, state) in states {
            let mut state = state.lock();
            let now_active = active.contains(&id);
            if now_active && !state.active && state.dirty {
                state.rebuild();
                trace!(target = "server::panes", pane_id = %id, "rebuilt from replay");
            }
            state.active = now_active;
        }
    }

    pub fn is_active(&self, pane_id: &str) -> Option<bool> {
        let state = self.lookup(pane_id)?;
        let active = state.lock().active;
        Some(active)
    }

    pub fn is_dirty(&self, pane_id: &str) -> Option<bool> {
        let state = self.lookup(pane_id)?;
        let dirty = state.lock().dirty;
        Some(dirty)
    }

    pub fn contains(&self, pane_id: &str) -> bool {
        self.index.read().states.contains_key(pane_id)
    }

    pub fn pane_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.read().states.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.index.read().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn warn_empty_id(&self, operation: &str) {
        if !self.warned_empty_id.swap(true, Ordering::Relaxed) {
            warn!(target = "server::panes", operation, "ignoring output for empty pane id");
        }
    }

    fn warn_removed_id(&self, pane_id: &str, bytes: usize) {
        if self.warned_ids.lock().insert(pane_id.to_string()) {
            warn!(target = "server::panes", pane_id, bytes, "dropping output for removed pane");
        }
    }
}

impl PaneEffectSink for PaneStateStore {
    fn apply(&self, effect: &PaneEffect) {
        match effect {
            // Pane ids are never reused, so a tombstone here means the kill
            // was applied first and this Ensure is stale.
            PaneEffect::Ensure { pane_id, cols, rows } => {
                self.ensure(&pane_id.to_string(), *cols as usize, *rows as usize, false)
            }
            PaneEffect::Resize { pane_id, cols, rows } => {
                self.resize_pane(&pane_id.to_string(), *cols as usize, *rows as usize);
            }
            PaneEffect::Remove { pane_id } => {
                self.remove_pane(&pane_id.to_string());
            }
        }
    }
}
