//! `#{name}` format strings, plus `#{?name,then,else}` conditionals and `##`
//! for a literal `#`. Unknown names expand to nothing.

use crate::session::PaneContext;

pub const NEW_SESSION_FORMAT: &str = "#{session_name}:";
pub const NEW_WINDOW_FORMAT: &str = "#{session_name}:#{window_index}";
pub const NEW_PANE_FORMAT: &str = "#{session_name}:#{window_index}.#{pane_index}";
pub const LIST_SESSIONS_FORMAT: &str =
    "#{session_name}: #{session_windows} windows (created #{session_created_string})";
pub const LIST_WINDOWS_FORMAT: &str =
    "#{window_index}: #{window_name}#{window_flags} (#{window_panes} panes) [#{window_width}x#{window_height}]";
pub const LIST_PANES_FORMAT: &str =
    "#{pane_index}: [#{pane_width}x#{pane_height}] #{pane_id}#{?pane_active, (active),}";
pub const DISPLAY_FORMAT: &str = "[#{session_name}] #{window_index}:#{window_name}, current pane #{pane_index}";

/// Variables available to a format: one pane and, when known, its cursor.
pub struct FormatVars<'a> {
    pub pane: &'a PaneContext,
    /// `(row, col)` as reported by the pane state store.
    pub cursor: Option<(usize, usize)>,
}

impl<'a> FormatVars<'a> {
    pub fn new(pane: &'a PaneContext) -> Self {
        Self { pane, cursor: None }
    }

    pub fn with_cursor(mut self, cursor: Option<(usize, usize)>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        let pane = self.pane;
        let flag = |value: bool| if value { "1" } else { "0" }.to_string();
        let value = match name {
            "session_name" => pane.session_name.clone(),
            "session_id" => pane.session_id.to_string(),
            "session_windows" => pane.session_windows.to_string(),
            "session_created" => pane.session_created.timestamp().to_string(),
            "session_created_string" => pane.session_created.format("%a %b %e %H:%M:%S %Y").to_string(),
            "session_idle" => flag(pane.session_idle),
            "session_path" => pane
                .workspace
                .as_ref()
                .map(|workspace| workspace.root.display().to_string())?,
            "window_id" => pane.window_id.to_string(),
            "window_index" => pane.window_index.to_string(),
            "window_name" => pane.window_name.clone(),
            "window_active" => flag(pane.window_active),
            "window_flags" => if pane.window_active { "*" } else { "" }.to_string(),
            "window_panes" => pane.window_panes.to_string(),
            "window_width" => pane.window_width.to_string(),
            "window_height" => pane.window_height.to_string(),
            "pane_id" => pane.pane_id.to_string(),
            "pane_index" => pane.pane_index.to_string(),
            "pane_title" => pane.pane_title.clone(),
            "pane_active" => flag(pane.pane_active),
            "pane_width" => pane.pane_width.to_string(),
            "pane_height" => pane.pane_height.to_string(),
            "cursor_x" => self.cursor.map(|(_, col)| col)?.to_string(),
            "cursor_y" => self.cursor.map(|(row, _)| row)?.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

pub fn expand(template: &str, vars: &FormatVars<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(at) = rest.find('#') {
        out.push_str(&rest[..at]);
        let tail = &rest[at + 1..];
        if let Some(after) = tail.strip_prefix('#') {
            out.push('#');
            rest = after;
        } else if let Some(body_start) = tail.strip_prefix('{') {
            match closing_brace(body_start) {
                Some(end) => {
                    out.push_str(&expand_item(&body_start[..end], vars));
                    rest = &body_start[end + 1..];
                }
                None => {
                    out.push_str(&rest[at..]);
                    rest = "";
                }
            }
        } else {
            out.push('#');
            rest = tail;
        }
    }
    out.push_str(rest);
    out
}

fn expand_item(body: &str, vars: &FormatVars<'_>) -> String {
    let Some(conditional) = body.strip_prefix('?') else {
        return vars.lookup(body).unwrap_or_default();
    };
    let mut parts = split_top_level(conditional).into_iter();
    let condition = parts.next().unwrap_or_default();
    let then = parts.next().unwrap_or_default();
    let otherwise = parts.next().unwrap_or_default();
    let truthy = vars
        .lookup(condition)
        .is_some_and(|value| !value.is_empty() && value != "0");
    expand(if truthy { then } else { otherwise }, vars)
}

/// Offset of the `}` matching an already-consumed `#{`.
fn closing_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, ch) in text.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(offset),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (offset, ch) in text.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 && parts.len() < 2 => {
                parts.push(&text[start..offset]);
                start = offset + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
