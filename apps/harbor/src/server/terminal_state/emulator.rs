use std::collections::VecDeque;

use super::grid::RowRing;

/// CSI sequences longer than this are abandoned.
pub const MAX_CSI_LEN: usize = 64;
/// OSC strings longer than this are abandoned.
pub const MAX_OSC_LEN: usize = 4096;

const ESC: char = '\x1b';
const BEL: char = '\x07';
const TAB_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Ground,
    Escape,
    EscapeIntermediate,
    Csi,
    Osc,
    OscEscape,
}

/// Minimal VT-style interpreter backing one pane.
///
/// Tracks text and cursor position only. Attributes (SGR) and modes are
/// parsed and discarded. Input may be split at any byte boundary: partial
/// UTF-8 sequences and partial escape sequences are carried to the next
/// [`Emulator::write`].
#[derive(Debug, Clone)]
pub struct Emulator {
    grid: RowRing,
    cursor_row: usize,
    // May equal `cols` when a wrap is pending.
    cursor_col: usize,
    state: ParseState,
    sequence_len: usize,
    params: String,
    pending_utf8: Vec<u8>,
    scrollback: VecDeque<String>,
    scrollback_limit: usize,
}

impl Emulator {
    pub fn new(cols: usize, rows: usize, scrollback_limit: usize) -> Self {
        Self {
            grid: RowRing::new(cols, rows),
            cursor_row: 0,
            cursor_col: 0,
            state: ParseState::Ground,
            sequence_len: 0,
            params: String::new(),
            pending_utf8: Vec::new(),
            scrollback: VecDeque::new(),
            scrollback_limit,
        }
    }

    /// `(cols, rows)`
    pub fn size(&self) -> (usize, usize) {
        (self.grid.cols(), self.grid.rows())
    }

    /// `(row, col)`
    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_col)
    }

    /// Consumes the whole chunk. Malformed input is dropped.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let joined;
        let mut input: &[u8] = if self.pending_utf8.is_empty() {
            bytes
        } else {
            let mut buf = std::mem::take(&mut self.pending_utf8);
            buf.extend_from_slice(bytes);
            joined = buf;
            &joined
        };

        while !input.is_empty() {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    self.process_str(text);
                    break;
                }
                Err(err) => {
                    let (valid, rest) = input.split_at(err.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.process_str(text);
                    }
                    match err.error_len() {
                        Some(invalid) => input = &rest[invalid..],
                        None => {
                            self.pending_utf8.extend_from_slice(rest);
                            break;
                        }
                    }
                }
            }
        }
        bytes.len()
    }

    /// Visible grid: rows right-trimmed, joined by newlines, trailing blank
    /// rows removed.
    pub fn text(&self) -> String {
        let mut lines = self.grid.lines();
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }

    /// Lines that scrolled off the top, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.scrollback.iter().map(String::as_str)
    }

    pub fn history_len(&self) -> usize {
        self.scrollback.len()
    }

    pub fn resize(&mut self, cols: usize, rows: usize) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        let drop_top = (self.cursor_row + 1).saturating_sub(rows);
        for line in self.grid.reshape(cols, rows, drop_top) {
            self.push_history(line);
        }
        self.cursor_row = self.cursor_row.saturating_sub(drop_top).min(rows - 1);
        self.cursor_col = self.cursor_col.min(cols);
        self.reset_parser();
    }

    fn reset_parser(&mut self) {
        self.state = ParseState::Ground;
        self.sequence_len = 0;
        self.params.clear();
    }

    fn process_str(&mut self, text: &str) {
        for ch in text.chars() {
            self.advance(ch);
        }
    }

    fn advance(&mut self, ch: char) {
        match self.state {
            ParseState::Ground => self.ground(ch),
            ParseState::Escape => self.escape(ch),
            ParseState::EscapeIntermediate => {
                self.sequence_len += 1;
                if !('\x20'..='\x2f').contains(&ch) || self.sequence_len > MAX_CSI_LEN {
                    self.reset_parser();
                }
            }
            ParseState::Csi => self.csi(ch),
            ParseState::Osc => match ch {
                BEL => self.reset_parser(),
                ESC => self.state = ParseState::OscEscape,
                _ => {
                    self.sequence_len += 1;
                    if self.sequence_len > MAX_OSC_LEN {
                        self.reset_parser();
                    }
                }
            },
            ParseState::OscEscape => {
                if ch == '\\' {
                    self.reset_parser();
                } else {
                    self.reset_parser();
                    self.state = ParseState::Escape;
                    self.escape(ch);
                }
            }
        }
    }

    fn ground(&mut self, ch: char) {
        match ch {
            ESC => {
                self.state = ParseState::Escape;
                self.sequence_len = 0;
            }
            c if c.is_control() => self.execute(c),
            c => self.print(c),
        }
    }

    fn escape(&mut self, ch: char) {
        match ch {
            '[' => {
                self.state = ParseState::Csi;
                self.sequence_len = 0;
                self.params.clear();
            }
            ']' => {
                self.state = ParseState::Osc;
                self.sequence_len = 0;
            }
            ESC => {}
            '\x20'..='\x2f' => {
                self.state = ParseState::EscapeIntermediate;
                self.sequence_len = 1;
            }
            c => {
                self.reset_parser();
                match c {
                    'D' => self.line_feed(),
                    'E' => self.new_line(),
                    'M' => self.reverse_index(),
                    'c' => self.full_reset(),
                    _ => {}
                }
            }
        }
    }

    fn csi(&mut self, ch: char) {
        self.sequence_len += 1;
        match ch {
            '\x40'..='\x7e' => {
                let params = std::mem::take(&mut self.params);
                self.reset_parser();
                self.dispatch_csi(&params, ch);
            }
            ESC => {
                self.reset_parser();
                self.state = ParseState::Escape;
            }
            '\x18' | '\x1a' => self.reset_parser(),
            c if c.is_control() => self.execute(c),
            c => {
                if c.is_ascii() {
                    self.params.push(c);
                }
                if self.sequence_len > MAX_CSI_LEN {
                    self.reset_parser();
                }
            }
        }
    }

    fn execute(&mut self, ch: char) {
        match ch {
            '\n' | '\x0b' | '\x0c' => self.new_line(),
            '\r' => self.cursor_col = 0,
            '\x08' => {
                self.cursor_col = self.cursor_col.min(self.last_col()).saturating_sub(1);
            }
            '\t' => {
                let next = (self.cursor_col / TAB_WIDTH + 1) * TAB_WIDTH;
                if self.cursor_col < self.last_col() {
                    self.cursor_col = next.min(self.last_col());
                }
            }
            _ => {}
        }
    }

    fn print(&mut self, ch: char) {
        if self.cursor_col >= self.grid.cols() {
            self.new_line();
        }
        self.grid.put(self.cursor_row, self.cursor_col, ch);
        self.cursor_col += 1;
    }

    fn new_line(&mut self) {
        self.cursor_col = 0;
        self.line_feed();
    }

    fn line_feed(&mut self) {
        if self.cursor_row + 1 < self.grid.rows() {
            self.cursor_row += 1;
        } else {
            let line = self.grid.scroll_up();
            self.push_history(line);
        }
    }

    fn reverse_index(&mut self) {
        if self.cursor_row == 0 {
            self.grid.scroll_down();
        } else {
            self.cursor_row -= 1;
        }
    }

    fn push_history(&mut self, line: String) {
        if self.scrollback_limit == 0 {
            return;
        }
        if self.scrollback.len() == self.scrollback_limit {
            self.scrollback.pop_front();
        }
        self.scrollback.push_back(line);
    }

    fn full_reset(&mut self) {
        self.grid.clear_all();
        self.cursor_row = 0;
        self.cursor_col = 0;
    }

    fn last_col(&self) -> usize {
        self.grid.cols() - 1
    }

    fn last_row(&self) -> usize {
        self.grid.rows() - 1
    }

    fn dispatch_csi(&mut self, params: &str, action: char) {
        // Private (`?`, `>`…) and intermediate-carrying sequences only toggle
        // modes this grid does not model.
        if params
            .chars()
            .any(|c| matches!(c, '<'..='?') || ('\x20'..='\x2f').contains(&c))
        {
            return;
        }
        let values: Vec<usize> = params.split(';').map(parse_param).collect();
        let arg = |index: usize| values.get(index).copied().unwrap_or(0);
        let count = |index: usize| arg(index).max(1);

        match action {
            'A' => self.cursor_row = self.cursor_row.saturating_sub(count(0)),
            'B' => self.cursor_row = self.cursor_row.saturating_add(count(0)).min(self.last_row()),
            'C' => self.cursor_col = self.cursor_col.saturating_add(count(0)).min(self.last_col()),
            'D' => {
                self.cursor_col = self
                    .cursor_col
                    .min(self.last_col())
                    .saturating_sub(count(0));
            }
            'G' => self.cursor_col = (count(0) - 1).min(self.last_col()),
            'H' | 'f' => {
                self.cursor_row = (count(0) - 1).min(self.last_row());
                self.cursor_col = (count(1) - 1).min(self.last_col());
            }
            'J' => self.erase_display(arg(0)),
            'K' => self.erase_line(arg(0)),
            _ => {}
        }
    }

    fn erase_display(&mut self, mode: usize) {
        let row = self.cursor_row;
        match mode {
            0 => {
                self.grid.clear_span(row, self.cursor_col, self.grid.cols());
                for below in row + 1..self.grid.rows() {
                    self.grid.clear_row(below);
                }
            }
            1 => {
                for above in 0..row {
                    self.grid.clear_row(above);
                }
                self.grid.clear_span(row, 0, self.cursor_col + 1);
            }
            2 => {
                for any in 0..self.grid.rows() {
                    self.grid.clear_row(any);
                }
            }
            3 => {
                for any in 0..self.grid.rows() {
                    self.grid.clear_row(any);
                }
                self.scrollback.clear();
            }
            _ => {}
        }
    }

    fn erase_line(&mut self, mode: usize) {
        let row = self.cursor_row;
        match mode {
            0 => self.grid.clear_span(row, self.cursor_col, self.grid.cols()),
            1 => self.grid.clear_span(row, 0, self.cursor_col + 1),
            2 => self.grid.clear_row(row),
            _ => {}
        }
    }
}

/// Digits beyond `usize` saturate; anything else reads as the default 0.
fn parse_param(part: &str) -> usize {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return 0;
    }
    part.parse().unwrap_or(usize::MAX)
}
