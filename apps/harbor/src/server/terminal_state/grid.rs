/// Fixed-size character grid stored as a ring of rows.
///
/// Logical row `r` lives at `storage[(head + r) % rows]`, so scrolling one
/// line rotates `head` and recycles the vacated row instead of shifting every
/// row up.
#[derive(Debug, Clone)]
pub struct RowRing {
    storage: Vec<Vec<char>>,
    head: usize,
    cols: usize,
}

pub const BLANK: char = ' ';

impl RowRing {
    pub fn new(cols: usize, rows: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            storage: vec![vec![BLANK; cols]; rows],
            head: 0,
            cols,
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.storage.len()
    }

    fn physical(&self, row: usize) -> usize {
        (self.head + row) % self.storage.len()
    }

    pub fn row(&self, row: usize) -> &[char] {
        &self.storage[self.physical(row)]
    }

    pub fn put(&mut self, row: usize, col: usize, ch: char) {
        if row >= self.rows() || col >= self.cols {
            return;
        }
        let index = self.physical(row);
        self.storage[index][col] = ch;
    }

    /// Blanks `[from, to)` of a logical row; bounds are clamped.
    pub fn clear_span(&mut self, row: usize, from: usize, to: usize) {
        if row >= self.rows() {
            return;
        }
        let to = to.min(self.cols);
        if from >= to {
            return;
        }
        let index = self.physical(row);
        self.storage[index][from..to].fill(BLANK);
    }

    pub fn clear_row(&mut self, row: usize) {
        self.clear_span(row, 0, self.cols);
    }

    pub fn clear_all(&mut self) {
        for row in &mut self.storage {
            row.fill(BLANK);
        }
        self.head = 0;
    }

    /// Rotates the top row out and returns its text. The recycled row becomes
    /// the new, blank bottom row.
    pub fn scroll_up(&mut self) -> String {
        let top = self.head;
        let line = render_row(&self.storage[top]);
        self.storage[top].fill(BLANK);
        self.head = (self.head + 1) % self.storage.len();
        line
    }

    /// Inverse of [`RowRing::scroll_up`]: the bottom row is discarded and
    /// recycled as a blank top row.
    pub fn scroll_down(&mut self) {
        let rows = self.storage.len();
        self.head = (self.head + rows - 1) % rows;
        let top = self.head;
        self.storage[top].fill(BLANK);
    }

    /// Rows in logical order, each right-trimmed.
    pub fn lines(&self) -> Vec<String> {
        (0..self.rows()).map(|row| render_row(self.row(row))).collect()
    }

    /// Re-linearizes into logical order, drops `drop_top` rows from the top
    /// (returned as text) and fits what remains into `cols` x `rows`.
    pub fn reshape(&mut self, cols: usize, rows: usize, drop_top: usize) -> Vec<String> {
        let cols = cols.max(1);
        let rows = rows.max(1);
        let mut ordered: Vec<Vec<char>> = (0..self.rows())
            .map(|row| self.row(row).to_vec())
            .collect();

        let drop_top = drop_top.min(ordered.len());
        let dropped = ordered
            .drain(..drop_top)
            .map(|row| render_row(&row))
            .collect();

        ordered.truncate(rows);
        for row in &mut ordered {
            row.resize(cols, BLANK);
        }
        while ordered.len() < rows {
            ordered.push(vec![BLANK; cols]);
        }

        self.storage = ordered;
        self.head = 0;
        self.cols = cols;
        dropped
    }
}

fn render_row(row: &[char]) -> String {
    let text: String = row.iter().collect();
    text.trim_end_matches(BLANK).to_string()
}
