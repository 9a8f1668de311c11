use serde::Serialize;

use super::model::PaneId;

pub const MIN_RATIO: f32 = 0.1;
pub const MAX_RATIO: f32 = 0.9;

/// `Horizontal` places the children side by side, `Vertical` stacks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigate {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub cols: u16,
    pub rows: u16,
}

impl Rect {
    pub fn sized(cols: u16, rows: u16) -> Self {
        Self {
            x: 0,
            y: 0,
            cols,
            rows,
        }
    }

    fn extent(&self, direction: SplitDirection) -> u16 {
        match direction {
            SplitDirection::Horizontal => self.cols,
            SplitDirection::Vertical => self.rows,
        }
    }

    /// Splits into two children separated by a one-cell border.
    fn split(&self, direction: SplitDirection, ratio: f32) -> (Rect, Rect) {
        let (first, second) = split_extent(self.extent(direction), ratio);
        match direction {
            SplitDirection::Horizontal => (
                Rect { cols: first, ..*self },
                Rect {
                    x: self.x + first + 1,
                    cols: second,
                    ..*self
                },
            ),
            SplitDirection::Vertical => (
                Rect { rows: first, ..*self },
                Rect {
                    y: self.y + first + 1,
                    rows: second,
                    ..*self
                },
            ),
        }
    }
}

fn split_extent(total: u16, ratio: f32) -> (u16, u16) {
    let available = total.saturating_sub(1);
    let upper = available.saturating_sub(1).max(1);
    let first = ((available as f32) * ratio).round() as u16;
    let first = first.clamp(1, upper).min(available);
    (first, available - first)
}

/// Smallest extent that can still be split into two usable panes.
pub const MIN_SPLIT_EXTENT: u16 = 3;

/// Binary split tree. Every leaf is one pane.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutNode {
    Leaf(PaneId),
    Split {
        direction: SplitDirection,
        /// Share of the available extent given to `first`.
        ratio: f32,
        first: Box<LayoutNode>,
        second: Box<LayoutNode>,
    },
}

impl LayoutNode {
    pub fn contains(&self, pane: PaneId) -> bool {
        match self {
            LayoutNode::Leaf(id) => *id == pane,
            LayoutNode::Split { first, second, .. } => first.contains(pane) || second.contains(pane),
        }
    }

    pub fn leaves(&self) -> Vec<PaneId> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<PaneId>) {
        match self {
            LayoutNode::Leaf(id) => out.push(*id),
            LayoutNode::Split { first, second, .. } => {
                first.collect_leaves(out);
                second.collect_leaves(out);
            }
        }
    }

    /// Replaces leaf `target` with a split holding `target` and `added`.
    /// `ratio` is the share of the new first child.
    pub fn split(
        &mut self,
        target: PaneId,
        added: PaneId,
        direction: SplitDirection,
        added_first: bool,
        ratio: f32,
    ) -> bool {
        match self {
            LayoutNode::Leaf(id) if *id == target => {
                let (first, second) = if added_first {
                    (added, target)
                } else {
                    (target, added)
                };
                *self = LayoutNode::Split {
                    direction,
                    ratio: ratio.clamp(MIN_RATIO, MAX_RATIO),
                    first: Box::new(LayoutNode::Leaf(first)),
                    second: Box::new(LayoutNode::Leaf(second)),
                };
                true
            }
            LayoutNode::Leaf(_) => false,
            LayoutNode::Split { first, second, .. } => {
                first.split(target, added, direction, added_first, ratio)
                    || second.split(target, added, direction, added_first, ratio)
            }
        }
    }

    /// Removes leaf `target`, promoting its sibling into the parent's place.
    /// A lone root leaf cannot be removed; the caller drops the window.
    pub fn remove(&mut self, target: PaneId) -> bool {
        let LayoutNode::Split { first, second, .. } = self else {
            return false;
        };
        let promoted = if matches!(**first, LayoutNode::Leaf(id) if id == target) {
            Some(std::mem::replace(&mut **second, LayoutNode::Leaf(target)))
        } else if matches!(**second, LayoutNode::Leaf(id) if id == target) {
            Some(std::mem::replace(&mut **first, LayoutNode::Leaf(target)))
        } else {
            None
        };
        match promoted {
            Some(sibling) => {
                *self = sibling;
                true
            }
            None => first.remove(target) || second.remove(target),
        }
    }

    /// Exchanges the positions of two leaves.
    pub fn swap(&mut self, a: PaneId, b: PaneId) {
        match self {
            LayoutNode::Leaf(id) if *id == a => *id = b,
            LayoutNode::Leaf(id) if *id == b => *id = a,
            LayoutNode::Leaf(_) => {}
            LayoutNode::Split { first, second, .. } => {
                first.swap(a, b);
                second.swap(a, b);
            }
        }
    }

    pub fn replace(&mut self, from: PaneId, to: PaneId) -> bool {
        match self {
            LayoutNode::Leaf(id) if *id == from => {
                *id = to;
                true
            }
            LayoutNode::Leaf(_) => false,
            LayoutNode::Split { first, second, .. } => first.replace(from, to) || second.replace(from, to),
        }
    }

    pub fn geometry(&self, area: Rect) -> Vec<(PaneId, Rect)> {
        let mut out = Vec::new();
        self.collect_geometry(area, &mut out);
        out
    }

    fn collect_geometry(&self, area: Rect, out: &mut Vec<(PaneId, Rect)>) {
        match self {
            LayoutNode::Leaf(id) => out.push((*id, area)),
            LayoutNode::Split {
                direction,
                ratio,
                first,
                second,
            } => {
                let (a, b) = area.split(*direction, *ratio);
                first.collect_geometry(a, out);
                second.collect_geometry(b, out);
            }
        }
    }

    pub fn rect_of(&self, area: Rect, pane: PaneId) -> Option<Rect> {
        self.geometry(area)
            .into_iter()
            .find_map(|(id, rect)| (id == pane).then_some(rect))
    }

    /// Moves the nearest enclosing `direction` split so that `target` gets
    /// `size` cells along that axis, within the ratio bounds. Returns false
    /// when no such split exists.
    pub fn resize(&mut self, area: Rect, target: PaneId, direction: SplitDirection, size: u16) -> bool {
        let LayoutNode::Split {
            direction: split_direction,
            ratio,
            first,
            second,
        } = self
        else {
            return false;
        };
        let in_first = first.contains(target);
        if !in_first && !second.contains(target) {
            return false;
        }
        let (a, b) = area.split(*split_direction, *ratio);
        let handled = if in_first {
            first.resize(a, target, direction, size)
        } else {
            second.resize(b, target, direction, size)
        };
        if handled {
            return true;
        }
        if *split_direction != direction {
            return false;
        }
        let available = area.extent(direction).saturating_sub(1);
        if available < 2 {
            return false;
        }
        let first_size = if in_first {
            size.min(available)
        } else {
            available.saturating_sub(size)
        };
        *ratio = (first_size as f32 / available as f32).clamp(MIN_RATIO, MAX_RATIO);
        true
    }

    /// The closest pane in `toward` that overlaps `pane` on the other axis.
    pub fn neighbor(&self, area: Rect, pane: PaneId, toward: Navigate) -> Option<PaneId> {
        let rects = self.geometry(area);
        let (_, current) = rects.iter().find(|(id, _)| *id == pane)?;
        let overlaps_rows = |r: &Rect| r.y < current.y + current.rows && current.y < r.y + r.rows;
        let overlaps_cols = |r: &Rect| r.x < current.x + current.cols && current.x < r.x + r.cols;

        rects
            .iter()
            .filter(|(id, _)| *id != pane)
            .filter_map(|(id, r)| {
                let gap = match toward {
                    Navigate::Left if r.x + r.cols <= current.x && overlaps_rows(r) => current.x - (r.x + r.cols),
                    Navigate::Right if r.x >= current.x + current.cols && overlaps_rows(r) => r.x - (current.x + current.cols),
                    Navigate::Up if r.y + r.rows <= current.y && overlaps_cols(r) => current.y - (r.y + r.rows),
                    Navigate::Down if r.y >= current.y + current.rows && overlaps_cols(r) => r.y - (current.y + current.rows),
                    _ => return None,
                };
                Some((gap, r.y, r.x, *id))
            })
            .min()
            .map(|(_, _, _, id)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: u32) -> PaneId {
        PaneId(id)
    }

    #[test]
    fn horizontal_split_reserves_a_border_column() {
        let mut layout = LayoutNode::Leaf(p(0));
        assert!(layout.split(p(0), p(1), SplitDirection::Horizontal, false, 0.5));
        let geometry = layout.geometry(Rect::sized(80, 24));
        assert_eq!(
            geometry,
            vec![
                (p(0), Rect { x: 0, y: 0, cols: 40, rows: 24 }),
                (p(1), Rect { x: 41, y: 0, cols: 39, rows: 24 }),
            ]
        );
    }

    #[test]
    fn remove_promotes_sibling_subtree() {
        let mut layout = LayoutNode::Leaf(p(0));
        layout.split(p(0), p(1), SplitDirection::Horizontal, false, 0.5);
        layout.split(p(1), p(2), SplitDirection::Vertical, false, 0.5);
        assert_eq!(layout.leaves(), vec![p(0), p(1), p(2)]);

        assert!(layout.remove(p(0)));
        assert_eq!(layout.leaves(), vec![p(1), p(2)]);
        assert!(matches!(layout, LayoutNode::Split { direction: SplitDirection::Vertical, .. }));

        assert!(layout.remove(p(2)));
        assert_eq!(layout, LayoutNode::Leaf(p(1)));
        assert!(!layout.remove(p(1)));
    }

    #[test]
    fn split_before_places_new_pane_first() {
        let mut layout = LayoutNode::Leaf(p(4));
        layout.split(p(4), p(5), SplitDirection::Vertical, true, 0.5);
        assert_eq!(layout.leaves(), vec![p(5), p(4)]);
    }

    #[test]
    fn resize_moves_nearest_matching_split() {
        let area = Rect::sized(81, 24);
        let mut layout = LayoutNode::Leaf(p(0));
        layout.split(p(0), p(1), SplitDirection::Horizontal, false, 0.5);
        layout.split(p(1), p(2), SplitDirection::Vertical, false, 0.5);

        assert!(layout.resize(area, p(2), SplitDirection::Horizontal, 20));
        assert_eq!(layout.rect_of(area, p(2)).map(|r| r.cols), Some(20));
        assert_eq!(layout.rect_of(area, p(0)).map(|r| r.cols), Some(60));

        assert!(layout.resize(area, p(0), SplitDirection::Horizontal, 1));
        assert_eq!(layout.rect_of(area, p(0)).map(|r| r.cols), Some(8));

        let mut single = LayoutNode::Leaf(p(0));
        assert!(!single.resize(area, p(0), SplitDirection::Vertical, 5));
    }

    #[test]
    fn neighbor_follows_geometry() {
        let area = Rect::sized(80, 24);
        let mut layout = LayoutNode::Leaf(p(0));
        layout.split(p(0), p(1), SplitDirection::Horizontal, false, 0.5);
        layout.split(p(1), p(2), SplitDirection::Vertical, false, 0.5);

        assert_eq!(layout.neighbor(area, p(0), Navigate::Right), Some(p(1)));
        assert_eq!(layout.neighbor(area, p(1), Navigate::Down), Some(p(2)));
        assert_eq!(layout.neighbor(area, p(2), Navigate::Left), Some(p(0)));
        assert_eq!(layout.neighbor(area, p(0), Navigate::Up), None);
    }
}
