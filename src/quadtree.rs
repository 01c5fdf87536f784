//! Region quadtree over normalized map coordinates.
//!
//! Answers "which points lie in this rectangle" in sub-linear time. Entries
//! are lightweight (id plus normalized position); payloads stay in the
//! region cache. Single-threaded use only: mutation during an active query
//! is not supported, and `clear` resets whole-tree state.

use crate::types::EntityId;
use geo::{Coord, Intersects, Rect, coord};
use smallvec::SmallVec;

/// A lightweight index entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub id: EntityId,
    /// Position in normalized unit-square coordinates.
    pub pos: Coord<f64>,
}

impl IndexEntry {
    pub fn new(id: EntityId, pos: Coord<f64>) -> Self {
        Self { id, pos }
    }
}

/// Region quadtree with a leaf capacity and a maximum depth.
///
/// A leaf holding more than `capacity` points splits into four equal
/// quadrants unless it is already at `max_depth`, which bounds recursion on
/// coincident points.
#[derive(Debug)]
pub struct Quadtree {
    root: Node,
    capacity: usize,
    max_depth: u8,
    len: usize,
}

#[derive(Debug)]
struct Node {
    bounds: Rect<f64>,
    depth: u8,
    entries: SmallVec<[IndexEntry; 8]>,
    children: Option<Box<[Node; 4]>>,
}

impl Quadtree {
    /// Create a quadtree over the given root bounds.
    pub fn new(bounds: Rect<f64>, capacity: usize, max_depth: u8) -> Self {
        Self {
            root: Node::new(bounds, 0),
            capacity: capacity.max(1),
            max_depth,
            len: 0,
        }
    }

    /// Create a quadtree over the normalized unit square.
    pub fn unit(capacity: usize, max_depth: u8) -> Self {
        Self::new(crate::projection::unit_rect(), capacity, max_depth)
    }

    /// Insert an entry. Returns `false` if it falls outside the root bounds.
    pub fn insert(&mut self, entry: IndexEntry) -> bool {
        if !contains(&self.root.bounds, entry.pos) {
            return false;
        }
        self.root.insert(entry, self.capacity, self.max_depth);
        self.len += 1;
        true
    }

    /// Collect all entries whose position lies within `rect` (closed bounds).
    pub fn query(&self, rect: &Rect<f64>) -> Vec<IndexEntry> {
        let mut results = Vec::new();
        self.root.query(rect, &mut results);
        results
    }

    /// `query` into a caller-provided buffer, appending matches.
    pub fn query_into(&self, rect: &Rect<f64>, results: &mut Vec<IndexEntry>) {
        self.root.query(rect, results);
    }

    /// Drop every entry and child node, keeping the root bounds.
    pub fn clear(&mut self) {
        self.root = Node::new(self.root.bounds, 0);
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Node {
    fn new(bounds: Rect<f64>, depth: u8) -> Self {
        Self {
            bounds,
            depth,
            entries: SmallVec::new(),
            children: None,
        }
    }

    fn insert(&mut self, entry: IndexEntry, capacity: usize, max_depth: u8) {
        if let Some(children) = &mut self.children {
            for child in children.iter_mut() {
                if contains(&child.bounds, entry.pos) {
                    child.insert(entry, capacity, max_depth);
                    return;
                }
            }
            // Quadrants tile the parent with closed bounds, so a contained
            // point always lands in one of them; unreachable in practice.
            self.entries.push(entry);
            return;
        }

        self.entries.push(entry);

        if self.entries.len() > capacity && self.depth < max_depth {
            self.subdivide();
            let entries = std::mem::take(&mut self.entries);
            let children = self.children.as_mut().unwrap();
            for entry in entries {
                // First accepting quadrant keeps the point; order is fixed
                // NW, NE, SW, SE so queries stay reproducible.
                for child in children.iter_mut() {
                    if contains(&child.bounds, entry.pos) {
                        child.insert(entry, capacity, max_depth);
                        break;
                    }
                }
            }
        }
    }

    fn subdivide(&mut self) {
        let min = self.bounds.min();
        let max = self.bounds.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;
        let depth = self.depth + 1;

        // Normalized y grows southward, so the smaller-y half is the north.
        let nw = Node::new(
            Rect::new(coord! { x: min.x, y: min.y }, coord! { x: mid_x, y: mid_y }),
            depth,
        );
        let ne = Node::new(
            Rect::new(coord! { x: mid_x, y: min.y }, coord! { x: max.x, y: mid_y }),
            depth,
        );
        let sw = Node::new(
            Rect::new(coord! { x: min.x, y: mid_y }, coord! { x: mid_x, y: max.y }),
            depth,
        );
        let se = Node::new(
            Rect::new(coord! { x: mid_x, y: mid_y }, coord! { x: max.x, y: max.y }),
            depth,
        );

        self.children = Some(Box::new([nw, ne, sw, se]));
    }

    fn query(&self, rect: &Rect<f64>, results: &mut Vec<IndexEntry>) {
        if !self.bounds.intersects(rect) {
            return;
        }

        for entry in &self.entries {
            if contains(rect, entry.pos) {
                results.push(*entry);
            }
        }

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(rect, results);
            }
        }
    }
}

/// Closed containment check; a point on an edge counts as inside.
fn contains(rect: &Rect<f64>, pos: Coord<f64>) -> bool {
    pos.x >= rect.min().x && pos.x <= rect.max().x && pos.y >= rect.min().y && pos.y <= rect.max().y
}
