//! Scratch state of the graph searches.

use std::{cmp::Ordering, collections::BinaryHeap, collections::HashMap};

use bitflags::bitflags;
use glam::Vec3;

use crate::poly_id::PolyId;

/// A 1-based index into a [`NodePool`]. 0 means no node.
pub(crate) type NodeIndex = usize;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct NodeFlags: u8 {
        const OPEN = 1 << 0;
        const CLOSED = 1 << 1;
        /// The parent is not adjacent. Found through a shortcut of the any-angle search.
        const PARENT_DETACHED = 1 << 2;
    }
}

/// A visited polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Node {
    /// The position the polygon is entered at.
    pub(crate) pos: Vec3,
    /// Cost from the start.
    pub(crate) cost: f32,
    /// Cost from the start plus the heuristic.
    pub(crate) total: f32,
    /// The node this one was reached from, 0 for none.
    pub(crate) parent: NodeIndex,
    /// Searches may visit a polygon more than once with different states.
    pub(crate) state: u8,
    pub(crate) flags: NodeFlags,
    pub(crate) id: PolyId,
}

/// Arena of search nodes with an id lookup.
#[derive(Debug, Clone)]
pub(crate) struct NodePool {
    nodes: Vec<Node>,
    lookup: HashMap<(PolyId, u8), NodeIndex>,
    max_nodes: usize,
}

impl NodePool {
    pub(crate) fn new(max_nodes: usize) -> Self {
        Self {
            nodes: Vec::new(),
            lookup: HashMap::new(),
            max_nodes,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.lookup.clear();
    }

    pub(crate) fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// The node of `id` in `state`, allocating a fresh one if needed.
    /// Returns `None` when the pool is full.
    pub(crate) fn get_node(&mut self, id: PolyId, state: u8) -> Option<NodeIndex> {
        if let Some(index) = self.lookup.get(&(id, state)) {
            return Some(*index);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }
        self.nodes.push(Node {
            pos: Vec3::ZERO,
            cost: 0.0,
            total: 0.0,
            parent: 0,
            state,
            flags: NodeFlags::empty(),
            id,
        });
        let index = self.nodes.len();
        self.lookup.insert((id, state), index);
        Some(index)
    }

    /// The node of `id` in `state`, if one was allocated.
    pub(crate) fn find_node(&self, id: PolyId, state: u8) -> Option<NodeIndex> {
        self.lookup.get(&(id, state)).copied()
    }

    /// All nodes of `id`, whatever their state.
    pub(crate) fn find_nodes(&self, id: PolyId) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.id == id)
            .map(|(i, _)| i + 1)
    }

    #[inline]
    pub(crate) fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index - 1]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index - 1]
    }

    /// The parent of a node, if any.
    #[inline]
    pub(crate) fn parent(&self, index: NodeIndex) -> Option<NodeIndex> {
        match self.node(index).parent {
            0 => None,
            parent => Some(parent),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenEntry {
    total: f32,
    node: NodeIndex,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    // Reversed, so the max-heap pops the cheapest node. Ties go to the older node.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Priority queue of open nodes, cheapest total first.
///
/// Updating a node pushes it again. Entries that no longer match their node are skipped when popped.
#[derive(Debug, Clone, Default)]
pub(crate) struct OpenList {
    heap: BinaryHeap<OpenEntry>,
}

impl OpenList {
    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    pub(crate) fn push(&mut self, node: NodeIndex, total: f32) {
        self.heap.push(OpenEntry { total, node });
    }

    /// Pops the cheapest open node.
    pub(crate) fn pop(&mut self, pool: &NodePool) -> Option<NodeIndex> {
        while let Some(entry) = self.heap.pop() {
            let node = pool.node(entry.node);
            if node.flags.contains(NodeFlags::OPEN) && node.total == entry.total {
                return Some(entry.node);
            }
        }
        None
    }

    /// Returns `true` if no open node is left. Drops stale entries from the top.
    pub(crate) fn is_empty(&mut self, pool: &NodePool) -> bool {
        while let Some(entry) = self.heap.peek() {
            let node = pool.node(entry.node);
            if node.flags.contains(NodeFlags::OPEN) && node.total == entry.total {
                return false;
            }
            self.heap.pop();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_are_one_based_and_capped() {
        let mut pool = NodePool::new(2);
        let a = pool.get_node(PolyId::from_bits(5), 0).unwrap();
        let b = pool.get_node(PolyId::from_bits(5), 1).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(pool.get_node(PolyId::from_bits(5), 0), Some(1));
        assert_eq!(pool.get_node(PolyId::from_bits(6), 0), None);
        assert_eq!(pool.find_nodes(PolyId::from_bits(5)).count(), 2);
        assert_eq!(pool.parent(a), None);
        pool.node_mut(b).parent = a;
        assert_eq!(pool.parent(b), Some(a));
    }

    #[test]
    fn open_list_skips_stale_entries() {
        let mut pool = NodePool::new(8);
        let mut open = OpenList::default();
        let a = pool.get_node(PolyId::from_bits(1), 0).unwrap();
        let b = pool.get_node(PolyId::from_bits(2), 0).unwrap();
        for (node, total) in [(a, 5.0), (b, 3.0)] {
            let n = pool.node_mut(node);
            n.total = total;
            n.flags = NodeFlags::OPEN;
            open.push(node, total);
        }
        // Cheaper path to `a` found.
        pool.node_mut(a).total = 1.0;
        open.push(a, 1.0);

        assert_eq!(open.pop(&pool), Some(a));
        pool.node_mut(a).flags = NodeFlags::CLOSED;
        assert!(!open.is_empty(&pool));
        assert_eq!(open.pop(&pool), Some(b));
        pool.node_mut(b).flags = NodeFlags::CLOSED;
        // Only the outdated entry of `a` is left.
        assert!(open.is_empty(&pool));
        assert_eq!(open.pop(&pool), None);
    }
}
