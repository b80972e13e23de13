//! Growable node arena used while building.
//!
//! Backed by `Vec<u32>` so every record stays 4-byte aligned for the typed
//! views in the parent module. New capacity is zero-filled; a slot that was
//! never written reads as descendant count zero, which the builder's
//! leaf snapshot relies on to skip holes in sparsely-added item ids.

use std::ops::Range;

use super::{NodeAccess, NodeLayout, NodeMut, NodeRef};

/// Growth factor applied when the table runs out of slots.
const REALLOCATION_FACTOR: f64 = 1.5;

pub struct NodeArena {
    words: Vec<u32>,
    layout: NodeLayout,
    /// Allocated capacity, in node slots.
    capacity: usize,
}

impl NodeArena {
    pub fn new(layout: NodeLayout) -> Self {
        Self {
            words: Vec::new(),
            layout,
            capacity: 0,
        }
    }

    /// Pre-sized arena for callers that know roughly how many nodes to
    /// expect.
    pub fn with_capacity(layout: NodeLayout, nodes: usize) -> Self {
        let mut arena = Self::new(layout);
        if nodes > 0 {
            arena.grow_to(nodes);
        }
        arena
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Make room for at least `nodes` slots, growing geometrically.
    pub fn ensure(&mut self, nodes: usize) {
        if nodes > self.capacity {
            let target = nodes.max(((self.capacity + 1) as f64 * REALLOCATION_FACTOR) as usize);
            self.grow_to(target);
        }
    }

    fn grow_to(&mut self, nodes: usize) {
        self.words.resize(nodes * self.layout.words_per_node(), 0);
        self.capacity = nodes;
    }

    pub fn node_mut(&mut self, id: u32) -> NodeMut<'_> {
        let range = self.byte_range(id);
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        NodeMut::new(&mut bytes[range], self.layout)
    }

    /// Byte-copy one full record to another slot.
    pub fn copy_node(&mut self, dst: u32, src: u32) {
        let words = self.layout.words_per_node();
        let src_start = src as usize * words;
        let dst_start = dst as usize * words;
        assert!(
            src_start + words <= self.words.len() && dst_start + words <= self.words.len(),
            "node copy out of bounds: {src} -> {dst}",
        );
        self.words.copy_within(src_start..src_start + words, dst_start);
    }

    /// The first `n_nodes` records as raw bytes — the persisted image.
    pub fn bytes(&self, n_nodes: u32) -> &[u8] {
        let bytes: &[u8] = bytemuck::cast_slice(&self.words);
        &bytes[..n_nodes as usize * self.layout.node_size()]
    }

    fn byte_range(&self, id: u32) -> Range<usize> {
        assert!(
            (id as usize) < self.capacity,
            "node id {id} out of bounds (capacity {})",
            self.capacity,
        );
        let start = id as usize * self.layout.node_size();
        start..start + self.layout.node_size()
    }
}

impl NodeAccess for NodeArena {
    fn layout(&self) -> NodeLayout {
        self.layout
    }

    fn node(&self, id: u32) -> NodeRef<'_> {
        let range = self.byte_range(id);
        let bytes: &[u8] = bytemuck::cast_slice(&self.words);
        NodeRef::new(&bytes[range], self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slots_read_as_empty() {
        let layout = NodeLayout::angular(4);
        let mut arena = NodeArena::new(layout);
        arena.ensure(8);
        for id in 0..8 {
            assert_eq!(arena.node(id).descendant_count(), 0);
        }
    }

    #[test]
    fn ensure_grows_geometrically() {
        let layout = NodeLayout::angular(4);
        let mut arena = NodeArena::new(layout);
        arena.ensure(1);
        let first = arena.capacity();
        arena.ensure(first + 1);
        assert!(arena.capacity() >= ((first + 1) as f64 * 1.5) as usize);
    }

    #[test]
    fn copy_node_duplicates_records() {
        let layout = NodeLayout::angular(2);
        let mut arena = NodeArena::with_capacity(layout, 4);
        {
            let mut node = arena.node_mut(1);
            node.set_descendant_count(1);
            node.set_vector(&[3.0, 4.0]);
        }
        arena.copy_node(3, 1);
        assert_eq!(arena.node(3).vector(), &[3.0, 4.0]);
        assert_eq!(arena.node(3).descendant_count(), 1);
    }
}
