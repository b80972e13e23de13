//! Fixed-stride node storage.
//!
//! Every node in an index occupies exactly `node_size` bytes, fixed per
//! index instance from the vector length. A record is one of three variants
//! distinguished solely by its descendant count — there is no discriminant
//! tag:
//!
//! - **leaf** (`descendant_count == 1`): holds one data vector;
//! - **internal** (`1 < count <= max_children`): the space that would hold a
//!   vector is packed with child ids instead;
//! - **split** (`count > max_children`): holds the split hyperplane normal
//!   in the vector field and exactly two child ids.
//!
//! The first child slot doubles as the cached self-dot-product of a leaf
//! (`descendant_count == 1`), read through [`NodeRef::norm`]. That overlay is
//! what keeps the record at `12 + 4f` bytes and is preserved bit-for-bit so
//! index files stay byte-compatible with the reference layout.
//!
//! Unlike the reference, nothing here casts raw pointers: nodes are
//! length-checked views over a 4-byte-aligned arena or a mapped file, and
//! the overlay is exposed through typed accessors chosen by descendant
//! count.

pub mod arena;

pub use arena::NodeArena;

use smallvec::SmallVec;

/// Byte width of an index/id field (`u32`).
pub const INDEX_WIDTH: usize = 4;

/// Byte width of a vector component (`f32`).
pub const VALUE_WIDTH: usize = 4;

/// Offset of the children/norm region inside a record.
pub(crate) const CHILDREN_OFFSET: usize = 4;

/// Per-index record geometry.
///
/// Derived once from the vector length at construction and never
/// recalculated. `max_children` is the number of child ids that fit into
/// everything after the descendant-count field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeLayout {
    vector_length: usize,
    vector_offset: usize,
    node_size: usize,
    max_children: usize,
}

impl NodeLayout {
    /// Layout for angular nodes: count, two child slots, vector.
    pub fn angular(vector_length: usize) -> Self {
        Self::with_vector_offset(vector_length, CHILDREN_OFFSET + 2 * INDEX_WIDTH)
    }

    /// Layout for dot-product nodes: one extra scalar slot between the
    /// child pair and the vector.
    pub fn dot_product(vector_length: usize) -> Self {
        Self::with_vector_offset(vector_length, CHILDREN_OFFSET + 2 * INDEX_WIDTH + VALUE_WIDTH)
    }

    fn with_vector_offset(vector_length: usize, vector_offset: usize) -> Self {
        let node_size = vector_offset + vector_length * VALUE_WIDTH;
        Self {
            vector_length,
            vector_offset,
            node_size,
            max_children: (node_size - CHILDREN_OFFSET) / INDEX_WIDTH,
        }
    }

    pub fn vector_length(&self) -> usize {
        self.vector_length
    }

    pub fn node_size(&self) -> usize {
        self.node_size
    }

    pub fn max_children(&self) -> usize {
        self.max_children
    }

    pub(crate) fn words_per_node(&self) -> usize {
        self.node_size / 4
    }
}

/// Read access to a table of fixed-stride nodes.
///
/// Implemented by the growable build-time arena and by the read-only mapped
/// file, so construction and query code share one view of the table.
pub trait NodeAccess {
    fn layout(&self) -> NodeLayout;

    /// View of the node at `id`. Panics if `id` is out of bounds.
    fn node(&self, id: u32) -> NodeRef<'_>;
}

/// Immutable view of one node record.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    bytes: &'a [u8],
    layout: NodeLayout,
}

impl<'a> NodeRef<'a> {
    pub(crate) fn new(bytes: &'a [u8], layout: NodeLayout) -> Self {
        debug_assert_eq!(bytes.len(), layout.node_size());
        Self { bytes, layout }
    }

    pub fn descendant_count(&self) -> u32 {
        bytemuck::pod_read_unaligned(&self.bytes[..4])
    }

    /// A leaf holds a user-supplied item vector.
    pub fn is_leaf(&self) -> bool {
        self.descendant_count() == 1
    }

    /// Cached self-dot-product of a leaf; shares storage with the first
    /// child slot. Zero means "not cached" — a genuinely zero norm is
    /// indistinguishable and gets recomputed by the metric.
    pub fn norm(&self) -> f32 {
        bytemuck::pod_read_unaligned(&self.bytes[CHILDREN_OFFSET..CHILDREN_OFFSET + 4])
    }

    /// Child ids of an internal node; the length is the descendant count,
    /// clamped to the slot capacity.
    pub fn children(&self) -> &'a [u32] {
        let len = (self.descendant_count() as usize).min(self.layout.max_children);
        bytemuck::cast_slice(&self.bytes[CHILDREN_OFFSET..CHILDREN_OFFSET + len * INDEX_WIDTH])
    }

    /// The two child slots of a split node, as raw ids.
    pub fn split_children(&self) -> [u32; 2] {
        let slots: &[u32] =
            bytemuck::cast_slice(&self.bytes[CHILDREN_OFFSET..CHILDREN_OFFSET + 2 * INDEX_WIDTH]);
        [slots[0], slots[1]]
    }

    pub fn vector(&self) -> &'a [f32] {
        let start = self.layout.vector_offset;
        bytemuck::cast_slice(&self.bytes[start..start + self.layout.vector_length * VALUE_WIDTH])
    }

    /// Extra per-vector scalar used by the dot-product metric.
    pub fn dot_factor(&self) -> f32 {
        debug_assert!(self.layout.vector_offset > CHILDREN_OFFSET + 2 * INDEX_WIDTH);
        let start = self.layout.vector_offset - VALUE_WIDTH;
        bytemuck::pod_read_unaligned(&self.bytes[start..start + VALUE_WIDTH])
    }

    pub(crate) fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Mutable view of one node record.
pub struct NodeMut<'a> {
    bytes: &'a mut [u8],
    layout: NodeLayout,
}

impl<'a> NodeMut<'a> {
    pub(crate) fn new(bytes: &'a mut [u8], layout: NodeLayout) -> Self {
        debug_assert_eq!(bytes.len(), layout.node_size());
        Self { bytes, layout }
    }

    pub fn as_ref(&self) -> NodeRef<'_> {
        NodeRef::new(self.bytes, self.layout)
    }

    pub fn set_descendant_count(&mut self, count: u32) {
        self.bytes[..4].copy_from_slice(bytemuck::bytes_of(&count));
    }

    pub fn set_norm(&mut self, norm: f32) {
        self.bytes[CHILDREN_OFFSET..CHILDREN_OFFSET + 4].copy_from_slice(bytemuck::bytes_of(&norm));
    }

    /// Copy child ids into the children region. Panics if there are more
    /// than `max_children`.
    pub fn set_children(&mut self, children: &[u32]) {
        assert!(
            children.len() <= self.layout.max_children,
            "{} children exceed node capacity {}",
            children.len(),
            self.layout.max_children,
        );
        self.bytes[CHILDREN_OFFSET..CHILDREN_OFFSET + children.len() * INDEX_WIDTH]
            .copy_from_slice(bytemuck::cast_slice(children));
    }

    /// Copy a vector into the record. Panics on length mismatch.
    pub fn set_vector(&mut self, vector: &[f32]) {
        assert_eq!(
            vector.len(),
            self.layout.vector_length,
            "vector length mismatch",
        );
        let start = self.layout.vector_offset;
        self.bytes[start..start + vector.len() * VALUE_WIDTH]
            .copy_from_slice(bytemuck::cast_slice(vector));
    }

    pub fn vector_mut(&mut self) -> &mut [f32] {
        let start = self.layout.vector_offset;
        let end = start + self.layout.vector_length * VALUE_WIDTH;
        bytemuck::cast_slice_mut(&mut self.bytes[start..end])
    }

    pub fn zero_vector(&mut self) {
        self.vector_mut().fill(0.0);
    }

    pub fn set_dot_factor(&mut self, dot_factor: f32) {
        debug_assert!(self.layout.vector_offset > CHILDREN_OFFSET + 2 * INDEX_WIDTH);
        let start = self.layout.vector_offset - VALUE_WIDTH;
        self.bytes[start..start + VALUE_WIDTH].copy_from_slice(bytemuck::bytes_of(&dot_factor));
    }

    /// Byte-copy a whole record over this one.
    pub fn copy_from(&mut self, src: NodeRef<'_>) {
        debug_assert_eq!(self.layout, src.layout);
        self.bytes.copy_from_slice(src.bytes());
    }
}

/// Heap-allocated scratch node, used for split hyperplanes, two-means
/// centroids, and query probes.
pub struct OwnedNode {
    words: SmallVec<[u32; 32]>,
    layout: NodeLayout,
}

impl OwnedNode {
    pub fn new(layout: NodeLayout) -> Self {
        Self {
            words: smallvec::smallvec![0u32; layout.words_per_node()],
            layout,
        }
    }

    pub fn as_ref(&self) -> NodeRef<'_> {
        NodeRef::new(bytemuck::cast_slice(&self.words), self.layout)
    }

    pub fn as_mut(&mut self) -> NodeMut<'_> {
        NodeMut::new(bytemuck::cast_slice_mut(&mut self.words), self.layout)
    }

    pub fn vector(&self) -> &[f32] {
        let start = self.layout.vector_offset;
        let bytes: &[u8] = bytemuck::cast_slice(&self.words);
        bytemuck::cast_slice(&bytes[start..start + self.layout.vector_length * VALUE_WIDTH])
    }

    pub fn vector_mut(&mut self) -> &mut [f32] {
        let start = self.layout.vector_offset;
        let end = start + self.layout.vector_length * VALUE_WIDTH;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        bytemuck::cast_slice_mut(&mut bytes[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angular_layout_geometry() {
        let layout = NodeLayout::angular(40);
        assert_eq!(layout.node_size(), 12 + 4 * 40);
        assert_eq!(layout.max_children(), 2 + 40);
        assert_eq!(layout.vector_length(), 40);
    }

    #[test]
    fn dot_product_layout_has_extra_slot() {
        let layout = NodeLayout::dot_product(40);
        assert_eq!(layout.node_size(), 16 + 4 * 40);
        assert_eq!(layout.max_children(), 3 + 40);
    }

    #[test]
    fn norm_overlays_first_child_slot() {
        let layout = NodeLayout::angular(4);
        let mut node = OwnedNode::new(layout);
        node.as_mut().set_norm(2.5);
        assert_eq!(node.as_ref().norm(), 2.5);
        // the same bytes read back as the first child slot
        let raw = node.as_ref().split_children()[0];
        assert_eq!(raw, 2.5_f32.to_bits());
    }

    #[test]
    fn children_length_follows_descendant_count() {
        let layout = NodeLayout::angular(4);
        let mut node = OwnedNode::new(layout);
        node.as_mut().set_descendant_count(3);
        node.as_mut().set_children(&[7, 8, 9]);
        assert_eq!(node.as_ref().children(), &[7, 8, 9]);
    }

    #[test]
    fn copy_from_is_a_full_record_copy() {
        let layout = NodeLayout::angular(3);
        let mut a = OwnedNode::new(layout);
        a.as_mut().set_descendant_count(1);
        a.as_mut().set_vector(&[1.0, 2.0, 3.0]);
        a.as_mut().set_norm(14.0);

        let mut b = OwnedNode::new(layout);
        b.as_mut().copy_from(a.as_ref());
        assert_eq!(b.as_ref().descendant_count(), 1);
        assert_eq!(b.as_ref().vector(), &[1.0, 2.0, 3.0]);
        assert_eq!(b.as_ref().norm(), 14.0);
    }
}
