//! Dot-product (maximum inner product) distance.
//!
//! Inner-product search is not a metric space, so it is reduced to angular
//! search with the transform of Bachrach et al. (2014): each item gains a
//! synthetic coordinate `sqrt(max_norm² − ‖v‖²)`, stored in the node's extra
//! scalar slot, after which cosine comparisons in the lifted space rank by
//! inner product in the original one.

use crate::node::{NodeArena, NodeAccess, NodeLayout, NodeMut, NodeRef, OwnedNode};
use crate::random::RandomSource;
use crate::simd;

use super::{hyperplane_split, Metric};

pub struct DotProduct {
    layout: NodeLayout,
}

impl DotProduct {
    pub fn new(vector_length: usize) -> Self {
        Self {
            layout: NodeLayout::dot_product(vector_length),
        }
    }
}

impl Metric for DotProduct {
    fn vector_length(&self) -> usize {
        self.layout.vector_length()
    }

    fn layout(&self) -> NodeLayout {
        self.layout
    }

    fn name(&self) -> &'static str {
        "dot"
    }

    fn distance(&self, x: NodeRef<'_>, y: NodeRef<'_>) -> f32 {
        let mut pp = x.norm();
        if pp == 0.0 {
            pp = simd::dot(x.vector(), x.vector());
        }
        let mut qq = y.norm();
        if qq == 0.0 {
            qq = simd::dot(y.vector(), y.vector());
        }

        let ppqq = if pp != 0.0 { pp * qq } else { 0.0 };
        if ppqq > 0.0 {
            let pq = simd::dot(x.vector(), y.vector());
            2.0 - 2.0 * pq / ppqq.sqrt()
        } else {
            2.0
        }
    }

    fn normalize(&self, mut node: NodeMut<'_>) {
        let norm = {
            let r = node.as_ref();
            simd::norm(r.vector())
        };
        if norm > 0.0 {
            for v in node.vector_mut() {
                *v /= norm;
            }
            let dot_factor = node.as_ref().dot_factor();
            node.set_dot_factor(dot_factor / norm);
        }
    }

    fn init_node(&self, _node: NodeMut<'_>) {}

    fn margin(&self, node: NodeRef<'_>, query: &[f32]) -> f32 {
        assert!(!query.is_empty(), "empty query vector");
        let dot_factor = node.dot_factor();
        simd::dot(node.vector(), query) + dot_factor * dot_factor
    }

    fn create_split<R: RandomSource>(
        &self,
        children: &[NodeRef<'_>],
        rng: &mut R,
        out: &mut OwnedNode,
    ) {
        hyperplane_split(self, children, rng, out);
    }

    fn preprocess(&self, arena: &mut NodeArena, n_items: u32) {
        // Pass one: each vector's norm, staged in its extra slot.
        for i in 0..n_items {
            let d = {
                let node = arena.node(i);
                simd::dot(node.vector(), node.vector())
            };
            let norm = if d >= 0.0 { d.sqrt() } else { 0.0 };
            arena.node_mut(i).set_dot_factor(norm);
        }

        // Pass two: the global maximum norm.
        let mut max_norm = 0.0_f32;
        for i in 0..n_items {
            max_norm = max_norm.max(arena.node(i).dot_factor());
        }

        // Pass three: replace each norm with the synthetic coordinate.
        for i in 0..n_items {
            let node_norm = arena.node(i).dot_factor();
            let squared_diff = max_norm * max_norm - node_norm * node_norm;
            let dot_factor = if squared_diff >= 0.0 {
                squared_diff.sqrt()
            } else {
                0.0
            };
            arena.node_mut(i).set_dot_factor(dot_factor);
        }
    }
}
