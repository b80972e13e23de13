//! Angular (cosine) distance.

use crate::node::{NodeArena, NodeLayout, NodeMut, NodeRef, OwnedNode};
use crate::random::RandomSource;
use crate::simd;

use super::{hyperplane_split, Metric};

/// Angular distance: `2 − 2·cos(x, y)`, in `[0, 4]`.
///
/// Self-dot-products are cached in the leaf's norm slot and recomputed
/// lazily when the cache reads zero. A genuinely all-zero vector therefore
/// never looks cached and is recomputed on every call — a known limitation
/// inherited from the storage overlay, kept because "fixing" it would change
/// query results for zero vectors.
pub struct Angular {
    layout: NodeLayout,
}

impl Angular {
    pub fn new(vector_length: usize) -> Self {
        Self {
            layout: NodeLayout::angular(vector_length),
        }
    }
}

impl Metric for Angular {
    fn vector_length(&self) -> usize {
        self.layout.vector_length()
    }

    fn layout(&self) -> NodeLayout {
        self.layout
    }

    fn name(&self) -> &'static str {
        "angular"
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

        let pq = simd::dot(x.vector(), y.vector());
        let ppqq = pp * qq;
        if ppqq > 0.0 {
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
        }
    }

    fn init_node(&self, mut node: NodeMut<'_>) {
        let norm = {
            let r = node.as_ref();
            simd::dot(r.vector(), r.vector())
        };
        node.set_norm(norm);
    }

    fn margin(&self, node: NodeRef<'_>, query: &[f32]) -> f32 {
        assert!(!query.is_empty(), "empty query vector");
        simd::dot(node.vector(), query)
    }

    fn create_split<R: RandomSource>(
        &self,
        children: &[NodeRef<'_>],
        rng: &mut R,
        out: &mut OwnedNode,
    ) {
        hyperplane_split(self, children, rng, out);
    }

    fn preprocess(&self, _arena: &mut NodeArena, _n_items: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(metric: &Angular, v: &[f32]) -> OwnedNode {
        let mut node = OwnedNode::new(metric.layout());
        node.as_mut().set_descendant_count(1);
        node.as_mut().set_vector(v);
        metric.init_node(node.as_mut());
        node
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let metric = Angular::new(3);
        let a = leaf(&metric, &[1.0, 2.0, 3.0]);
        let d = metric.distance(a.as_ref(), a.as_ref());
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_distance_two() {
        let metric = Angular::new(2);
        let a = leaf(&metric, &[1.0, 0.0]);
        let b = leaf(&metric, &[0.0, 1.0]);
        assert!((metric.distance(a.as_ref(), b.as_ref()) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_falls_back_to_distance_two() {
        let metric = Angular::new(2);
        let a = leaf(&metric, &[0.0, 0.0]);
        let b = leaf(&metric, &[1.0, 0.0]);
        assert_eq!(metric.distance(a.as_ref(), b.as_ref()), 2.0);
    }

    #[test]
    fn distance_ignores_scale() {
        let metric = Angular::new(3);
        let a = leaf(&metric, &[1.0, 2.0, 3.0]);
        let b = leaf(&metric, &[10.0, 20.0, 30.0]);
        assert!(metric.distance(a.as_ref(), b.as_ref()).abs() < 1e-5);
    }

    #[test]
    fn normalize_is_idempotent() {
        let metric = Angular::new(3);
        let mut node = leaf(&metric, &[3.0, 4.0, 12.0]);
        metric.normalize(node.as_mut());
        let once: Vec<f32> = node.vector().to_vec();
        metric.normalize(node.as_mut());
        for (a, b) in once.iter().zip(node.vector()) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!((simd::norm(node.vector()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_skips_zero_vectors() {
        let metric = Angular::new(2);
        let mut node = leaf(&metric, &[0.0, 0.0]);
        metric.normalize(node.as_mut());
        assert_eq!(node.vector(), &[0.0, 0.0]);
    }

    #[test]
    fn init_node_caches_self_dot() {
        let metric = Angular::new(2);
        let node = leaf(&metric, &[3.0, 4.0]);
        assert!((node.as_ref().norm() - 25.0).abs() < 1e-6);
    }

    #[test]
    fn margin_is_the_projection() {
        let metric = Angular::new(2);
        let normal = leaf(&metric, &[1.0, 0.0]);
        assert!(metric.margin(normal.as_ref(), &[2.0, 5.0]) > 0.0);
        assert!(metric.margin(normal.as_ref(), &[-2.0, 5.0]) < 0.0);
    }
}
