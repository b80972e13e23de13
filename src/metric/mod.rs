//! Distance metrics and the randomized hyperplane split heuristic.
//!
//! A [`Metric`] owns the node geometry for its variant, computes pairwise
//! distances, produces random hyperplane splits for the builder, and defines
//! the priority-queue bounds the search walks with. [`Angular`] is the
//! reference variant; [`DotProduct`] reduces maximum-inner-product search to
//! angular search with a preprocessing transform.

mod angular;
mod dot;

pub use angular::Angular;
pub use dot::DotProduct;

use crate::node::{NodeArena, NodeMut, NodeRef, OwnedNode};
use crate::random::RandomSource;
use crate::simd;

/// Which side of a split hyperplane a vector falls on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Pluggable distance strategy.
///
/// Implementations know their node layout (including what the extra record
/// fields mean), so all geometry questions route through the metric.
pub trait Metric: Send + Sync {
    fn vector_length(&self) -> usize;

    /// Record geometry for this metric at its vector length.
    fn layout(&self) -> crate::node::NodeLayout;

    fn name(&self) -> &'static str;

    fn node_size(&self) -> usize {
        self.layout().node_size()
    }

    fn max_children(&self) -> usize {
        self.layout().max_children()
    }

    /// Distance between two stored nodes.
    fn distance(&self, x: NodeRef<'_>, y: NodeRef<'_>) -> f32;

    /// Scale the node's vector to unit norm in place; no-op for a zero
    /// vector.
    fn normalize(&self, node: NodeMut<'_>);

    /// (Re)compute whatever per-node quantity `distance` caches.
    fn init_node(&self, node: NodeMut<'_>);

    /// Signed projection of `query` onto the node's hyperplane normal.
    ///
    /// Panics on an empty query; callers guarantee the length matches the
    /// index's vector length.
    fn margin(&self, node: NodeRef<'_>, query: &[f32]) -> f32;

    /// Route a vector to one side of a split; exact-zero margins are broken
    /// by a coin flip so ties don't bias the partition.
    fn side<R: RandomSource>(&self, node: NodeRef<'_>, query: &[f32], rng: &mut R) -> Side {
        let margin = self.margin(node, query);
        if margin > 0.0 {
            Side::Right
        } else if margin < 0.0 {
            Side::Left
        } else {
            rng.next_side()
        }
    }

    /// Write a split hyperplane separating `children` into `out`.
    fn create_split<R: RandomSource>(
        &self,
        children: &[NodeRef<'_>],
        rng: &mut R,
        out: &mut OwnedNode,
    );

    /// Bound pushed for a subtree on the search queue: the parent bound
    /// capped by the (side-signed) margin.
    fn pq_distance(&self, bound: f32, margin: f32, side: Side) -> f32 {
        let signed = match side {
            Side::Left => -margin,
            Side::Right => margin,
        };
        bound.min(signed)
    }

    /// Seed bound for each root.
    fn pq_initial_value(&self) -> f32 {
        f32::INFINITY
    }

    /// One-time pass over the item nodes before the forest is built.
    fn preprocess(&self, arena: &mut NodeArena, n_items: u32);
}

/// Iterations of the two-centroid refinement loop.
const ITERATION_STEPS: usize = 200;

/// The two-centroid split heuristic.
///
/// Keeps two centroids and assigns sampled candidates to whichever is
/// closer, weighting each centroid by its running assignment count so one
/// cannot absorb everything. Candidates with zero norm contribute nothing
/// in cosine mode. The caller derives the hyperplane normal from `p − q`.
pub(crate) fn two_means<M: Metric + ?Sized, R: RandomSource>(
    metric: &M,
    nodes: &[NodeRef<'_>],
    cosine: bool,
    rng: &mut R,
    p: &mut OwnedNode,
    q: &mut OwnedNode,
) {
    let count = nodes.len() as u32;
    let i = rng.next_index(count);
    let mut j = rng.next_index(count - 1);
    if j >= i {
        j += 1; // ensure i != j
    }

    p.as_mut().copy_from(nodes[i as usize]);
    q.as_mut().copy_from(nodes[j as usize]);

    if cosine {
        metric.normalize(p.as_mut());
        metric.normalize(q.as_mut());
    }
    metric.init_node(p.as_mut());
    metric.init_node(q.as_mut());

    let vector_length = metric.vector_length();
    let mut ic = 1.0_f64;
    let mut jc = 1.0_f64;

    for _ in 0..ITERATION_STEPS {
        let k = rng.next_index(count) as usize;
        let di = ic * f64::from(metric.distance(p.as_ref(), nodes[k]));
        let dj = jc * f64::from(metric.distance(q.as_ref(), nodes[k]));

        let norm = if cosine {
            simd::norm(nodes[k].vector())
        } else {
            1.0
        };
        if !(norm > 0.0) {
            continue;
        }

        if di < dj {
            let pv = p.vector_mut();
            let kv = nodes[k].vector();
            for z in 0..vector_length {
                pv[z] = (pv[z] * ic as f32 + kv[z] / norm) / (ic as f32 + 1.0);
            }
            metric.init_node(p.as_mut());
            ic += 1.0;
        } else if dj < di {
            let qv = q.vector_mut();
            let kv = nodes[k].vector();
            for z in 0..vector_length {
                qv[z] = (qv[z] * jc as f32 + kv[z] / norm) / (jc as f32 + 1.0);
            }
            metric.init_node(q.as_mut());
            jc += 1.0;
        }
    }
}

/// Shared split construction: run two-means, take `p − q` as the hyperplane
/// normal, and normalize it.
pub(crate) fn hyperplane_split<M: Metric + ?Sized, R: RandomSource>(
    metric: &M,
    children: &[NodeRef<'_>],
    rng: &mut R,
    out: &mut OwnedNode,
) {
    let mut p = OwnedNode::new(metric.layout());
    let mut q = OwnedNode::new(metric.layout());
    two_means(metric, children, true, rng, &mut p, &mut q);

    let out_v = out.vector_mut();
    for (o, (pv, qv)) in out_v.iter_mut().zip(p.vector().iter().zip(q.vector())) {
        *o = pv - qv;
    }
    metric.normalize(out.as_mut());
}
