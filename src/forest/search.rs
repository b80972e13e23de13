//! Branch-and-bound search over a built forest.
//!
//! All roots are seeded into one priority queue with an infinite bound;
//! popping always takes the most promising subtree, where a subtree's bound
//! is its parent's bound capped by the signed hyperplane margin on the way
//! down. Leaves and packed internal nodes contribute candidates until the
//! inspection budget is spent, then survivors are deduplicated, scored with
//! the exact metric distance, and the k smallest selected.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::metric::{Metric, Side};
use crate::node::OwnedNode;
use crate::random::RandomSource;

use super::ForestIndex;

/// Distance/id pair, totally ordered by `(distance, id)` ascending.
#[derive(Clone, Copy, Debug)]
pub struct Pair {
    pub distance: f32,
    pub id: u32,
}

impl PartialEq for Pair {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pair {}

impl PartialOrd for Pair {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pair {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Reusable per-caller query scratch.
///
/// Sized from the built index's candidate bound. Buffer sizing depends on
/// the index shape, so recreate contexts whenever the index is rebuilt,
/// saved, or reloaded.
pub struct BatchContext {
    pub(crate) candidates: Vec<u32>,
    pub(crate) pairs: Vec<Pair>,
}

impl BatchContext {
    pub(crate) fn with_capacity(bound: usize) -> Self {
        Self {
            candidates: Vec::with_capacity(bound),
            pairs: Vec::with_capacity(bound),
        }
    }
}

/// Reorder `pairs` so the first `k` entries are the `k` smallest, in
/// ascending order. Everything after `k` is left unordered.
pub(crate) fn partial_sort(pairs: &mut [Pair], k: usize) {
    if k == 0 || pairs.is_empty() {
        return;
    }
    if k < pairs.len() {
        pairs.select_nth_unstable(k - 1);
        pairs[..k].sort_unstable();
    } else {
        pairs.sort_unstable();
    }
}

impl<M: Metric, R: RandomSource + Send + Sync> ForestIndex<M, R> {
    /// Nearest neighbors of a stored item (including itself).
    ///
    /// Panics if `item` is out of range.
    pub fn get_nns_by_item(
        &self,
        item: u32,
        num_return: usize,
        num_nodes_to_inspect: Option<usize>,
        ctx: &mut BatchContext,
    ) -> (Vec<u32>, Vec<f32>) {
        assert!(item < self.n_items, "item id {item} out of range");
        let query = self.store.node(item).vector();
        self.get_nns_by_vector(query, num_return, num_nodes_to_inspect, ctx)
    }

    /// The `num_return` stored items closest to `query`, ids and distances
    /// in ascending distance order.
    ///
    /// `num_nodes_to_inspect` bounds how many leaf candidates the traversal
    /// collects before re-ranking; `None` uses `num_return × trees`. Fewer
    /// than `num_return` results come back when the forest yields fewer
    /// distinct candidates.
    pub fn get_nns_by_vector(
        &self,
        query: &[f32],
        num_return: usize,
        num_nodes_to_inspect: Option<usize>,
        ctx: &mut BatchContext,
    ) -> (Vec<u32>, Vec<f32>) {
        assert_eq!(
            query.len(),
            self.layout.vector_length(),
            "query length mismatch: expected {}, got {}",
            self.layout.vector_length(),
            query.len(),
        );

        let inspect = num_nodes_to_inspect.unwrap_or(num_return * self.roots.len());
        let max_children = self.layout.max_children();

        let mut queue: BinaryHeap<Pair> = BinaryHeap::with_capacity(self.roots.len().max(16));
        for &root in &self.roots {
            queue.push(Pair {
                distance: self.metric.pq_initial_value(),
                id: root,
            });
        }

        ctx.candidates.clear();
        while ctx.candidates.len() < inspect {
            let Some(top) = queue.pop() else { break };
            let node = self.store.node(top.id);
            let descendants = node.descendant_count();

            if descendants == 1 && top.id < self.n_items {
                ctx.candidates.push(top.id);
            } else if descendants as usize <= max_children {
                ctx.candidates.extend_from_slice(node.children());
            } else {
                // Split node: bound each subtree by its side of the
                // hyperplane.
                let margin = self.metric.margin(node, query);
                let [left, right] = node.split_children();
                queue.push(Pair {
                    distance: self.metric.pq_distance(top.distance, margin, Side::Right),
                    id: right,
                });
                queue.push(Pair {
                    distance: self.metric.pq_distance(top.distance, margin, Side::Left),
                    id: left,
                });
            }
        }

        // Sort ids so duplicates from overlapping trees are scored once.
        ctx.candidates.sort_unstable();

        let mut probe = OwnedNode::new(self.layout);
        probe.as_mut().set_vector(query);
        self.metric.init_node(probe.as_mut());

        ctx.pairs.clear();
        let mut last = None;
        for &candidate in &ctx.candidates {
            if last == Some(candidate) {
                continue;
            }
            last = Some(candidate);
            if candidate < self.n_items && self.store.node(candidate).is_leaf() {
                ctx.pairs.push(Pair {
                    distance: self
                        .metric
                        .distance(probe.as_ref(), self.store.node(candidate)),
                    id: candidate,
                });
            }
        }

        let keep = num_return.min(ctx.pairs.len());
        partial_sort(&mut ctx.pairs, keep);

        let mut ids = Vec::with_capacity(keep);
        let mut distances = Vec::with_capacity(keep);
        for pair in &ctx.pairs[..keep] {
            ids.push(pair.id);
            distances.push(pair.distance);
        }
        (ids, distances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(distance: f32, id: u32) -> Pair {
        Pair { distance, id }
    }

    #[test]
    fn pairs_order_by_distance_then_id() {
        let mut pairs = vec![pair(2.0, 0), pair(1.0, 5), pair(1.0, 3), pair(0.5, 9)];
        pairs.sort_unstable();
        let ids: Vec<u32> = pairs.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![9, 3, 5, 0]);
    }

    #[test]
    fn binary_heap_pops_the_largest_bound_first() {
        let mut queue = BinaryHeap::new();
        queue.push(pair(0.5, 1));
        queue.push(pair(f32::INFINITY, 2));
        queue.push(pair(-3.0, 3));
        assert_eq!(queue.pop().map(|p| p.id), Some(2));
        assert_eq!(queue.pop().map(|p| p.id), Some(1));
        assert_eq!(queue.pop().map(|p| p.id), Some(3));
    }

    #[test]
    fn partial_sort_selects_the_k_smallest_in_order() {
        let mut pairs: Vec<Pair> = (0..100).map(|i| pair((997 * i % 100) as f32, i)).collect();
        partial_sort(&mut pairs, 10);
        for (expected, p) in pairs[..10].iter().enumerate() {
            assert_eq!(p.distance, expected as f32);
        }
    }

    #[test]
    fn partial_sort_with_k_past_the_end_sorts_everything() {
        let mut pairs = vec![pair(3.0, 0), pair(1.0, 1), pair(2.0, 2)];
        partial_sort(&mut pairs, 10);
        let ids: Vec<u32> = pairs.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
    }

    #[test]
    fn nan_distances_sort_last() {
        let mut pairs = vec![pair(f32::NAN, 0), pair(1.0, 1)];
        partial_sort(&mut pairs, 2);
        assert_eq!(pairs[0].id, 1);
    }
}
