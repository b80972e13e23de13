//! Recursive tree construction over the shared node table.
//!
//! Workers race to grow trees against one table. The table itself sits
//! behind a read/write lock: descent and split evaluation take the shared
//! side, growth and slot writes the exclusive side, and the node counter
//! and root list each get their own mutex with brief critical sections.
//! No lock is ever held across a whole tree build.

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::metric::Metric;
use crate::node::{NodeAccess, NodeArena, NodeLayout, NodeRef, OwnedNode};
use crate::random::RandomSource;

use super::policy::TreeBuilder;

/// Hyperplane attempts before giving up on a balanced split.
const SPLIT_ATTEMPTS: usize = 3;

/// An accepted hyperplane split must keep the larger side below this share.
const MAX_SPLIT_IMBALANCE: f64 = 0.95;

/// The random fallback only has to beat this (guards all-identical inputs).
const MAX_FALLBACK_IMBALANCE: f64 = 0.99;

/// Mutable build state shared by all workers; the capability object the
/// scheduling policy hands to each worker thread.
pub(crate) struct SharedBuildState<'a, M, R> {
    metric: &'a M,
    base_rng: &'a R,
    layout: NodeLayout,
    n_items: u32,
    max_children: usize,
    verbose: bool,
    arena: RwLock<NodeArena>,
    n_nodes: Mutex<u32>,
    roots: Mutex<Vec<u32>>,
}

impl<'a, M: Metric, R: RandomSource + Send + Sync> SharedBuildState<'a, M, R> {
    pub fn new(
        metric: &'a M,
        base_rng: &'a R,
        layout: NodeLayout,
        n_items: u32,
        verbose: bool,
        arena: NodeArena,
    ) -> Self {
        Self {
            metric,
            base_rng,
            layout,
            n_items,
            max_children: layout.max_children(),
            verbose,
            arena: RwLock::new(arena),
            n_nodes: Mutex::new(n_items),
            roots: Mutex::new(Vec::new()),
        }
    }

    pub fn into_parts(self) -> (NodeArena, u32, Vec<u32>) {
        (
            self.arena.into_inner(),
            self.n_nodes.into_inner(),
            self.roots.into_inner(),
        )
    }

    /// Claim the next node slot, growing the table if needed.
    fn allocate_node(&self) -> u32 {
        let mut n_nodes = self.n_nodes.lock();
        let item = *n_nodes;
        if item as usize + 1 > self.arena.read().capacity() {
            self.arena.write().ensure(item as usize + 1);
        }
        *n_nodes += 1;
        item
    }

    /// Build one tree over `indices` and return its root node id.
    fn make_tree(&self, indices: &[u32], is_root: bool, rng: &mut R) -> u32 {
        // Leaf ids double as tree-node ids, so a single item needs no new
        // node.
        if indices.len() == 1 && !is_root {
            return indices[0];
        }

        if indices.len() <= self.max_children
            && (!is_root || self.n_items as usize <= self.max_children || indices.len() == 1)
        {
            let item = self.allocate_node();
            let mut arena = self.arena.write();
            let mut node = arena.node_mut(item);
            // A root advertises the full item count regardless of how many
            // indices reached it; the loader recognizes roots by that
            // count.
            node.set_descendant_count(if is_root {
                self.n_items
            } else {
                indices.len() as u32
            });
            if !indices.is_empty() {
                node.set_children(indices);
            }
            return item;
        }

        let mut split = OwnedNode::new(self.layout);
        let mut sides: [Vec<u32>; 2] = [Vec::new(), Vec::new()];

        {
            let arena = self.arena.read();
            let children: Vec<NodeRef<'_>> = indices.iter().map(|&j| arena.node(j)).collect();

            for _attempt in 0..SPLIT_ATTEMPTS {
                sides[0].clear();
                sides[1].clear();

                self.metric.create_split(&children, rng, &mut split);

                for (&j, child) in indices.iter().zip(&children) {
                    let side = self.metric.side(split.as_ref(), child.vector(), rng);
                    sides[side.index()].push(j);
                }

                if split_imbalance(sides[0].len(), sides[1].len()) < MAX_SPLIT_IMBALANCE {
                    break;
                }
            }
        }

        // No usable hyperplane: randomize sides until the partition is
        // tolerable.
        while split_imbalance(sides[0].len(), sides[1].len()) > MAX_FALLBACK_IMBALANCE {
            sides[0].clear();
            sides[1].clear();
            split.as_mut().zero_vector();
            for &j in indices {
                sides[rng.next_side().index()].push(j);
            }
        }

        split.as_mut().set_descendant_count(if is_root {
            self.n_items
        } else {
            indices.len() as u32
        });

        // Recurse into the smaller side first for cache locality; the split
        // node itself is allocated last, after both children exist.
        let flip = usize::from(sides[0].len() > sides[1].len());
        let mut child_ids = [0u32; 2];
        for side in 0..2 {
            let pick = side ^ flip;
            child_ids[pick] = self.make_tree(&sides[pick], false, rng);
        }
        split.as_mut().set_children(&child_ids);

        let item = self.allocate_node();
        self.arena.write().node_mut(item).copy_from(split.as_ref());
        item
    }
}

impl<M: Metric, R: RandomSource + Send + Sync> TreeBuilder for SharedBuildState<'_, M, R> {
    fn thread_build(&self, trees: Option<usize>, worker_index: usize) {
        // Each worker gets its own seed, otherwise every worker would build
        // the same trees.
        let mut rng = self.base_rng.clone_and_reset();
        let seed = rng.seed();
        rng.set_seed(seed.wrapping_add(worker_index as u32));

        let mut thread_roots: Vec<u32> = Vec::new();
        loop {
            match trees {
                Some(count) => {
                    if thread_roots.len() >= count {
                        break;
                    }
                }
                None => {
                    let n_nodes = self.n_nodes.lock();
                    if *n_nodes >= 2 * self.n_items {
                        break;
                    }
                }
            }

            let indices: Vec<u32> = {
                let arena = self.arena.read();
                (0..self.n_items)
                    .filter(|&i| arena.node(i).descendant_count() >= 1)
                    .collect()
            };

            let root = self.make_tree(&indices, true, &mut rng);
            if self.verbose {
                debug!(worker_index, root, "tree complete");
            }
            thread_roots.push(root);
        }

        self.roots.lock().extend(thread_roots);
    }
}

fn split_imbalance(left: usize, right: usize) -> f64 {
    let ls = left as f64;
    let rs = right as f64;
    let share = ls / (ls + rs + 1e-9); // avoid 0/0
    share.max(1.0 - share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Angular;
    use crate::random::Kiss32Random;

    fn state_with_items(
        metric: &Angular,
        rng: &Kiss32Random,
        items: &[Vec<f32>],
    ) -> SharedBuildState<'static, Angular, Kiss32Random> {
        // tests keep the metric/rng alive for the duration; leak to get
        // 'static without threading lifetimes through every helper
        let metric: &'static Angular = Box::leak(Box::new(Angular::new(metric.vector_length())));
        let rng: &'static Kiss32Random = Box::leak(Box::new(rng.clone_and_reset()));
        let layout = metric.layout();
        let mut arena = NodeArena::with_capacity(layout, items.len().max(1));
        for (i, v) in items.iter().enumerate() {
            let mut node = arena.node_mut(i as u32);
            node.set_descendant_count(1);
            node.set_vector(v);
            metric.init_node(arena.node_mut(i as u32));
        }
        SharedBuildState::new(metric, rng, layout, items.len() as u32, false, arena)
    }

    #[test]
    fn imbalance_is_the_larger_share() {
        assert!((split_imbalance(50, 50) - 0.5).abs() < 1e-6);
        assert!((split_imbalance(95, 5) - 0.95).abs() < 1e-6);
        assert!(split_imbalance(10, 0) > 0.99);
    }

    #[test]
    fn small_sets_become_a_single_leaf_root() {
        let metric = Angular::new(2);
        let rng = Kiss32Random::new(1);
        let items: Vec<Vec<f32>> = (0..3).map(|i| vec![i as f32 + 1.0, 1.0]).collect();
        let state = state_with_items(&metric, &rng, &items);

        state.thread_build(Some(1), 0);
        let (arena, n_nodes, roots) = state.into_parts();

        assert_eq!(roots.len(), 1);
        assert_eq!(n_nodes, 4); // 3 items + 1 dummy root
        let root = arena.node(roots[0]);
        assert_eq!(root.descendant_count(), 3);
        assert_eq!(root.children(), &[0, 1, 2]);
    }

    #[test]
    fn large_sets_get_split_nodes() {
        let metric = Angular::new(2);
        let rng = Kiss32Random::new(1);
        // more items than fit in one node (max_children = 4 at f = 2)
        let items: Vec<Vec<f32>> = (0..32)
            .map(|i| {
                let angle = i as f32 * 0.2;
                vec![angle.cos(), angle.sin()]
            })
            .collect();
        let state = state_with_items(&metric, &rng, &items);

        state.thread_build(Some(1), 0);
        let (arena, n_nodes, roots) = state.into_parts();

        assert_eq!(roots.len(), 1);
        assert!(n_nodes > 32);
        let root = arena.node(roots[0]);
        assert_eq!(root.descendant_count(), 32);
        // the root must be a split node at this size
        assert!(root.descendant_count() as usize > metric.max_children());
    }

    #[test]
    fn identical_vectors_fall_back_to_random_sides() {
        let metric = Angular::new(2);
        let rng = Kiss32Random::new(1);
        let items: Vec<Vec<f32>> = (0..32).map(|_| vec![1.0, 0.0]).collect();
        let state = state_with_items(&metric, &rng, &items);

        // degenerate geometry: every margin is zero, so sides come from
        // coin flips (or the random fallback) — the build must terminate
        state.thread_build(Some(1), 0);
        let (_arena, _n_nodes, roots) = state.into_parts();
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn unbounded_mode_stops_at_twice_the_items() {
        let metric = Angular::new(2);
        let rng = Kiss32Random::new(1);
        let items: Vec<Vec<f32>> = (0..64)
            .map(|i| {
                let angle = i as f32 * 0.1;
                vec![angle.cos(), angle.sin()]
            })
            .collect();
        let state = state_with_items(&metric, &rng, &items);

        state.thread_build(None, 0);
        let (_arena, n_nodes, roots) = state.into_parts();
        assert!(n_nodes >= 2 * 64);
        assert!(!roots.is_empty());
    }
}
