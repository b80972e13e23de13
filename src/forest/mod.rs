//! The forest index: randomized hyperplane trees over a shared node table.
//!
//! Items are appended as leaf nodes, [`ForestIndex::build`] grows a forest
//! of binary trees over them (each tree splitting the space with random
//! hyperplanes), and queries walk all trees at once with a branch-and-bound
//! priority queue. The whole table persists as one flat file that reopens
//! memory-mapped, so many processes can query a built index without copying
//! it.
//!
//! # Lifecycle
//!
//! `Empty → items added → built → saved/loaded (mapped)`. Building and
//! loading are one-way: a built or loaded index accepts no further items,
//! and [`ForestIndex::close`] is the only way back to the empty state.
//! Misusing the lifecycle (adding to a built index, building twice,
//! querying an out-of-range item) is a programmer error and panics; only
//! I/O returns [`crate::Result`].

pub(crate) mod construction;
pub mod policy;
mod search;
mod storage;

pub use policy::{BuildPolicy, MultiWorkerPolicy, SingleWorkerPolicy, TreeBuilder};
pub use search::{BatchContext, Pair};

use tracing::debug;

use crate::metric::Metric;
use crate::node::{NodeArena, NodeLayout};
use crate::random::RandomSource;

use construction::SharedBuildState;
use storage::NodeStore;

/// Construction-time configuration.
pub struct ForestOptions {
    /// Build scheduling policy.
    pub policy: Box<dyn BuildPolicy>,
    /// Expected item count; pre-allocates the node table.
    pub item_hint: u32,
    /// Emit per-operation diagnostics through `tracing`.
    pub verbose: bool,
}

impl Default for ForestOptions {
    fn default() -> Self {
        Self {
            policy: Box::new(SingleWorkerPolicy),
            item_hint: 0,
            verbose: false,
        }
    }
}

/// An approximate-nearest-neighbor forest over fixed-length `f32` vectors.
pub struct ForestIndex<M, R> {
    metric: M,
    rng: R,
    policy: Box<dyn BuildPolicy>,
    layout: NodeLayout,
    store: NodeStore,
    n_items: u32,
    n_nodes: u32,
    roots: Vec<u32>,
    batch_max_nns: usize,
    built: bool,
    loaded: bool,
    verbose: bool,
}

impl<M: Metric, R: RandomSource + Send + Sync> ForestIndex<M, R> {
    pub fn new(metric: M, rng: R) -> Self {
        Self::with_options(metric, rng, ForestOptions::default())
    }

    pub fn with_options(metric: M, rng: R, options: ForestOptions) -> Self {
        let layout = metric.layout();
        let arena = if options.item_hint > 0 {
            // same headroom the builder would grow into anyway
            NodeArena::with_capacity(layout, options.item_hint as usize * 3 / 2)
        } else {
            NodeArena::new(layout)
        };
        Self {
            metric,
            rng,
            policy: options.policy,
            layout,
            store: NodeStore::Arena(arena),
            n_items: 0,
            n_nodes: 0,
            roots: Vec::new(),
            batch_max_nns: 0,
            built: false,
            loaded: false,
            verbose: options.verbose,
        }
    }

    /// Number of components in each indexed vector.
    pub fn vector_length(&self) -> usize {
        self.layout.vector_length()
    }

    /// Highest added item id plus one.
    pub fn n_items(&self) -> u32 {
        self.n_items
    }

    /// Total nodes in the table: items, tree nodes, and appended root
    /// copies.
    pub fn n_nodes(&self) -> u32 {
        self.n_nodes
    }

    /// Number of trees in the forest (one root per tree).
    pub fn n_trees(&self) -> usize {
        self.roots.len()
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Whether the table is the read-only mapped representation.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Store `vector` under `item`. Ids need not be dense; holes are
    /// skipped at build time.
    ///
    /// Panics if the index is built or loaded, or on a length mismatch.
    pub fn add_item(&mut self, item: u32, vector: &[f32]) {
        assert!(!self.loaded, "can't add items to a loaded index");
        assert!(!self.built, "can't add items to a built index");
        assert_eq!(
            vector.len(),
            self.layout.vector_length(),
            "vector length mismatch: expected {}, got {}",
            self.layout.vector_length(),
            vector.len(),
        );

        let arena = self.store.arena_mut();
        arena.ensure(item as usize + 1);
        {
            let mut node = arena.node_mut(item);
            node.set_descendant_count(1);
            node.set_vector(vector);
        }
        self.metric.init_node(arena.node_mut(item));

        if item >= self.n_items {
            self.n_items = item + 1;
        }
        if self.verbose {
            debug!(item, "added item");
        }
    }

    /// The stored vector for `item`. Panics if `item` is out of range.
    pub fn get_item(&self, item: u32) -> &[f32] {
        assert!(item < self.n_items, "item id {item} out of range");
        self.store.node(item).vector()
    }

    /// Exact metric distance between two stored items.
    pub fn get_distance(&self, i: u32, j: u32) -> f32 {
        assert!(i < self.n_items, "item id {i} out of range");
        assert!(j < self.n_items, "item id {j} out of range");
        self.metric.distance(self.store.node(i), self.store.node(j))
    }

    /// Grow the forest. Callable exactly once per lifecycle.
    ///
    /// `number_of_trees` is the forest size; `None` keeps adding trees
    /// until the node table reaches twice the item count, bounding the
    /// index at roughly 2x the raw data size. `num_workers` defaults to the
    /// available parallelism under a multi-worker policy.
    pub fn build(&mut self, number_of_trees: Option<usize>, num_workers: Option<usize>) {
        assert!(!self.loaded, "can't build a loaded index");
        assert!(!self.built, "index already built");

        let mut arena = self.store.take_arena(self.layout);
        self.metric.preprocess(&mut arena, self.n_items);

        let shared = SharedBuildState::new(
            &self.metric,
            &self.rng,
            self.layout,
            self.n_items,
            self.verbose,
            arena,
        );
        self.policy.build(&shared, number_of_trees, num_workers);
        let (mut arena, n_nodes, roots) = shared.into_parts();
        self.n_nodes = n_nodes;
        self.roots = roots;

        // Copy the roots into the table's tail; the loader recovers them
        // from there without any other bookkeeping in the file.
        arena.ensure(self.n_nodes as usize + self.roots.len());
        for (i, &root) in self.roots.iter().enumerate() {
            arena.copy_node(self.n_nodes + i as u32, root);
        }
        self.n_nodes += self.roots.len() as u32;

        self.store = NodeStore::Arena(arena);
        self.built = true;
        self.refresh_batch_bound();

        if self.verbose {
            debug!(
                n_items = self.n_items,
                n_nodes = self.n_nodes,
                trees = self.roots.len(),
                "forest built"
            );
        }
    }

    /// Scratch buffers for queries against the current index shape.
    ///
    /// Contexts are tied to that shape: recreate them after the index is
    /// rebuilt, saved, or reloaded.
    pub fn create_context(&self) -> BatchContext {
        BatchContext::with_capacity(self.batch_max_nns)
    }

    /// Release the table and reset to the reusable empty state.
    pub fn close(&mut self) {
        self.store = NodeStore::Arena(NodeArena::new(self.layout));
        self.n_items = 0;
        self.n_nodes = 0;
        self.roots.clear();
        self.batch_max_nns = 0;
        self.built = false;
        self.loaded = false;
        self.rng = self.rng.clone_and_reset();
    }

    /// Upper bound on candidates any single query can collect; sizes the
    /// [`BatchContext`] buffers.
    fn refresh_batch_bound(&mut self) {
        let mut bound: i64 = -1;
        for i in 0..self.n_nodes {
            let node = self.store.node(i);
            let descendants = node.descendant_count();
            if descendants == 1 && i < self.n_items {
                bound += 1;
            } else if descendants as usize <= self.layout.max_children() {
                bound += node.children().len() as i64;
            }
        }
        self.batch_max_nns = bound.max(0) as usize;
    }
}
