//! copse: approximate nearest neighbor search with a forest of randomized
//! hyperplane trees.
//!
//! The index splits the vector space in two with a random hyperplane, then
//! recursively splits each half, producing one binary tree; a forest of
//! such trees is built so their combined leaf candidates cover the true
//! neighborhood with high probability. The design targets read-heavy
//! workloads: build once, persist to a single flat file, and let many query
//! processes map that file read-only and share its pages.
//!
//! # Algorithm
//!
//! - **Build**: each tree partitions items with hyperplanes chosen by a
//!   two-centroid heuristic; degenerate inputs fall back to random
//!   partitions. Workers build trees in parallel against one shared node
//!   table.
//! - **Search**: all roots go into one priority queue; traversal always
//!   descends the most promising subtree, bounding each side by its
//!   hyperplane margin, then re-ranks collected leaves by exact distance.
//! - **Persistence**: the node table is the file format — fixed-stride
//!   records, roots recoverable from the file tail.
//!
//! Search quality is tuned by two knobs: more trees at build time, and a
//! larger inspection budget at query time.
//!
//! # Usage
//!
//! ```rust
//! use copse::{Angular, ForestIndex, Kiss32Random};
//!
//! let mut index = ForestIndex::new(Angular::new(3), Kiss32Random::new(0));
//! index.add_item(0, &[0.0, 0.0, 1.0]);
//! index.add_item(1, &[0.0, 1.0, 0.0]);
//! index.add_item(2, &[1.0, 0.0, 0.0]);
//! index.build(Some(10), None);
//!
//! let mut ctx = index.create_context();
//! let (ids, distances) = index.get_nns_by_vector(&[3.0, 2.0, 1.0], 3, None, &mut ctx);
//! assert_eq!(ids, vec![2, 1, 0]);
//! assert!(distances.windows(2).all(|w| w[0] <= w[1]));
//! ```
//!
//! # References
//!
//! - Spotify's Annoy library, whose node layout and build heuristics this
//!   crate reproduces.
//! - Bachrach et al. (2014): "Speeding Up the Xbox Recommender System Using
//!   a Euclidean Transformation for Inner-Product Spaces" — the reduction
//!   behind [`DotProduct`].

pub mod error;
pub mod forest;
pub mod metric;
pub mod node;
pub mod random;
pub mod simd;

pub use error::{CopseError, Result};
pub use forest::{
    BatchContext, BuildPolicy, ForestIndex, ForestOptions, MultiWorkerPolicy, Pair,
    SingleWorkerPolicy,
};
pub use metric::{Angular, DotProduct, Metric, Side};
pub use random::{Kiss32Random, RandomSource, StdRandom};
