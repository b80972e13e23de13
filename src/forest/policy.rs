//! Build scheduling policies.
//!
//! A policy decides how many OS threads drive tree construction and how the
//! requested tree count is divided among them. The locking itself lives in
//! the shared build state the workers are handed; building is CPU-bound
//! thread parallelism with blocking locks, so no async runtime is involved.

use std::thread;

/// Callback surface the policies drive; implemented by the shared build
/// state.
pub trait TreeBuilder: Sync {
    /// Build trees on the calling thread: `trees` of them, or — when
    /// `trees` is `None` — until the node table reaches twice the item
    /// count.
    fn thread_build(&self, trees: Option<usize>, worker_index: usize);
}

/// How a forest build is scheduled across workers.
pub trait BuildPolicy: Send + Sync {
    fn build(
        &self,
        builder: &dyn TreeBuilder,
        number_of_trees: Option<usize>,
        num_workers: Option<usize>,
    );
}

/// Runs the whole build inline on the calling thread.
pub struct SingleWorkerPolicy;

impl BuildPolicy for SingleWorkerPolicy {
    fn build(
        &self,
        builder: &dyn TreeBuilder,
        number_of_trees: Option<usize>,
        _num_workers: Option<usize>,
    ) {
        builder.thread_build(number_of_trees, 0);
    }
}

/// Spawns one OS thread per worker and splits the tree count as evenly as
/// possible.
pub struct MultiWorkerPolicy;

impl BuildPolicy for MultiWorkerPolicy {
    fn build(
        &self,
        builder: &dyn TreeBuilder,
        number_of_trees: Option<usize>,
        num_workers: Option<usize>,
    ) {
        let workers = num_workers
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1);

        thread::scope(|scope| {
            for worker_index in 0..workers {
                // distributes the remainder across the tail workers
                let trees = number_of_trees.map(|t| (t + worker_index) / workers);
                scope.spawn(move || builder.thread_build(trees, worker_index));
            }
        });
    }
}
