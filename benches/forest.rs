//! Benchmarks for forest build and query paths.
//!
//! Measures tree construction throughput and query latency across vector
//! dimensions; these two paths dominate real workloads.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

use copse::{Angular, ForestIndex, Kiss32Random};

fn random_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect()
}

fn built_index(vectors: &[Vec<f32>], trees: usize) -> ForestIndex<Angular, Kiss32Random> {
    let dim = vectors[0].len();
    let mut index = ForestIndex::new(Angular::new(dim), Kiss32Random::new(0));
    for (i, v) in vectors.iter().enumerate() {
        index.add_item(i as u32, v);
    }
    index.build(Some(trees), None);
    index
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(10);

    for dim in [16, 64, 128].iter() {
        let vectors = random_vectors(2000, *dim);
        group.throughput(Throughput::Elements(vectors.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |bench, _| {
            bench.iter(|| {
                let index = built_index(black_box(&vectors), 8);
                black_box(index.n_nodes())
            });
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    for dim in [16, 64, 128].iter() {
        let vectors = random_vectors(5000, *dim);
        let index = built_index(&vectors, 16);
        let mut ctx = index.create_context();
        let query = &vectors[123];

        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |bench, _| {
            bench.iter(|| {
                let (ids, _) =
                    index.get_nns_by_vector(black_box(query), 10, Some(400), &mut ctx);
                black_box(ids)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_query);
criterion_main!(benches);
