use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use ld_reweight::bootstrap::Bootstrap;
use ld_reweight::histogram::{BinEdges, BinningPolicy};

fn samples(n: usize) -> Vec<f64> {
    let mut rng = SmallRng::seed_from_u64(42);
    (0..n).map(|_| rng.gen_range(0..500) as f64).collect()
}

fn bench_bootstrap_histogram(c: &mut Criterion) {
    let mut group = c.benchmark_group("bootstrap_histogram");
    for &n in &[1_000usize, 10_000, 100_000] {
        let data = samples(n);
        let edges = BinningPolicy::default()
            .edges(&data)
            .unwrap_or_else(|_| BinEdges::linear(0.0, 500.0, 50).unwrap());
        let bs = Bootstrap::new(100);
        group.bench_with_input(BenchmarkId::from_parameter(n), &data, |b, data| {
            b.iter(|| bs.histogram(black_box(data), &edges))
        });
    }
    group.finish();
}

fn bench_bootstrap_mean(c: &mut Criterion) {
    let data = samples(10_000);
    let bs = Bootstrap::new(100);
    c.bench_function("bootstrap_mean_10k", |b| b.iter(|| bs.mean(black_box(&data))));
}

criterion_group!(benches, bench_bootstrap_histogram, bench_bootstrap_mean);
criterion_main!(benches);
