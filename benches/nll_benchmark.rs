use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use peakfit::{config::SampleConfig, likelihoods::NLL, sample::build_model};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn three_peak_nll_benchmark(c: &mut Criterion) {
    let config = SampleConfig::default();
    let model = build_model(&config).unwrap();
    let initial = model.initial_values();
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let dataset = model.generate(&initial, 100_000, &mut rng).unwrap();
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let n_threads: Vec<usize> = (0..)
        .map(|x| 1 << x)
        .take_while(|&p| p <= available)
        .collect();
    let mut group = c.benchmark_group("Three-peak NLL Performance");
    for threads in n_threads {
        let nll = NLL::new(&model, &dataset, Some(config.fit.range), threads).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &_threads| {
                let mut rng = ChaCha8Rng::seed_from_u64(1);
                b.iter_batched(
                    || {
                        initial
                            .iter()
                            .map(|v| v * rng.gen_range(0.99..1.01))
                            .collect::<Vec<f64>>()
                    },
                    |p| black_box(nll.evaluate(&p)),
                    BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10)).sample_size(200);
    targets = three_peak_nll_benchmark
}
criterion_main!(benches);
