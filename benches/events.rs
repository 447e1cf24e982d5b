use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use edmd::core::{Domain, Simulation};

fn dense_gas(n: usize, seed: u64) -> Simulation {
    let l = (n as f64 / 0.05).cbrt();
    let domain = Domain::periodic([l, l, l]).unwrap();
    Simulation::random_gas(domain, n, 0.3, 1.0, 1.0, seed).unwrap()
}

fn bench_event_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_throughput");
    for &n in &[64usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || dense_gas(n, 9001),
                |mut sim| sim.run_events(1000).unwrap(),
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_initial_prediction(c: &mut Criterion) {
    c.bench_function("initial_prediction_256", |b| {
        b.iter(|| dense_gas(256, 1234));
    });
}

criterion_group!(benches, bench_event_throughput, bench_initial_prediction);
criterion_main!(benches);
