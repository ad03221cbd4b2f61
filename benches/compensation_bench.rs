//! Benchmarks for kernel estimation and electrode compensation.
//!
//! Run with: cargo bench --bench compensation_bench

use aec_core::aec::aec_compensate;
use aec_core::kernel_decomposition::KernelDecomposer;
use aec_core::kernel_estimation::KernelEstimator;
use aec_core::lp_compensation::{lp_compensate, CircuitParameters, LpConfig, SliceFailurePolicy};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn white_noise(n: usize, seed: u64) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f64) / (u32::MAX as f64) * 2.0 - 1.0
        })
        .collect()
}

fn synth_recording(n: usize, ksize: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let k: Vec<f64> = (0..ksize).map(|t| 3.0 * (-(t as f64) / 4.0).exp()).collect();
    let i = white_noise(n, 12345);
    let v: Vec<f64> = (0..n)
        .map(|s| {
            let mut acc = -70.0;
            for (j, &kj) in k.iter().enumerate() {
                if s >= j {
                    acc += kj * i[s - j];
                }
            }
            acc
        })
        .collect();
    (i, v, k)
}

fn bench_full_kernel(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_kernel");
    let n = 10_000;

    for ksize in [16, 32, 64] {
        let (i, v, _) = synth_recording(n, ksize);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(ksize), &ksize, |b, &ksize| {
            let estimator = KernelEstimator::new(ksize);
            b.iter(|| estimator.full_kernel(black_box(&v), black_box(&i)).unwrap())
        });
    }

    group.finish();
}

fn bench_decomposition(c: &mut Criterion) {
    let ksize = 128;
    let start_tail = 32;
    let k: Vec<f64> = (0..ksize)
        .map(|t| {
            let km = 0.5 * (-(t as f64) / 80.0).exp();
            if t < start_tail {
                km + 4.0 * (-(t as f64) / 6.0).exp()
            } else {
                km
            }
        })
        .collect();

    c.bench_function("electrode_kernel_soma", |b| {
        let decomposer = KernelDecomposer::default();
        b.iter(|| {
            decomposer
                .electrode_kernel_soma(black_box(&k), start_tail)
                .unwrap()
        })
    });
}

fn bench_aec_compensate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aec_compensate");
    let n = 100_000;
    let (i, v, k) = synth_recording(n, 32);

    group.throughput(Throughput::Elements(n as u64));
    group.bench_function("32_taps", |b| {
        b.iter(|| aec_compensate(black_box(&v), black_box(&i), black_box(&k)).unwrap())
    });

    group.finish();
}

fn bench_lp_compensate(c: &mut Criterion) {
    let dt = 1e-4;
    let n = 500;
    let truth = CircuitParameters {
        r: 5e7,
        tau: 0.02,
        vr: -0.07,
        re: 2e7,
        taue: 5e-4,
    };
    let i: Vec<f64> = white_noise(n, 777).iter().map(|x| 1e-10 * x).collect();
    let v = truth.response(&i, dt);
    let config = LpConfig {
        max_iterations: 500,
        tolerance: 1e-6,
        on_failure: SliceFailurePolicy::KeepRaw,
        ..LpConfig::default()
    };

    c.bench_function("lp_compensate_single_slice", |b| {
        b.iter(|| lp_compensate(black_box(&i), black_box(&v), dt, &config).unwrap())
    });
}

criterion_group!(
    benches,
    bench_full_kernel,
    bench_decomposition,
    bench_aec_compensate,
    bench_lp_compensate
);
criterion_main!(benches);
