//! Benchmarks for the regression and correlation kernels.
//!
//! Run with: cargo bench -p riskline-math

use std::hint::black_box;

use chrono::{Duration, NaiveDate};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use riskline_math::regression::RegressionEngine;
use riskline_math::stats::{align_returns, pearson, simple_returns, ReturnSeries};

// =============================================================================
// TEST DATA GENERATORS
// =============================================================================

/// Deterministic pseudo-random returns in roughly [-2%, 2%].
fn generate_returns(n: usize, seed: u64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let hash = simple_hash(seed, i as u64);
            ((hash % 4001) as f64 - 2000.0) / 100_000.0
        })
        .collect()
}

fn simple_hash(seed: u64, i: u64) -> u64 {
    let mut h = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(i);
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h
}

fn generate_series(n: usize, seed: u64) -> ReturnSeries {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut price = 100.0;
    let closes: Vec<(NaiveDate, f64)> = generate_returns(n + 1, seed)
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            price *= 1.0 + r;
            (start + Duration::days(i as i64), price)
        })
        .collect();
    simple_returns(&closes)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_single_factor_regression(c: &mut Criterion) {
    let mut group = c.benchmark_group("regression");
    let engine = RegressionEngine::new(20);

    for size in &[20usize, 90, 150, 500] {
        let x = generate_returns(*size, 1);
        let y: Vec<f64> = x
            .iter()
            .zip(generate_returns(*size, 2))
            .map(|(m, e)| 1.1 * m + 0.3 * e)
            .collect();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &(x, y), |b, (x, y)| {
            b.iter(|| engine.run_single_factor_regression(black_box(y), black_box(x), 3.0, 0.95));
        });
    }

    group.finish();
}

fn bench_correlation_matrix(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlation_matrix");
    group.sample_size(30);

    for symbols in &[10usize, 25, 50] {
        let series: Vec<ReturnSeries> =
            (0..*symbols).map(|i| generate_series(90, i as u64)).collect();
        let pairs = symbols * (symbols - 1) / 2;

        group.throughput(Throughput::Elements(pairs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(symbols), &series, |b, series| {
            b.iter(|| {
                let mut total = 0.0;
                for i in 0..series.len() {
                    for j in (i + 1)..series.len() {
                        let (a, b) = align_returns(&series[i], &series[j]);
                        total += pearson(&a, &b).unwrap_or(0.0);
                    }
                }
                black_box(total)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_factor_regression, bench_correlation_matrix);
criterion_main!(benches);
