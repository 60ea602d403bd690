//! Criterion benchmarks for the validation and analytics hot paths.
//!
//! Benchmarks:
//! 1. Quality gate over OHLCV tables of increasing length
//! 2. Portfolio returns over aligned close series
//! 3. Correlation matrix (Pearson plus Jacobi eigen check)

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

use marketgate_core::analytics::{correlation_matrix, portfolio_returns};
use marketgate_core::data::{Field, Row, TimeSeriesTable};
use marketgate_core::QualityGate;

// ── Helpers ──────────────────────────────────────────────────────────

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()
}

fn make_ohlcv(n: usize, phase: f64) -> TimeSeriesTable {
    let rows = (0..n)
        .map(|i| {
            let close = 100.0 + ((i as f64 + phase) * 0.1).sin() * 10.0;
            Row::new(
                base_date() + chrono::Duration::days(i as i64),
                vec![
                    Some(close - 0.3),
                    Some(close + 1.5),
                    Some(close - 1.5),
                    Some(close),
                    Some(1_000_000.0 + (i % 500) as f64),
                ],
            )
        })
        .collect();
    TimeSeriesTable::new(Field::OHLCV.to_vec(), rows).unwrap()
}

// ── 1. Quality gate ──────────────────────────────────────────────────

fn bench_quality_gate(c: &mut Criterion) {
    let mut group = c.benchmark_group("quality_gate");
    let today = base_date() + chrono::Duration::days(2000);
    for n in [252usize, 1260, 5040] {
        let table = make_ohlcv(n, 0.0);
        group.bench_with_input(BenchmarkId::from_parameter(n), &table, |b, table| {
            b.iter(|| QualityGate.validate_as_of(black_box(table), "BENCH", today))
        });
    }
    group.finish();
}

// ── 2. Portfolio returns ─────────────────────────────────────────────

fn bench_portfolio_returns(c: &mut Criterion) {
    let tables: BTreeMap<String, TimeSeriesTable> = (0..10)
        .map(|k| (format!("T{k}"), make_ohlcv(1260, k as f64 * 7.0)))
        .collect();
    c.bench_function("portfolio_returns_10x1260", |b| {
        b.iter(|| portfolio_returns(black_box(&tables), None))
    });
}

// ── 3. Correlation matrix ────────────────────────────────────────────

fn bench_correlation(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlation_matrix");
    for assets in [5usize, 20, 50] {
        let labels: Vec<String> = (0..assets).map(|k| format!("T{k}")).collect();
        let columns: Vec<Vec<f64>> = (0..assets)
            .map(|k| make_ohlcv(253, k as f64 * 3.0).close_returns())
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(assets), &columns, |b, columns| {
            b.iter(|| correlation_matrix(&labels, black_box(columns)))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_quality_gate,
    bench_portfolio_returns,
    bench_correlation
);
criterion_main!(benches);
