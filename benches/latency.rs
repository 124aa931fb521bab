//! Latency benchmarks for the per-position stop math.
//!
//! Run with: `cargo bench --bench latency`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use market_core::types::{MarketRegime, Position, PositionSide};
use risk_manager::regime::RegimeClassifier;
use risk_manager::stop_state::validate_stop_price;
use risk_manager::volatility::{average_true_range, volatility_pct};
use risk_manager::{DistanceCalculator, DistanceInputs, EngineConfig, PositionContext, StopState};
use rust_decimal::Decimal;

/// Deterministic sawtooth series around `base`.
fn generate_series(base: f64, len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| base * (1.0 + ((i % 7) as f64 - 3.0) * 0.002 + i as f64 * 0.0005))
        .collect()
}

fn bench_volatility(c: &mut Criterion) {
    let mut group = c.benchmark_group("volatility");

    for len in [20, 50, 200].iter() {
        let series = generate_series(50000.0, *len);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("atr", len), &series, |b, series| {
            b.iter(|| black_box(average_true_range(black_box(series), 14)))
        });
        group.bench_with_input(BenchmarkId::new("volatility_pct", len), &series, |b, series| {
            b.iter(|| black_box(volatility_pct(black_box(series))))
        });
    }

    group.finish();
}

fn bench_regime(c: &mut Criterion) {
    let classifier = RegimeClassifier::new(5.0, 5.0);
    let series = generate_series(50000.0, 200);

    c.bench_function("regime_classify", |b| {
        b.iter(|| black_box(classifier.classify(black_box(&series))))
    });
}

fn bench_distance(c: &mut Criterion) {
    let mut group = c.benchmark_group("distance");
    let config = EngineConfig::default();
    let calc = DistanceCalculator::new(&config);
    let inputs = DistanceInputs {
        current_price: 52000.0,
        atr: 300.0,
        confidence: 80.0,
        regime: MarketRegime::Bull,
    };
    let context = PositionContext {
        holding_hours: 72.0,
        unrealized_pnl_pct: 12.0,
    };

    group.bench_function("trailing", |b| {
        b.iter(|| black_box(calc.trailing_distance(black_box(&inputs), Some(&context))))
    });
    group.bench_function("optimal", |b| {
        b.iter(|| black_box(calc.optimal_distance(black_box(&inputs))))
    });

    group.finish();
}

fn bench_validate_stop(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_stop");

    let long = Position::new("BTCUSDT", PositionSide::Long, Decimal::ONE, Decimal::new(50000, 0));
    let long_state = StopState::new(&long, 49000.0);
    let short = Position::new("BTCUSDT", PositionSide::Short, Decimal::ONE, Decimal::new(50000, 0));
    let short_state = StopState::new(&short, 51000.0);

    group.bench_function("long_tighten", |b| {
        b.iter(|| black_box(validate_stop_price(black_box(50500.0), &long_state, 2.0)))
    });
    group.bench_function("long_loosen_rejected", |b| {
        b.iter(|| black_box(validate_stop_price(black_box(48000.0), &long_state, 2.0)))
    });
    group.bench_function("short_tighten", |b| {
        b.iter(|| black_box(validate_stop_price(black_box(50250.0), &short_state, 2.0)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_volatility,
    bench_regime,
    bench_distance,
    bench_validate_stop,
);

criterion_main!(benches);
