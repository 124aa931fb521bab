//! Integration tests for component interactions.
//!
//! These tests drive the trailing stop engine through its public API with
//! in-memory market collaborators.

use async_trait::async_trait;
use market_core::types::{MarketRegime, Position, PositionSide};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use risk_manager::{
    ConfidenceSource, EngineConfig, EngineConfigUpdate, FixedConfidence, PriceSource, StopError,
    StopEvent, TickSummary, TrailingStopEngine,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Settable last-trade prices with per-symbol outages.
#[derive(Default)]
struct MarketPrices {
    prices: Mutex<HashMap<String, f64>>,
    down: Mutex<HashSet<String>>,
}

impl MarketPrices {
    fn set(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    fn outage(&self, symbol: &str) {
        self.down.lock().unwrap().insert(symbol.to_string());
    }
}

#[async_trait]
impl PriceSource for MarketPrices {
    async fn price(&self, symbol: &str) -> anyhow::Result<f64> {
        if self.down.lock().unwrap().contains(symbol) {
            anyhow::bail!("feed unavailable for {}", symbol);
        }
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no price for {}", symbol))
    }
}

/// Confidence source that is always down.
struct Unavailable;

#[async_trait]
impl ConfidenceSource for Unavailable {
    async fn confidence(&self, _symbol: &str) -> anyhow::Result<f64> {
        anyhow::bail!("scoring service unavailable")
    }
}

fn setup(config: EngineConfig) -> (Arc<TrailingStopEngine>, Arc<MarketPrices>) {
    let prices = Arc::new(MarketPrices::default());
    let engine = TrailingStopEngine::new(config, prices.clone(), Arc::new(FixedConfidence(60.0)))
        .expect("valid config");
    (Arc::new(engine), prices)
}

fn position(symbol: &str, side: PositionSide, entry: i64) -> Position {
    Position::new(symbol, side, Decimal::ONE, Decimal::new(entry, 0))
}

fn assert_balanced(summary: &TickSummary) {
    assert_eq!(
        summary.processed,
        summary.updated + summary.unchanged + summary.skipped + summary.failed
    );
}

/// Random walk a single position and check every committed move.
async fn random_walk(side: PositionSide, seed: u64) {
    let config = EngineConfig::default();
    let max_step_pct = config.max_stop_adjustment_pct;
    let (engine, prices) = setup(config);

    let pos = position("BTCUSDT", side, 100);
    let initial_stop = side.stop_from(100.0, 3.0);
    prices.set("BTCUSDT", 100.0);
    engine.add_position(&pos, initial_stop, None).await.unwrap();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = 100.0;
    let mut prev = initial_stop;
    for _ in 0..300 {
        price *= 1.0 + rng.gen_range(-0.02..0.02);
        prices.set("BTCUSDT", price);
        let summary = engine.update_all_stops().await;
        assert_balanced(&summary);

        let stop = engine.stop_data(pos.id).unwrap().current_stop_price;
        let step = (stop - prev).abs();
        match side {
            PositionSide::Long => assert!(stop >= prev - 1e-9, "long stop fell {} -> {}", prev, stop),
            PositionSide::Short => assert!(stop <= prev + 1e-9, "short stop rose {} -> {}", prev, stop),
        }
        assert!(
            step <= prev * max_step_pct / 100.0 + 1e-9,
            "step {} exceeds limit from {}",
            step,
            prev
        );
        prev = stop;
    }

    let state = engine.stop_data(pos.id).unwrap();
    assert!(state.history.len() <= EngineConfig::default().stop_history_capacity);
    assert_eq!(state.original_stop_price, initial_stop);
}

#[tokio::test]
async fn test_long_stop_never_loosens_on_random_walk() {
    for seed in [1, 7, 42] {
        random_walk(PositionSide::Long, seed).await;
    }
}

#[tokio::test]
async fn test_short_stop_never_loosens_on_random_walk() {
    for seed in [3, 11, 99] {
        random_walk(PositionSide::Short, seed).await;
    }
}

#[tokio::test]
async fn test_distance_always_within_bounds() {
    let (engine, prices) = setup(EngineConfig::default());
    let pos = position("ETHUSDT", PositionSide::Long, 3000);
    prices.set("ETHUSDT", 3000.0);

    let mut rng = StdRng::seed_from_u64(5);
    let seed: Vec<f64> = (0..120).map(|_| rng.gen_range(2000.0..4000.0)).collect();
    engine.add_position(&pos, 2900.0, Some(&seed)).await.unwrap();

    let regimes = [
        MarketRegime::Bull,
        MarketRegime::Bear,
        MarketRegime::Range,
        MarketRegime::Volatile,
    ];
    for _ in 0..200 {
        let price = rng.gen_range(1000.0..6000.0);
        let confidence = rng.gen_range(0.0..100.0);
        let regime = regimes[rng.gen_range(0..regimes.len())];
        let calc = engine
            .calculate_trailing_stop_with(pos.id, price, Some(confidence), Some(regime))
            .await
            .unwrap();
        assert!(
            (0.5..=8.0).contains(&calc.distance_pct),
            "distance {} out of bounds",
            calc.distance_pct
        );
    }
}

#[tokio::test]
async fn test_higher_confidence_never_widens() {
    let (engine, prices) = setup(EngineConfig::default());
    let pos = position("BTCUSDT", PositionSide::Long, 50000);
    prices.set("BTCUSDT", 50000.0);
    engine.add_position(&pos, 49000.0, None).await.unwrap();

    let mut last = f64::INFINITY;
    for confidence in [0.0, 20.0, 39.9, 40.0, 60.0, 74.9, 75.0, 90.0, 100.0] {
        let calc = engine
            .calculate_trailing_stop_with(pos.id, 50000.0, Some(confidence), Some(MarketRegime::Range))
            .await
            .unwrap();
        assert!(calc.distance_pct <= last + 1e-12);
        last = calc.distance_pct;
    }
}

#[tokio::test]
async fn test_regime_ordering() {
    let (engine, prices) = setup(EngineConfig::default());
    let pos = position("BTCUSDT", PositionSide::Long, 50000);
    prices.set("BTCUSDT", 50000.0);
    engine.add_position(&pos, 49000.0, None).await.unwrap();

    let mut distances = Vec::new();
    for regime in [
        MarketRegime::Bull,
        MarketRegime::Bear,
        MarketRegime::Range,
        MarketRegime::Volatile,
    ] {
        let calc = engine
            .calculate_trailing_stop_with(pos.id, 50000.0, Some(50.0), Some(regime))
            .await
            .unwrap();
        distances.push(calc.distance_pct);
    }
    assert!(distances.windows(2).all(|w| w[0] <= w[1]), "{:?}", distances);
}

#[tokio::test]
async fn test_rally_tightens_long_stop() {
    let (engine, prices) = setup(EngineConfig::default());
    let pos = position("BTCUSDT", PositionSide::Long, 50000);
    prices.set("BTCUSDT", 50000.0);
    engine.add_position(&pos, 48000.0, None).await.unwrap();

    let mut price = 50000.0;
    for _ in 0..10 {
        price *= 1.01;
        prices.set("BTCUSDT", price);
        engine.update_all_stops().await;
    }

    let state = engine.stop_data(pos.id).unwrap();
    assert!(state.current_stop_price > 48000.0);
    assert!(state.current_stop_price < price);
    assert!(state.update_count >= 1);
    assert!((state.favorable_extreme - price).abs() < 1e-6);
}

#[tokio::test]
async fn test_failing_symbol_isolated() {
    let (engine, prices) = setup(EngineConfig::default());
    let btc = position("BTCUSDT", PositionSide::Long, 50000);
    let eth = position("ETHUSDT", PositionSide::Long, 3000);
    prices.set("BTCUSDT", 50000.0);
    prices.set("ETHUSDT", 3000.0);
    engine.add_position(&btc, 48000.0, None).await.unwrap();
    engine.add_position(&eth, 2900.0, None).await.unwrap();

    prices.outage("ETHUSDT");
    prices.set("BTCUSDT", 52000.0);
    let summary = engine.update_all_stops().await;

    assert_balanced(&summary);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(engine.stop_data(eth.id).unwrap().current_stop_price, 2900.0);
    assert!(engine.stop_data(btc.id).unwrap().current_stop_price > 48000.0);
}

#[tokio::test]
async fn test_add_with_confidence_outage_uses_neutral() {
    let prices = Arc::new(MarketPrices::default());
    let engine =
        TrailingStopEngine::new(EngineConfig::default(), prices.clone(), Arc::new(Unavailable)).unwrap();
    let pos = position("BTCUSDT", PositionSide::Short, 50000);

    let state = engine.add_position(&pos, 51000.0, None).await.unwrap();
    assert_eq!(state.last_confidence, 50.0);

    // Ticks fail while confidence is down, the stop stays put.
    prices.set("BTCUSDT", 49000.0);
    let summary = engine.update_all_stops().await;
    assert_eq!(summary.failed, 1);
    assert_eq!(engine.stop_data(pos.id).unwrap().current_stop_price, 51000.0);
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let (engine, _prices) = setup(EngineConfig::default());
    let pos = position("BTCUSDT", PositionSide::Long, 50000);

    assert!(matches!(
        engine.add_position(&pos, f64::NAN, None).await,
        Err(StopError::InvalidStop { .. })
    ));
    engine.add_position(&pos, 49000.0, None).await.unwrap();
    assert!(matches!(
        engine.add_position(&pos, 49000.0, None).await,
        Err(StopError::AlreadyTracked(id)) if id == pos.id
    ));

    let removed = engine.remove_position(pos.id).unwrap();
    assert!(!removed.active);
    assert!(engine.remove_position(pos.id).is_none());
    assert!(matches!(
        engine.calculate_trailing_stop(pos.id, 50000.0).await,
        Err(StopError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_config_update_rejected() {
    let (engine, _prices) = setup(EngineConfig::default());
    let before = engine.config().await;

    let bad = EngineConfigUpdate {
        min_stop_distance: Some(9.0),
        max_stop_distance: Some(3.0),
        ..Default::default()
    };
    assert!(matches!(
        engine.update_config(bad).await,
        Err(StopError::InvalidConfig { .. })
    ));
    assert_eq!(engine.config().await.min_stop_distance, before.min_stop_distance);

    let good = EngineConfigUpdate {
        max_stop_distance: Some(5.0),
        ..Default::default()
    };
    let after = engine.update_config(good).await.unwrap();
    assert_eq!(after.max_stop_distance, 5.0);
    assert_eq!(after.base_trailing_pct, before.base_trailing_pct);
}

#[tokio::test]
async fn test_events_follow_lifecycle() {
    let (engine, prices) = setup(EngineConfig::default());
    let mut rx = engine.subscribe();
    let pos = position("BTCUSDT", PositionSide::Long, 50000);
    prices.set("BTCUSDT", 50000.0);

    engine.add_position(&pos, 48000.0, None).await.unwrap();
    prices.set("BTCUSDT", 53000.0);
    engine.update_all_stops().await;
    engine.remove_position(pos.id);

    match rx.recv().await.unwrap() {
        StopEvent::PositionAdded { position_id, initial_stop, .. } => {
            assert_eq!(position_id, pos.id);
            assert_eq!(initial_stop, 48000.0);
        }
        other => panic!("unexpected event {:?}", other),
    }
    match rx.recv().await.unwrap() {
        StopEvent::StopUpdated { position_id, old_stop, new_stop, .. } => {
            assert_eq!(position_id, pos.id);
            assert_eq!(old_stop, 48000.0);
            assert!(new_stop > old_stop);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(rx.recv().await.unwrap(), StopEvent::PositionRemoved { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_remove_during_ticks() {
    let (engine, prices) = setup(EngineConfig::default());
    for i in 0..10 {
        prices.set(&format!("SYM{}", i), 100.0 + i as f64);
    }

    let ticker = {
        let engine = Arc::clone(&engine);
        let prices = Arc::clone(&prices);
        tokio::spawn(async move {
            for n in 0..50 {
                for i in 0..10 {
                    prices.set(&format!("SYM{}", i), 100.0 + i as f64 + n as f64 * 0.1);
                }
                let summary = engine.update_all_stops().await;
                assert_balanced(&summary);
                tokio::task::yield_now().await;
            }
        })
    };

    let mut kept = Vec::new();
    let mut removed = Vec::new();
    for i in 0..200 {
        let pos = position(&format!("SYM{}", i % 10), PositionSide::Long, 100);
        engine.add_position(&pos, 95.0, None).await.unwrap();
        if i % 3 == 0 {
            engine.remove_position(pos.id);
            removed.push(pos.id);
        } else {
            kept.push(pos.id);
        }
        tokio::task::yield_now().await;
    }

    ticker.await.unwrap();

    assert_eq!(engine.active_stops().len(), kept.len());
    assert!(kept.iter().all(|id| engine.is_tracking(*id)));
    assert!(removed.iter().all(|id| !engine.is_tracking(*id)));
    for state in engine.active_stops() {
        assert!(state.current_stop_price >= 95.0);
    }
}

#[tokio::test]
async fn test_stats_average_per_position() {
    let (engine, prices) = setup(EngineConfig::default());
    let a = position("BTCUSDT", PositionSide::Long, 50000);
    let b = position("BTCUSDT", PositionSide::Long, 50000);
    prices.set("BTCUSDT", 50000.0);
    engine.add_position(&a, 48000.0, None).await.unwrap();
    engine.add_position(&b, 48000.0, None).await.unwrap();

    prices.set("BTCUSDT", 52000.0);
    engine.update_all_stops().await;

    let stats = engine.stats().await;
    assert_eq!(stats.active_positions, 2);
    assert_eq!(stats.total_updates, 2);
    assert!((stats.average_update_frequency - 1.0).abs() < 1e-12);
    assert_eq!(stats.system_uptime_secs, 0);
}
