//! Trailing distance calculation.
//!
//! The distance (percent of price between the market and the stop) is built
//! in stages:
//!
//! 1. blend the base distance with the ATR distance, clamp
//! 2. scale by signal confidence
//! 3. scale by market regime
//! 4. adjust for holding time and unrealized profit (positions only)
//! 5. clamp to `[min_stop_distance, max_stop_distance]`
//!
//! Every stage is total. A stage that produces a non-finite or non-positive
//! value is discarded and the previous value carries forward.

use market_core::types::MarketRegime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::EngineConfig;

/// Hours a position may be held before the stop starts widening.
pub const HOLDING_GRACE_HOURS: f64 = 24.0;

/// Market inputs for one distance computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DistanceInputs {
    pub current_price: f64,
    pub atr: f64,
    /// Signal confidence, 0-100.
    pub confidence: f64,
    pub regime: MarketRegime,
}

/// Position-specific inputs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionContext {
    pub holding_hours: f64,
    pub unrealized_pnl_pct: f64,
}

/// Computes trailing distances against a config snapshot.
pub struct DistanceCalculator<'a> {
    config: &'a EngineConfig,
}

fn carry(stage: &'static str, previous: f64, next: f64) -> f64 {
    if next.is_finite() && next > 0.0 {
        next
    } else {
        warn!(stage = stage, previous = previous, rejected = next, "Distance stage fault, keeping previous value");
        previous
    }
}

impl<'a> DistanceCalculator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Stage 1: average of the base distance and the ATR distance, clamped.
    pub fn base_distance(&self, current_price: f64, atr: f64) -> f64 {
        let fallback = self.config.clamp_distance(self.config.base_trailing_pct);
        if !(current_price.is_finite() && current_price > 0.0) || !atr.is_finite() || atr < 0.0 {
            warn!(current_price = current_price, atr = atr, "Unusable ATR input, using base distance");
            return fallback;
        }
        let atr_pct = atr * self.config.volatility_multiplier / current_price * 100.0;
        let blended = (self.config.base_trailing_pct + atr_pct) / 2.0;
        if !blended.is_finite() {
            return fallback;
        }
        self.config.clamp_distance(blended)
    }

    /// Stage 2.
    pub fn apply_confidence(&self, distance: f64, confidence: f64) -> f64 {
        carry(
            "confidence",
            distance,
            distance * self.config.confidence.multiplier_for(confidence),
        )
    }

    /// Stage 3.
    pub fn apply_regime(&self, distance: f64, regime: MarketRegime) -> f64 {
        carry(
            "regime",
            distance,
            distance * self.config.regime_multipliers.multiplier_for(regime),
        )
    }

    /// Stage 4. Holding beyond a day widens, large unrealized profit tightens.
    pub fn apply_position(&self, distance: f64, position: &PositionContext) -> f64 {
        let adj = &self.config.position_adjustments;
        let mut distance = distance;

        if adj.holding_time_enabled && position.holding_hours > HOLDING_GRACE_HOURS {
            let extra_days = (position.holding_hours - HOLDING_GRACE_HOURS) / HOLDING_GRACE_HOURS;
            let widened = distance * (1.0 + extra_days * adj.holding_time_multiplier);
            distance = carry("holding_time", distance, widened);
        }

        if adj.profit_acceleration_enabled
            && position.unrealized_pnl_pct > adj.profit_acceleration_threshold
        {
            distance = carry(
                "profit_acceleration",
                distance,
                distance / adj.acceleration_factor,
            );
        }

        distance
    }

    /// Stage 5.
    pub fn finalize(&self, distance: f64) -> f64 {
        if distance.is_finite() {
            self.config.clamp_distance(distance)
        } else {
            self.config.clamp_distance(self.config.base_trailing_pct)
        }
    }

    /// Full pipeline for a tracked position.
    pub fn trailing_distance(&self, inputs: &DistanceInputs, position: Option<&PositionContext>) -> f64 {
        let mut distance = self.base_distance(inputs.current_price, inputs.atr);
        distance = self.apply_confidence(distance, inputs.confidence);
        distance = self.apply_regime(distance, inputs.regime);
        if let Some(position) = position {
            distance = self.apply_position(distance, position);
        }
        self.finalize(distance)
    }

    /// Pipeline without position context, for sizing a stop before entry.
    pub fn optimal_distance(&self, inputs: &DistanceInputs) -> f64 {
        self.trailing_distance(inputs, None)
    }
}
