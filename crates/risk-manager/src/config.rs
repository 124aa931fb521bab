//! Engine configuration.

use market_core::types::MarketRegime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, StopError};

/// Confidence tiers. High confidence tightens the stop, low confidence widens it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceTiers {
    /// Confidence at or above this is "high" (0-100).
    pub high_threshold: f64,
    /// Confidence at or below this is "low" (0-100).
    pub low_threshold: f64,
    pub high_multiplier: f64,
    pub medium_multiplier: f64,
    pub low_multiplier: f64,
}

impl ConfidenceTiers {
    /// Multiplier for a confidence score. Non-finite scores count as medium.
    pub fn multiplier_for(&self, confidence: f64) -> f64 {
        if !confidence.is_finite() {
            return self.medium_multiplier;
        }
        let confidence = confidence.clamp(0.0, 100.0);
        if confidence >= self.high_threshold {
            self.high_multiplier
        } else if confidence <= self.low_threshold {
            self.low_multiplier
        } else {
            self.medium_multiplier
        }
    }
}

impl Default for ConfidenceTiers {
    fn default() -> Self {
        Self {
            high_threshold: 75.0,
            low_threshold: 40.0,
            high_multiplier: 0.8,
            medium_multiplier: 1.0,
            low_multiplier: 1.3,
        }
    }
}

/// Per-regime distance multipliers, ordered tight to wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeMultipliers {
    pub bull: f64,
    pub bear: f64,
    pub range: f64,
    pub volatile: f64,
}

impl RegimeMultipliers {
    pub fn multiplier_for(&self, regime: MarketRegime) -> f64 {
        match regime {
            MarketRegime::Bull => self.bull,
            MarketRegime::Bear => self.bear,
            MarketRegime::Range => self.range,
            MarketRegime::Volatile => self.volatile,
        }
    }
}

impl Default for RegimeMultipliers {
    fn default() -> Self {
        Self {
            bull: 0.8,
            bear: 1.0,
            range: 1.2,
            volatile: 1.5,
        }
    }
}

/// Adjustments that depend on the position itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionAdjustments {
    /// Widen the stop for positions held longer than a day.
    pub holding_time_enabled: bool,
    /// Fractional widening per extra day held (0.1 = 10% wider per day).
    pub holding_time_multiplier: f64,
    /// Tighten the stop once the position is sufficiently in profit.
    pub profit_acceleration_enabled: bool,
    /// Unrealized P&L percentage that enables acceleration.
    pub profit_acceleration_threshold: f64,
    /// Distance is divided by this once acceleration applies.
    pub acceleration_factor: f64,
}

impl Default for PositionAdjustments {
    fn default() -> Self {
        Self {
            holding_time_enabled: true,
            holding_time_multiplier: 0.1,
            profit_acceleration_enabled: true,
            profit_acceleration_threshold: 10.0,
            acceleration_factor: 1.5,
        }
    }
}

/// Trailing-stop engine configuration.
///
/// All distances and adjustment limits are percentages. Changes apply from
/// the next computation onwards; nothing is recomputed retroactively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base trailing distance blended with the ATR distance.
    pub base_trailing_pct: f64,
    /// Scales ATR before it is converted to a percentage.
    pub volatility_multiplier: f64,
    /// Number of price differences averaged for ATR.
    pub atr_period: usize,
    pub min_stop_distance: f64,
    pub max_stop_distance: f64,
    pub confidence: ConfidenceTiers,
    pub regime_multipliers: RegimeMultipliers,
    pub position_adjustments: PositionAdjustments,
    /// Largest stop move allowed in a single update, relative to the current stop.
    pub max_stop_adjustment_pct: f64,
    /// Scheduler tick interval in seconds.
    pub update_frequency_secs: u64,
    /// Samples retained per symbol.
    pub price_history_capacity: usize,
    /// History entries retained per position.
    pub stop_history_capacity: usize,
    /// Mean-to-mean change that marks a trend (percent).
    pub trend_threshold_pct: f64,
    /// Volatility above this forces the VOLATILE regime (percent).
    pub volatile_regime_threshold: f64,
    /// Positions processed concurrently within one tick.
    pub max_concurrent_updates: usize,
    /// Event channel buffer. Only read when the engine is constructed.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_trailing_pct: 2.0,
            volatility_multiplier: 2.0,
            atr_period: 14,
            min_stop_distance: 0.5,
            max_stop_distance: 8.0,
            confidence: ConfidenceTiers::default(),
            regime_multipliers: RegimeMultipliers::default(),
            position_adjustments: PositionAdjustments::default(),
            max_stop_adjustment_pct: 2.0,
            update_frequency_secs: 30,
            price_history_capacity: 200,
            stop_history_capacity: 100,
            trend_threshold_pct: 5.0,
            volatile_regime_threshold: 5.0,
            max_concurrent_updates: 8,
            event_channel_capacity: 1000,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let config = Self {
            base_trailing_pct: env_or("TRAILING_BASE_PCT", d.base_trailing_pct),
            volatility_multiplier: env_or("TRAILING_VOLATILITY_MULTIPLIER", d.volatility_multiplier),
            atr_period: env_or("TRAILING_ATR_PERIOD", d.atr_period),
            min_stop_distance: env_or("TRAILING_MIN_STOP_DISTANCE", d.min_stop_distance),
            max_stop_distance: env_or("TRAILING_MAX_STOP_DISTANCE", d.max_stop_distance),
            confidence: ConfidenceTiers {
                high_threshold: env_or("TRAILING_CONFIDENCE_HIGH", d.confidence.high_threshold),
                low_threshold: env_or("TRAILING_CONFIDENCE_LOW", d.confidence.low_threshold),
                ..d.confidence
            },
            regime_multipliers: d.regime_multipliers,
            position_adjustments: PositionAdjustments {
                holding_time_enabled: std::env::var("TRAILING_HOLDING_TIME_ENABLED")
                    .map(|v| v != "false")
                    .unwrap_or(d.position_adjustments.holding_time_enabled),
                profit_acceleration_enabled: std::env::var("TRAILING_PROFIT_ACCELERATION_ENABLED")
                    .map(|v| v != "false")
                    .unwrap_or(d.position_adjustments.profit_acceleration_enabled),
                ..d.position_adjustments
            },
            max_stop_adjustment_pct: env_or("TRAILING_MAX_ADJUSTMENT_PCT", d.max_stop_adjustment_pct),
            update_frequency_secs: env_or("TRAILING_UPDATE_SECS", d.update_frequency_secs),
            price_history_capacity: d.price_history_capacity,
            stop_history_capacity: d.stop_history_capacity,
            trend_threshold_pct: d.trend_threshold_pct,
            volatile_regime_threshold: env_or(
                "TRAILING_VOLATILE_THRESHOLD",
                d.volatile_regime_threshold,
            ),
            max_concurrent_updates: env_or("TRAILING_MAX_CONCURRENT", d.max_concurrent_updates),
            event_channel_capacity: d.event_channel_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Scheduler tick interval.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_frequency_secs)
    }

    /// Clamp a distance into the configured bounds.
    pub fn clamp_distance(&self, distance: f64) -> f64 {
        distance.clamp(self.min_stop_distance, self.max_stop_distance)
    }

    /// Check that the configuration can be used by the engine.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(StopError::InvalidConfig {
                    message: format!("{} must be a positive number, got {}", name, value),
                })
            }
        }

        positive("base_trailing_pct", self.base_trailing_pct)?;
        positive("volatility_multiplier", self.volatility_multiplier)?;
        positive("min_stop_distance", self.min_stop_distance)?;
        positive("max_stop_distance", self.max_stop_distance)?;
        positive("max_stop_adjustment_pct", self.max_stop_adjustment_pct)?;
        positive("confidence.high_multiplier", self.confidence.high_multiplier)?;
        positive("confidence.medium_multiplier", self.confidence.medium_multiplier)?;
        positive("confidence.low_multiplier", self.confidence.low_multiplier)?;
        positive("regime_multipliers.bull", self.regime_multipliers.bull)?;
        positive("regime_multipliers.bear", self.regime_multipliers.bear)?;
        positive("regime_multipliers.range", self.regime_multipliers.range)?;
        positive("regime_multipliers.volatile", self.regime_multipliers.volatile)?;
        positive(
            "position_adjustments.acceleration_factor",
            self.position_adjustments.acceleration_factor,
        )?;

        if self.min_stop_distance > self.max_stop_distance {
            return Err(StopError::InvalidConfig {
                message: format!(
                    "min_stop_distance ({}) exceeds max_stop_distance ({})",
                    self.min_stop_distance, self.max_stop_distance
                ),
            });
        }
        if self.confidence.low_threshold > self.confidence.high_threshold {
            return Err(StopError::InvalidConfig {
                message: "confidence low_threshold exceeds high_threshold".to_string(),
            });
        }
        if !self.position_adjustments.holding_time_multiplier.is_finite()
            || self.position_adjustments.holding_time_multiplier < 0.0
        {
            return Err(StopError::InvalidConfig {
                message: "holding_time_multiplier must be non-negative".to_string(),
            });
        }
        for (name, value) in [
            ("atr_period", self.atr_period),
            ("update_frequency_secs", self.update_frequency_secs as usize),
            ("price_history_capacity", self.price_history_capacity),
            ("stop_history_capacity", self.stop_history_capacity),
            ("max_concurrent_updates", self.max_concurrent_updates),
            ("event_channel_capacity", self.event_channel_capacity),
        ] {
            if value == 0 {
                return Err(StopError::InvalidConfig {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }
        Ok(())
    }
}

/// Partial configuration update. Unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfigUpdate {
    pub base_trailing_pct: Option<f64>,
    pub volatility_multiplier: Option<f64>,
    pub atr_period: Option<usize>,
    pub min_stop_distance: Option<f64>,
    pub max_stop_distance: Option<f64>,
    pub confidence: Option<ConfidenceTiers>,
    pub regime_multipliers: Option<RegimeMultipliers>,
    pub position_adjustments: Option<PositionAdjustments>,
    pub max_stop_adjustment_pct: Option<f64>,
    pub update_frequency_secs: Option<u64>,
    pub price_history_capacity: Option<usize>,
    pub stop_history_capacity: Option<usize>,
    pub trend_threshold_pct: Option<f64>,
    pub volatile_regime_threshold: Option<f64>,
    pub max_concurrent_updates: Option<usize>,
}

impl EngineConfigUpdate {
    /// Produce a new config with this update applied on top of `base`.
    pub fn apply_to(&self, base: &EngineConfig) -> EngineConfig {
        let mut next = base.clone();
        if let Some(v) = self.base_trailing_pct {
            next.base_trailing_pct = v;
        }
        if let Some(v) = self.volatility_multiplier {
            next.volatility_multiplier = v;
        }
        if let Some(v) = self.atr_period {
            next.atr_period = v;
        }
        if let Some(v) = self.min_stop_distance {
            next.min_stop_distance = v;
        }
        if let Some(v) = self.max_stop_distance {
            next.max_stop_distance = v;
        }
        if let Some(v) = &self.confidence {
            next.confidence = v.clone();
        }
        if let Some(v) = &self.regime_multipliers {
            next.regime_multipliers = v.clone();
        }
        if let Some(v) = &self.position_adjustments {
            next.position_adjustments = v.clone();
        }
        if let Some(v) = self.max_stop_adjustment_pct {
            next.max_stop_adjustment_pct = v;
        }
        if let Some(v) = self.update_frequency_secs {
            next.update_frequency_secs = v;
        }
        if let Some(v) = self.price_history_capacity {
            next.price_history_capacity = v;
        }
        if let Some(v) = self.stop_history_capacity {
            next.stop_history_capacity = v;
        }
        if let Some(v) = self.trend_threshold_pct {
            next.trend_threshold_pct = v;
        }
        if let Some(v) = self.volatile_regime_threshold {
            next.volatile_regime_threshold = v;
        }
        if let Some(v) = self.max_concurrent_updates {
            next.max_concurrent_updates = v;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_regime_ordering() {
        let m = RegimeMultipliers::default();
        assert!(m.bull < m.bear);
        assert!(m.bear < m.range);
        assert!(m.range < m.volatile);
    }

    #[test]
    fn test_confidence_tiers() {
        let tiers = ConfidenceTiers::default();
        assert_eq!(tiers.multiplier_for(90.0), tiers.high_multiplier);
        assert_eq!(tiers.multiplier_for(75.0), tiers.high_multiplier);
        assert_eq!(tiers.multiplier_for(60.0), tiers.medium_multiplier);
        assert_eq!(tiers.multiplier_for(40.0), tiers.low_multiplier);
        assert_eq!(tiers.multiplier_for(-20.0), tiers.low_multiplier);
        assert_eq!(tiers.multiplier_for(f64::NAN), tiers.medium_multiplier);
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = EngineConfig {
            min_stop_distance: 9.0,
            max_stop_distance: 3.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StopError::InvalidConfig { .. })));
    }

    #[test]
    fn test_zero_period_rejected() {
        let config = EngineConfig {
            atr_period: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let base = EngineConfig::default();
        let update = EngineConfigUpdate {
            max_stop_adjustment_pct: Some(0.5),
            atr_period: Some(20),
            ..Default::default()
        };
        let next = update.apply_to(&base);
        assert_eq!(next.max_stop_adjustment_pct, 0.5);
        assert_eq!(next.atr_period, 20);
        assert_eq!(next.base_trailing_pct, base.base_trailing_pct);
        assert_eq!(next.confidence, base.confidence);
    }
}
