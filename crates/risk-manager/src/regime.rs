//! Market regime classification from recent price behaviour.

use market_core::types::MarketRegime;

use crate::price_history::PriceHistoryStore;
use crate::volatility::volatility_pct;

/// Samples compared in each half of the trend window.
pub const REGIME_HALF_WINDOW: usize = 20;
/// Samples required before anything but RANGE is reported.
pub const MIN_REGIME_SAMPLES: usize = REGIME_HALF_WINDOW * 2;

/// Classifies the regime from the most recent 40 samples.
///
/// The mean of the latest 20 samples is compared against the mean of the 20
/// before them. High volatility overrides any trend.
#[derive(Debug, Clone, Copy)]
pub struct RegimeClassifier {
    /// Mean-to-mean change (percent) that counts as a trend.
    pub trend_threshold_pct: f64,
    /// Volatility (percent) above which the market is VOLATILE.
    pub volatile_threshold_pct: f64,
}

impl RegimeClassifier {
    pub fn new(trend_threshold_pct: f64, volatile_threshold_pct: f64) -> Self {
        Self {
            trend_threshold_pct,
            volatile_threshold_pct,
        }
    }

    pub fn classify(&self, prices: &[f64]) -> MarketRegime {
        if prices.len() < MIN_REGIME_SAMPLES {
            return MarketRegime::Range;
        }

        if volatility_pct(prices) > self.volatile_threshold_pct {
            return MarketRegime::Volatile;
        }

        let n = prices.len();
        let recent = &prices[n - REGIME_HALF_WINDOW..];
        let previous = &prices[n - MIN_REGIME_SAMPLES..n - REGIME_HALF_WINDOW];
        let recent_mean = recent.iter().sum::<f64>() / REGIME_HALF_WINDOW as f64;
        let previous_mean = previous.iter().sum::<f64>() / REGIME_HALF_WINDOW as f64;

        if previous_mean <= 0.0 {
            return MarketRegime::Range;
        }
        let change_pct = (recent_mean - previous_mean) / previous_mean * 100.0;

        if change_pct > self.trend_threshold_pct {
            MarketRegime::Bull
        } else if change_pct < -self.trend_threshold_pct {
            MarketRegime::Bear
        } else {
            MarketRegime::Range
        }
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new(5.0, 5.0)
    }
}

impl PriceHistoryStore {
    /// Regime for a symbol's recorded history.
    pub fn regime(&self, symbol: &str, classifier: &RegimeClassifier) -> MarketRegime {
        classifier.classify(&self.prices(symbol))
    }
}
