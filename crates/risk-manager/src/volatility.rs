//! Volatility and simplified ATR estimation from close-to-close prices.

use crate::price_history::PriceHistoryStore;

/// Volatility reported until enough samples exist (percent).
pub const DEFAULT_VOLATILITY_PCT: f64 = 2.0;
/// Samples needed before volatility is measured instead of assumed.
pub const MIN_VOLATILITY_SAMPLES: usize = 10;
pub const MIN_VOLATILITY_PCT: f64 = 0.5;
pub const MAX_VOLATILITY_PCT: f64 = 10.0;

/// Simplified Average True Range: mean absolute close-to-close move over the
/// last `period` differences.
///
/// With fewer than `period + 1` samples the last price scaled by the current
/// volatility stands in, so a cold start still yields a usable value. An
/// empty series yields zero.
pub fn average_true_range(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return match prices.last() {
            Some(last) => last * volatility_pct(prices) * 0.01,
            None => 0.0,
        };
    }

    let window = &prices[prices.len() - (period + 1)..];
    let total: f64 = window.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    total / period as f64
}

/// Standard deviation of percentage returns, in percent, clamped to
/// `[MIN_VOLATILITY_PCT, MAX_VOLATILITY_PCT]`.
pub fn volatility_pct(prices: &[f64]) -> f64 {
    if prices.len() < MIN_VOLATILITY_SAMPLES {
        return DEFAULT_VOLATILITY_PCT;
    }

    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0] * 100.0)
        .collect();
    if returns.is_empty() {
        return DEFAULT_VOLATILITY_PCT;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if !std_dev.is_finite() {
        return DEFAULT_VOLATILITY_PCT;
    }
    std_dev.clamp(MIN_VOLATILITY_PCT, MAX_VOLATILITY_PCT)
}

impl PriceHistoryStore {
    /// ATR for a symbol's recorded history.
    pub fn atr(&self, symbol: &str, period: usize) -> f64 {
        average_true_range(&self.prices(symbol), period)
    }

    /// Volatility for a symbol's recorded history.
    pub fn volatility(&self, symbol: &str) -> f64 {
        volatility_pct(&self.prices(symbol))
    }
}
