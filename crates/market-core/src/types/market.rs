//! Market condition and quote types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification of recent trend and volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    Bull,
    Bear,
    Range,
    Volatile,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketRegime::Bull => "BULL",
            MarketRegime::Bear => "BEAR",
            MarketRegime::Range => "RANGE",
            MarketRegime::Volatile => "VOLATILE",
        };
        f.write_str(s)
    }
}

/// Latest price quote returned by the price feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}
