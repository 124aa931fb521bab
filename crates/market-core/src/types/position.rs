//! Open position as reported by the execution subsystem.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Whether `candidate` is strictly better than `reference` for this side.
    ///
    /// Higher is better for longs, lower is better for shorts.
    pub fn is_more_favorable(&self, candidate: f64, reference: f64) -> bool {
        match self {
            PositionSide::Long => candidate > reference,
            PositionSide::Short => candidate < reference,
        }
    }

    /// Stop price sitting `distance_pct` percent away from `price` on the losing side.
    pub fn stop_from(&self, price: f64, distance_pct: f64) -> f64 {
        match self {
            PositionSide::Long => price * (1.0 - distance_pct / 100.0),
            PositionSide::Short => price * (1.0 + distance_pct / 100.0),
        }
    }

    /// Unrealized return of a move from `entry` to `current`, in percent.
    pub fn pnl_pct(&self, entry: f64, current: f64) -> f64 {
        if entry <= 0.0 {
            return 0.0;
        }
        match self {
            PositionSide::Long => (current - entry) / entry * 100.0,
            PositionSide::Short => (entry - current) / entry * 100.0,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// An open position handed over when it is filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique identifier for this position.
    pub id: Uuid,
    /// Trading symbol, e.g. `BTCUSDT` or `AAPL`.
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    /// Last price seen by the execution subsystem.
    pub current_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub unrealized_pnl: Decimal,
    #[serde(default)]
    pub unrealized_pnl_pct: Decimal,
}

impl Position {
    /// Create a freshly opened position with no unrealized P&L.
    pub fn new(
        symbol: impl Into<String>,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            current_price: entry_price,
            stop_loss: None,
            take_profit: None,
            created_at: Utc::now(),
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
        }
    }

    /// Entry price as a float, zero if it cannot be represented.
    pub fn entry_price_f64(&self) -> f64 {
        self.entry_price.to_f64().unwrap_or(0.0)
    }

    /// Current price as a float, falling back to the entry price.
    pub fn current_price_f64(&self) -> f64 {
        match self.current_price.to_f64() {
            Some(p) if p > 0.0 => p,
            _ => self.entry_price_f64(),
        }
    }
}
