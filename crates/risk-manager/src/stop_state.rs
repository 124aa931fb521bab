//! Per-position trailing stop state.

use chrono::{DateTime, Utc};
use market_core::types::{MarketRegime, Position, PositionSide};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::distance::PositionContext;

/// Minimum stop movement that counts as an update.
pub const STOP_EPSILON: f64 = 1e-4;

/// Snapshot of the inputs behind one stop change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub stop_price: f64,
    pub reason: String,
    pub atr: f64,
    pub confidence: f64,
    pub regime: MarketRegime,
}

/// Trailing stop state for one open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopState {
    pub position_id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub current_stop_price: f64,
    pub original_stop_price: f64,
    /// Highest price seen for longs, lowest for shorts.
    pub favorable_extreme: f64,
    /// Distance used for the last committed stop (percent).
    pub trailing_pct: f64,
    pub update_count: u64,
    pub last_updated: DateTime<Utc>,
    pub active: bool,
    pub opened_at: DateTime<Utc>,
    pub last_confidence: f64,
    pub last_regime: MarketRegime,
    /// Most recent entries last; bounded by the engine's history capacity.
    pub history: VecDeque<StopHistoryEntry>,
}

impl StopState {
    /// Create state for a newly opened position.
    pub fn new(position: &Position, initial_stop: f64) -> Self {
        let entry_price = position.entry_price_f64();
        let current_price = position.current_price_f64();
        let favorable_extreme = if position.side.is_more_favorable(current_price, entry_price) {
            current_price
        } else {
            entry_price
        };
        let trailing_pct = if current_price > 0.0 {
            ((current_price - initial_stop).abs() / current_price * 100.0).max(0.0)
        } else {
            0.0
        };

        Self {
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price,
            current_stop_price: initial_stop,
            original_stop_price: initial_stop,
            favorable_extreme,
            trailing_pct,
            update_count: 0,
            last_updated: Utc::now(),
            active: true,
            opened_at: position.created_at,
            last_confidence: 50.0,
            last_regime: MarketRegime::Range,
            history: VecDeque::new(),
        }
    }

    /// Record an observed price. Returns true if it set a new favorable extreme.
    pub fn observe_price(&mut self, price: f64) -> bool {
        if price.is_finite() && self.side.is_more_favorable(price, self.favorable_extreme) {
            self.favorable_extreme = price;
            true
        } else {
            false
        }
    }

    /// Append a history entry, evicting the oldest beyond `capacity`.
    pub fn push_history(&mut self, entry: StopHistoryEntry, capacity: usize) {
        self.history.push_back(entry);
        while self.history.len() > capacity.max(1) {
            self.history.pop_front();
        }
    }

    /// Position-specific inputs at `price`.
    pub fn position_context(&self, price: f64, now: DateTime<Utc>) -> PositionContext {
        PositionContext {
            holding_hours: (now - self.opened_at).num_seconds().max(0) as f64 / 3600.0,
            unrealized_pnl_pct: self.side.pnl_pct(self.entry_price, price),
        }
    }

    /// Whether `stop` differs from the current stop enough to commit.
    pub fn differs_from(&self, stop: f64) -> bool {
        (stop - self.current_stop_price).abs() > STOP_EPSILON
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

/// Clamp a candidate stop to the allowed move from the state's current stop.
///
/// The stop never moves against the position (longs only rise, shorts only
/// fall), and a single move is at most `max_adjustment_pct` percent of the
/// current stop.
pub fn validate_stop_price(candidate: f64, state: &StopState, max_adjustment_pct: f64) -> f64 {
    let current = state.current_stop_price;
    if !candidate.is_finite() {
        return current;
    }

    let max_step = (current * max_adjustment_pct / 100.0).abs();
    match state.side {
        PositionSide::Long => candidate.max(current).min(current + max_step),
        PositionSide::Short => candidate.min(current).max(current - max_step),
    }
}
