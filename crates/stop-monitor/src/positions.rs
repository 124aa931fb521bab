//! Positions file loading and registration.

use anyhow::{Context, Result};
use market_core::types::Position;
use risk_manager::{StopError, TrailingStopEngine};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// One entry of the positions file.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackedPosition {
    pub position: Position,
    /// Explicit starting stop. Falls back to the position's own stop-loss,
    /// then to the engine's suggested stop.
    #[serde(default)]
    pub initial_stop: Option<f64>,
    /// Recent prices, oldest first, used to warm up ATR and regime.
    #[serde(default)]
    pub seed_history: Vec<f64>,
}

pub fn parse_positions(json: &str) -> Result<Vec<TrackedPosition>> {
    serde_json::from_str(json).context("invalid positions file")
}

pub fn load_positions(path: &Path) -> Result<Vec<TrackedPosition>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read positions file {}", path.display()))?;
    parse_positions(&json)
}

/// Starting stop for a tracked position.
pub async fn resolve_initial_stop(engine: &TrailingStopEngine, tracked: &TrackedPosition) -> f64 {
    if let Some(stop) = tracked.initial_stop {
        return stop;
    }
    if let Some(stop) = tracked.position.stop_loss.and_then(|s| s.to_f64()) {
        return stop;
    }
    let position = &tracked.position;
    engine
        .get_optimal_stop_distance(
            &position.symbol,
            position.current_price_f64(),
            position.side,
            None,
            None,
        )
        .await
        .stop_price
}

/// Register every position with the engine. Returns how many were added.
pub async fn register_positions(engine: &TrailingStopEngine, tracked: &[TrackedPosition]) -> usize {
    let mut added = 0;
    for entry in tracked {
        let stop = resolve_initial_stop(engine, entry).await;
        let seed = (!entry.seed_history.is_empty()).then_some(entry.seed_history.as_slice());
        match engine.add_position(&entry.position, stop, seed).await {
            Ok(_) => added += 1,
            Err(StopError::AlreadyTracked(id)) => {
                warn!(position_id = %id, "Duplicate position in positions file, keeping first entry");
            }
            Err(e) => {
                warn!(position_id = %entry.position.id, error = %e, "Failed to track position");
            }
        }
    }
    info!(added = added, total = tracked.len(), "Registered positions");
    added
}
