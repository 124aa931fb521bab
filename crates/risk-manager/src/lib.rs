//! Risk Manager
//!
//! Adaptive trailing stops for open positions. Each tracked position gets a
//! protective stop that is recomputed from volatility, signal confidence,
//! market regime, and position context, and that only ever moves in the
//! position's favor by a bounded step per update.

pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod events;
pub mod price_history;
pub mod regime;
pub mod scheduler;
pub mod sources;
pub mod stop_state;
pub mod volatility;

pub use config::{EngineConfig, EngineConfigUpdate};
pub use distance::{DistanceCalculator, DistanceInputs, PositionContext};
pub use engine::{OptimalStop, StopCalculation, StopEngineStats, TickSummary, TrailingStopEngine};
pub use error::{Result, StopError};
pub use events::StopEvent;
pub use price_history::PriceHistoryStore;
pub use sources::{ConfidenceSource, FixedConfidence, PriceSource};
pub use stop_state::{StopHistoryEntry, StopState};
