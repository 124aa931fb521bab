//! Adaptive Stops: volatility and confidence aware trailing stops
//!
//! This is the root crate that provides benchmark access to the internal modules.
//! For actual functionality, use the individual crates directly:
//!
//! - `market-core`: Position and market types, price feed client, configuration
//! - `risk-manager`: Trailing stop engine, distance calculation, scheduler
//! - `stop-monitor`: Daemon that keeps stops current for a positions file

// Re-export for benchmarks
pub use market_core as core;
pub use risk_manager as risk;
