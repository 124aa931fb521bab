//! Stop Monitor
//!
//! Keeps adaptive trailing stops current for a set of open positions.

mod positions;

use anyhow::Result;
use clap::Parser;
use market_core::api::PriceFeedClient;
use market_core::config::Config;
use risk_manager::{EngineConfig, FixedConfidence, StopEvent, TrailingStopEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "stop-monitor", version, about = "Adaptive trailing stop monitor")]
struct Cli {
    /// JSON file with the positions to protect
    #[arg(short, long)]
    positions: PathBuf,

    /// Seconds between stop updates (overrides TRAILING_UPDATE_SECS)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Fixed signal confidence 0-100 (overrides STOP_FIXED_CONFIDENCE)
    #[arg(short, long)]
    confidence: Option<f64>,

    /// Run a single update pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stop_monitor=info,risk_manager=info,market_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Stop Monitor");

    let config = Config::from_env()?;
    let mut engine_config = EngineConfig::from_env()?;
    if let Some(secs) = cli.interval {
        engine_config.update_frequency_secs = secs;
    }

    let price_feed = PriceFeedClient::new(config.price_feed.url.clone(), config.price_feed.timeout_secs)?;
    info!(url = %price_feed.base_url(), "Using price feed");
    let confidence = FixedConfidence(cli.confidence.unwrap_or(config.confidence.fixed_confidence));

    let engine = Arc::new(TrailingStopEngine::new(
        engine_config,
        Arc::new(price_feed),
        Arc::new(confidence),
    )?);

    let events = tokio::spawn(log_events(engine.subscribe()));

    let tracked = positions::load_positions(&cli.positions)?;
    let added = positions::register_positions(&engine, &tracked).await;
    if added == 0 {
        warn!(path = %cli.positions.display(), "No positions registered");
    }

    if cli.once {
        let summary = engine.update_all_stops().await;
        info!(
            processed = summary.processed,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "Update pass complete"
        );
        for state in engine.active_stops() {
            info!(
                position_id = %state.position_id,
                symbol = %state.symbol,
                side = %state.side,
                stop = state.current_stop_price,
                trailing_pct = state.trailing_pct,
                "Current stop"
            );
        }
    } else {
        engine.start().await;
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        engine.stop().await;
    }

    let stats = engine.stats().await;
    info!(
        active_positions = stats.active_positions,
        total_updates = stats.total_updates,
        average_update_frequency = stats.average_update_frequency,
        "Stop Monitor finished"
    );

    events.abort();
    Ok(())
}

async fn log_events(mut rx: tokio::sync::broadcast::Receiver<StopEvent>) {
    loop {
        match rx.recv().await {
            Ok(StopEvent::StopUpdated {
                symbol,
                position_id,
                old_stop,
                new_stop,
                reason,
                confidence,
                ..
            }) => {
                info!(
                    symbol = %symbol,
                    position_id = %position_id,
                    old_stop = old_stop,
                    new_stop = new_stop,
                    confidence = confidence,
                    reason = %reason,
                    "Stop moved"
                );
            }
            Ok(event) => {
                if let Ok(json) = serde_json::to_string(&event) {
                    info!(event = %json, "Engine event");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Event logger lagging, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
