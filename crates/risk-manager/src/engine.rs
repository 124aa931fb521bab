//! Trailing-stop engine: tracks positions and maintains their protective stops.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use market_core::types::{MarketRegime, Position, PositionSide};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, EngineConfigUpdate};
use crate::distance::{DistanceCalculator, DistanceInputs};
use crate::error::{Result, StopError};
use crate::events::{EventNotifier, StopEvent};
use crate::price_history::PriceHistoryStore;
use crate::regime::RegimeClassifier;
use crate::scheduler::SchedulerState;
use crate::sources::{ConfidenceSource, PriceSource};
use crate::stop_state::{validate_stop_price, StopHistoryEntry, StopState};
use crate::volatility::average_true_range;

/// Confidence assumed when none has been observed yet.
pub const NEUTRAL_CONFIDENCE: f64 = 50.0;

/// Result of a stop computation for a tracked position. Nothing is committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopCalculation {
    pub position_id: Uuid,
    pub current_price: f64,
    pub distance_pct: f64,
    /// Stop implied by the distance before validation.
    pub candidate_stop: f64,
    /// Stop after direction and step limits.
    pub validated_stop: f64,
    pub atr: f64,
    pub confidence: f64,
    pub regime: MarketRegime,
}

/// Suggested stop for a position that does not exist yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimalStop {
    pub distance_pct: f64,
    pub stop_price: f64,
    pub atr: f64,
    pub confidence: f64,
    pub regime: MarketRegime,
}

/// Outcome counts for one pass over all tracked positions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub processed: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Removed while the tick was in flight.
    pub skipped: usize,
    pub failed: usize,
}

impl TickSummary {
    fn merge(&mut self, other: &TickSummary) {
        self.processed += other.processed;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Engine-wide statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopEngineStats {
    pub active_positions: usize,
    pub total_updates: u64,
    /// Committed updates per active position.
    pub average_update_frequency: f64,
    /// Seconds since the scheduler started, zero when stopped.
    pub system_uptime_secs: i64,
}

/// Market inputs fetched once per symbol per tick.
#[derive(Debug, Clone, Copy)]
struct SymbolQuote {
    price: f64,
    confidence: f64,
}

enum CommitOutcome {
    Updated,
    Unchanged,
    Skipped,
}

/// Adaptive trailing-stop engine.
///
/// Construct one per process and share it behind an `Arc`. Positions are
/// registered with [`add_position`](Self::add_position) and released with
/// [`remove_position`](Self::remove_position); the scheduler (see
/// [`start`](Self::start)) periodically refreshes every stop.
pub struct TrailingStopEngine {
    config: RwLock<EngineConfig>,
    stops: DashMap<Uuid, StopState>,
    prices: PriceHistoryStore,
    price_source: Arc<dyn PriceSource>,
    confidence_source: Arc<dyn ConfidenceSource>,
    events: EventNotifier,
    pub(crate) scheduler: SchedulerState,
}

impl TrailingStopEngine {
    pub fn new(
        config: EngineConfig,
        price_source: Arc<dyn PriceSource>,
        confidence_source: Arc<dyn ConfidenceSource>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            prices: PriceHistoryStore::new(config.price_history_capacity),
            events: EventNotifier::new(config.event_channel_capacity),
            config: RwLock::new(config),
            stops: DashMap::new(),
            price_source,
            confidence_source,
            scheduler: SchedulerState::default(),
        })
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<StopEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: StopEvent) {
        self.events.emit(event);
    }

    pub fn price_history(&self) -> &PriceHistoryStore {
        &self.prices
    }

    pub async fn config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    /// Apply a partial config update. Takes effect on the next computation.
    ///
    /// An update that fails validation leaves the current config in place.
    pub async fn update_config(&self, update: EngineConfigUpdate) -> Result<EngineConfig> {
        let next = {
            let mut config = self.config.write().await;
            let next = update.apply_to(&config);
            next.validate()?;
            *config = next.clone();
            next
        };
        self.prices.set_capacity(next.price_history_capacity);

        info!(
            base_trailing_pct = next.base_trailing_pct,
            min_stop_distance = next.min_stop_distance,
            max_stop_distance = next.max_stop_distance,
            max_stop_adjustment_pct = next.max_stop_adjustment_pct,
            "Trailing stop config updated"
        );
        self.emit(StopEvent::ConfigUpdated {
            config: Box::new(next.clone()),
        });
        Ok(next)
    }

    /// Start tracking a position with `initial_stop` as its protective stop.
    ///
    /// `seed_history` prefills the symbol's price history (oldest first) so
    /// ATR and regime are meaningful from the first update.
    pub async fn add_position(
        &self,
        position: &Position,
        initial_stop: f64,
        seed_history: Option<&[f64]>,
    ) -> Result<StopState> {
        if !initial_stop.is_finite() || initial_stop <= 0.0 {
            return Err(StopError::InvalidStop {
                position_id: position.id,
                stop_price: initial_stop,
            });
        }
        if self.stops.contains_key(&position.id) {
            return Err(StopError::AlreadyTracked(position.id));
        }

        let config = self.config().await;
        if let Some(seed) = seed_history {
            self.prices.extend(&position.symbol, seed);
        }

        let confidence = match self.confidence_source.confidence(&position.symbol).await {
            Ok(c) if c.is_finite() => c.clamp(0.0, 100.0),
            Ok(c) => {
                warn!(symbol = %position.symbol, confidence = c, "Non-finite confidence, using neutral");
                NEUTRAL_CONFIDENCE
            }
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "Confidence lookup failed, using neutral");
                NEUTRAL_CONFIDENCE
            }
        };

        let current_price = position.current_price_f64();
        let series = self.series_or(&position.symbol, current_price);
        let atr = average_true_range(&series, config.atr_period);
        let regime = classifier(&config).classify(&series);

        let mut state = StopState::new(position, initial_stop);
        state.last_confidence = confidence;
        state.last_regime = regime;
        state.push_history(
            StopHistoryEntry {
                timestamp: Utc::now(),
                price: current_price,
                stop_price: initial_stop,
                reason: "Initial stop set".to_string(),
                atr,
                confidence,
                regime,
            },
            config.stop_history_capacity,
        );

        match self.stops.entry(position.id) {
            Entry::Occupied(_) => return Err(StopError::AlreadyTracked(position.id)),
            Entry::Vacant(slot) => {
                slot.insert(state.clone());
            }
        }

        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            side = %position.side,
            entry_price = state.entry_price,
            initial_stop = initial_stop,
            atr = atr,
            regime = %regime,
            "Tracking trailing stop"
        );
        self.emit(StopEvent::PositionAdded {
            position_id: position.id,
            symbol: position.symbol.clone(),
            initial_stop,
        });

        Ok(state)
    }

    /// Stop tracking a position. Untracked ids are a no-op.
    ///
    /// The symbol's price history is dropped once no tracked position uses it.
    pub fn remove_position(&self, position_id: Uuid) -> Option<StopState> {
        match self.stops.remove(&position_id) {
            Some((_, mut state)) => {
                state.active = false;
                if !self.stops.iter().any(|e| e.value().symbol == state.symbol) {
                    self.prices.clear(&state.symbol);
                }
                info!(
                    position_id = %position_id,
                    symbol = %state.symbol,
                    final_stop = state.current_stop_price,
                    updates = state.update_count,
                    "Stopped tracking trailing stop"
                );
                self.emit(StopEvent::PositionRemoved {
                    position_id,
                    symbol: state.symbol.clone(),
                    final_stop: state.current_stop_price,
                });
                Some(state)
            }
            None => {
                debug!(position_id = %position_id, "Remove requested for untracked position");
                None
            }
        }
    }

    /// Compute the stop for a tracked position at `current_price`.
    ///
    /// Uses the confidence recorded at the last update and the regime of the
    /// symbol's current history. Nothing is committed.
    pub async fn calculate_trailing_stop(
        &self,
        position_id: Uuid,
        current_price: f64,
    ) -> Result<StopCalculation> {
        self.calculate_trailing_stop_with(position_id, current_price, None, None)
            .await
    }

    /// Like [`calculate_trailing_stop`](Self::calculate_trailing_stop) with
    /// explicit confidence and/or regime.
    pub async fn calculate_trailing_stop_with(
        &self,
        position_id: Uuid,
        current_price: f64,
        confidence: Option<f64>,
        regime: Option<MarketRegime>,
    ) -> Result<StopCalculation> {
        let config = self.config().await;
        let state = self
            .stops
            .get(&position_id)
            .map(|s| s.clone())
            .ok_or(StopError::NotFound(position_id))?;
        Ok(self.compute(&state, current_price, confidence, regime, &config))
    }

    /// Clamp `candidate` to the stop moves allowed for `state`.
    pub async fn validate_stop_price(&self, candidate: f64, state: &StopState) -> f64 {
        let max_adjustment_pct = self.config.read().await.max_stop_adjustment_pct;
        validate_stop_price(candidate, state, max_adjustment_pct)
    }

    /// Suggested stop distance for a prospective position. No state changes.
    pub async fn get_optimal_stop_distance(
        &self,
        symbol: &str,
        current_price: f64,
        side: PositionSide,
        confidence: Option<f64>,
        regime: Option<MarketRegime>,
    ) -> OptimalStop {
        let config = self.config().await;
        let series = self.series_or(symbol, current_price);
        let atr = average_true_range(&series, config.atr_period);
        let regime = regime.unwrap_or_else(|| classifier(&config).classify(&series));
        let confidence = confidence.unwrap_or(NEUTRAL_CONFIDENCE);

        let distance_pct = DistanceCalculator::new(&config).optimal_distance(&DistanceInputs {
            current_price,
            atr,
            confidence,
            regime,
        });

        OptimalStop {
            distance_pct,
            stop_price: side.stop_from(current_price, distance_pct),
            atr,
            confidence,
            regime,
        }
    }

    /// Refresh every tracked stop once.
    ///
    /// The set of positions is snapshotted up front, so positions added
    /// during the pass wait for the next one and positions removed during it
    /// are skipped. Prices and confidence are fetched once per symbol with
    /// bounded concurrency, and each symbol's positions are committed as soon
    /// as its quote arrives. A failing or slow collaborator only affects the
    /// positions on its symbol.
    pub async fn update_all_stops(&self) -> TickSummary {
        let config = self.config().await;
        let snapshot: Vec<(Uuid, String)> = self
            .stops
            .iter()
            .map(|e| (*e.key(), e.value().symbol.clone()))
            .collect();

        if snapshot.is_empty() {
            debug!("No trailing stops to update");
            return TickSummary::default();
        }

        let mut by_symbol: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
        for (position_id, symbol) in snapshot {
            by_symbol.entry(symbol).or_default().push(position_id);
        }

        let config = &config;
        let summary = stream::iter(by_symbol)
            .map(|(symbol, ids)| async move { self.update_symbol(&symbol, &ids, config).await })
            .buffer_unordered(config.max_concurrent_updates)
            .fold(TickSummary::default(), |mut total, part| async move {
                total.merge(&part);
                total
            })
            .await;

        debug!(
            processed = summary.processed,
            updated = summary.updated,
            failed = summary.failed,
            "Trailing stop tick complete"
        );
        summary
    }

    /// Fetch one quote for `symbol` and commit every position on it.
    async fn update_symbol(&self, symbol: &str, ids: &[Uuid], config: &EngineConfig) -> TickSummary {
        let mut summary = TickSummary {
            processed: ids.len(),
            ..Default::default()
        };

        let quote = match self.fetch_quote(symbol).await {
            Ok(q) => q,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Skipping symbol for this tick");
                summary.failed = ids.len();
                return summary;
            }
        };
        self.prices.append(symbol, quote.price);

        for &position_id in ids {
            match self.commit_update(position_id, quote, config) {
                CommitOutcome::Updated => summary.updated += 1,
                CommitOutcome::Unchanged => summary.unchanged += 1,
                CommitOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<SymbolQuote> {
        let price = self
            .price_source
            .price(symbol)
            .await
            .map_err(|e| StopError::collaborator(symbol, e))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(StopError::collaborator(
                symbol,
                format!("unusable price {}", price),
            ));
        }

        let confidence = self
            .confidence_source
            .confidence(symbol)
            .await
            .map_err(|e| StopError::collaborator(symbol, e))?;
        if !confidence.is_finite() {
            return Err(StopError::collaborator(
                symbol,
                format!("unusable confidence {}", confidence),
            ));
        }

        Ok(SymbolQuote {
            price,
            confidence: confidence.clamp(0.0, 100.0),
        })
    }

    fn commit_update(&self, position_id: Uuid, quote: SymbolQuote, config: &EngineConfig) -> CommitOutcome {
        let Some(mut state) = self.stops.get_mut(&position_id) else {
            debug!(position_id = %position_id, "Position removed during tick");
            return CommitOutcome::Skipped;
        };

        let regime = classifier(config).classify(&self.prices.prices(&state.symbol));
        state.observe_price(quote.price);
        let calc = self.compute(&state, quote.price, Some(quote.confidence), Some(regime), config);
        state.last_confidence = calc.confidence;
        state.last_regime = calc.regime;

        if !state.differs_from(calc.validated_stop) {
            return CommitOutcome::Unchanged;
        }

        let now = Utc::now();
        let old_stop = state.current_stop_price;
        let reason = format!(
            "Trailing stop moved ({} regime, {:.2}% distance)",
            calc.regime, calc.distance_pct
        );
        state.current_stop_price = calc.validated_stop;
        state.trailing_pct = calc.distance_pct;
        state.update_count += 1;
        state.last_updated = now;
        state.push_history(
            StopHistoryEntry {
                timestamp: now,
                price: quote.price,
                stop_price: calc.validated_stop,
                reason: reason.clone(),
                atr: calc.atr,
                confidence: calc.confidence,
                regime: calc.regime,
            },
            config.stop_history_capacity,
        );
        let symbol = state.symbol.clone();
        drop(state);

        info!(
            position_id = %position_id,
            symbol = %symbol,
            old_stop = old_stop,
            new_stop = calc.validated_stop,
            price = quote.price,
            distance_pct = calc.distance_pct,
            "Trailing stop updated"
        );
        self.emit(StopEvent::StopUpdated {
            symbol,
            position_id,
            old_stop,
            new_stop: calc.validated_stop,
            reason,
            confidence: calc.confidence,
            timestamp: now,
        });
        CommitOutcome::Updated
    }

    fn compute(
        &self,
        state: &StopState,
        current_price: f64,
        confidence: Option<f64>,
        regime: Option<MarketRegime>,
        config: &EngineConfig,
    ) -> StopCalculation {
        let series = self.series_or(&state.symbol, current_price);
        let atr = average_true_range(&series, config.atr_period);
        let regime = regime.unwrap_or_else(|| classifier(config).classify(&series));
        let confidence = confidence.unwrap_or(state.last_confidence);

        let inputs = DistanceInputs {
            current_price,
            atr,
            confidence,
            regime,
        };
        let context = state.position_context(current_price, Utc::now());
        let distance_pct = DistanceCalculator::new(config).trailing_distance(&inputs, Some(&context));

        let candidate_stop = state.side.stop_from(current_price, distance_pct);
        let validated_stop = validate_stop_price(candidate_stop, state, config.max_stop_adjustment_pct);

        StopCalculation {
            position_id: state.position_id,
            current_price,
            distance_pct,
            candidate_stop,
            validated_stop,
            atr,
            confidence,
            regime,
        }
    }

    /// Price history for a symbol, or just `price` when none is recorded.
    fn series_or(&self, symbol: &str, price: f64) -> Vec<f64> {
        let series = self.prices.prices(symbol);
        if series.is_empty() && price.is_finite() && price > 0.0 {
            vec![price]
        } else {
            series
        }
    }

    /// All tracked stops.
    pub fn active_stops(&self) -> Vec<StopState> {
        self.stops.iter().map(|e| e.value().clone()).collect()
    }

    pub fn stop_data(&self, position_id: Uuid) -> Option<StopState> {
        self.stops.get(&position_id).map(|s| s.clone())
    }

    pub fn is_tracking(&self, position_id: Uuid) -> bool {
        self.stops.contains_key(&position_id)
    }

    pub async fn stats(&self) -> StopEngineStats {
        let active_positions = self.stops.len();
        let total_updates: u64 = self.stops.iter().map(|e| e.value().update_count).sum();
        let average_update_frequency = if active_positions > 0 {
            total_updates as f64 / active_positions as f64
        } else {
            0.0
        };

        StopEngineStats {
            active_positions,
            total_updates,
            average_update_frequency,
            system_uptime_secs: self.scheduler.uptime_secs().await,
        }
    }
}

fn classifier(config: &EngineConfig) -> RegimeClassifier {
    RegimeClassifier::new(config.trend_threshold_pct, config.volatile_regime_threshold)
}
