//! Engine lifecycle and stop update events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::config::EngineConfig;

/// Event published to engine subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StopEvent {
    Started,
    Stopped,
    PositionAdded {
        position_id: Uuid,
        symbol: String,
        initial_stop: f64,
    },
    PositionRemoved {
        position_id: Uuid,
        symbol: String,
        final_stop: f64,
    },
    StopUpdated {
        symbol: String,
        position_id: Uuid,
        old_stop: f64,
        new_stop: f64,
        reason: String,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },
    ConfigUpdated {
        config: Box<EngineConfig>,
    },
}

/// Fan-out of [`StopEvent`]s to any number of subscribers.
///
/// Every subscriber that keeps up receives every event published after it
/// subscribed. Slow subscribers observe `RecvError::Lagged` instead of
/// blocking the engine.
pub struct EventNotifier {
    tx: broadcast::Sender<StopEvent>,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StopEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn emit(&self, event: StopEvent) {
        if self.tx.send(event).is_err() {
            trace!("No subscribers for stop event");
        }
    }
}
