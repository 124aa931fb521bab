//! Periodic driver for the trailing-stop engine.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::TrailingStopEngine;
use crate::events::StopEvent;

struct RunningTask {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Scheduler bookkeeping owned by the engine.
#[derive(Default)]
pub(crate) struct SchedulerState {
    /// Fast path flag for status checks.
    running: AtomicBool,
    started_at: RwLock<Option<DateTime<Utc>>>,
    task: Mutex<Option<RunningTask>>,
}

impl SchedulerState {
    pub(crate) async fn uptime_secs(&self) -> i64 {
        match *self.started_at.read().await {
            Some(started) if self.running.load(Ordering::SeqCst) => {
                (Utc::now() - started).num_seconds().max(0)
            }
            _ => 0,
        }
    }
}

impl TrailingStopEngine {
    /// Start periodic stop updates every `update_frequency_secs`.
    ///
    /// The interval is read once here; a changed frequency applies after a
    /// restart. Calling `start` while running only logs a warning.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.scheduler.task.lock().await;
        if slot.is_some() {
            warn!("Trailing stop scheduler already running");
            return;
        }

        let interval = self.config().await.update_interval();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; updates begin one interval in.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        let summary = engine.update_all_stops().await;
                        debug!(
                            processed = summary.processed,
                            updated = summary.updated,
                            failed = summary.failed,
                            "Scheduled trailing stop update"
                        );
                    }
                }
            }
            debug!("Trailing stop scheduler loop exited");
        });

        *self.scheduler.started_at.write().await = Some(Utc::now());
        self.scheduler.running.store(true, Ordering::SeqCst);
        *slot = Some(RunningTask { shutdown_tx, task });
        drop(slot);

        info!(interval_secs = interval.as_secs(), "Trailing stop scheduler started");
        self.emit(StopEvent::Started);
    }

    /// Stop periodic updates.
    ///
    /// A tick already in progress runs to completion before this returns.
    /// Calling `stop` while stopped only logs a warning.
    pub async fn stop(&self) {
        let mut slot = self.scheduler.task.lock().await;
        let Some(RunningTask { shutdown_tx, task }) = slot.take() else {
            warn!("Trailing stop scheduler is not running");
            return;
        };

        let _ = shutdown_tx.send(true);
        if let Err(e) = task.await {
            error!(error = %e, "Trailing stop scheduler task failed");
        }

        self.scheduler.running.store(false, Ordering::SeqCst);
        *self.scheduler.started_at.write().await = None;
        drop(slot);

        info!("Trailing stop scheduler stopped");
        self.emit(StopEvent::Stopped);
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.running.load(Ordering::SeqCst)
    }
}
