//! # Application State Management
//!
//! Shared state handed to every HTTP handler and websocket session.
//!
//! ## What lives here:
//! - **config**: runtime-updatable configuration (`Arc<RwLock<AppConfig>>`)
//! - **orchestrator**: the one batch orchestrator of this server (cheap to clone)
//! - **metrics**: counters fed from the batch event stream
//! - **start_time**: for uptime reporting
//!
//! ## Locking:
//! Every lock here is held only long enough to copy a value in or out. A
//! poisoned lock is recovered rather than propagated, since the data behind
//! it (plain counters and config values) cannot be left half-written.

use crate::batch::{BatchEvent, BatchOrchestrator, OrchestratorOptions};
use crate::config::AppConfig;
use crate::transcription::engine::TranscriptionEngine;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    pub orchestrator: BatchOrchestrator,

    /// Batch counters, updated by the collector task from `watch_events`
    pub metrics: Arc<RwLock<BatchMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected from batch events since server start.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchMetrics {
    pub batches_started: u64,
    pub batches_completed: u64,
    pub batches_cancelled: u64,
    pub batches_failed: u64,

    /// Items whose transcript reached the confirmation step
    pub items_transcribed: u64,

    /// `error` events (missing files, engine failures, save failures, faults)
    pub errors: u64,

    pub transcripts_saved: u64,

    /// Websocket observers currently connected
    pub active_observers: u32,
}

impl BatchMetrics {
    /// Fold one event into the counters.
    pub fn record(&mut self, event: &BatchEvent) {
        match event {
            BatchEvent::BatchStarted { .. } => self.batches_started += 1,
            BatchEvent::ConfirmationNeeded { .. } => self.items_transcribed += 1,
            BatchEvent::ItemCompleted { .. } => self.transcripts_saved += 1,
            BatchEvent::BatchCompleted { cancelled, .. } => {
                self.batches_completed += 1;
                if *cancelled {
                    self.batches_cancelled += 1;
                }
            }
            BatchEvent::BatchFailed { .. } => self.batches_failed += 1,
            BatchEvent::Error { .. } => self.errors += 1,
            BatchEvent::BatchProgress { .. } | BatchEvent::ItemProgress { .. } => {}
        }
    }
}

impl AppState {
    /// Build the state around an engine. The orchestrator takes its output
    /// extension and event buffer from `config.engine`.
    pub fn new(config: AppConfig, engine: Arc<dyn TranscriptionEngine>) -> Self {
        let orchestrator = BatchOrchestrator::new(engine, OrchestratorOptions::from(&config.engine));
        Self {
            config: Arc::new(RwLock::new(config)),
            orchestrator,
            metrics: Arc::new(RwLock::new(BatchMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn config_read(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.config.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, BatchMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config_read().clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// Transcription defaults apply to the next batch. Server and engine
    /// settings are read at startup, so changing them needs a restart.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
        Ok(())
    }

    /// Spawn the task that keeps `metrics` in step with the event stream.
    pub fn watch_events(&self) -> tokio::task::JoinHandle<()> {
        let mut events = self.orchestrator.subscribe();
        let state = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => state.metrics_write().record(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Metrics collector lagged behind batch events");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Batch event stream closed, metrics collector exiting");
                        break;
                    }
                }
            }
        })
    }

    pub fn increment_active_observers(&self) {
        self.metrics_write().active_observers += 1;
    }

    pub fn decrement_active_observers(&self) {
        let mut metrics = self.metrics_write();
        metrics.active_observers = metrics.active_observers.saturating_sub(1);
    }

    /// Get a snapshot of current metrics.
    pub fn get_metrics_snapshot(&self) -> BatchMetrics {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
