//! # Batch Events
//!
//! One-way notifications from the orchestrator to any number of observers
//! (the websocket feed, the metrics collector, tests). Observers never reply;
//! dropping every receiver does not affect the run.
//!
//! ## Wire Format:
//! Events serialize with a `type` tag, for example
//! `{"type":"item_progress","index":0,"percent":30,"message":"..."}`.

use crate::batch::item::BatchResults;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// A run was accepted and its worker started
    BatchStarted { run_id: uuid::Uuid, total: usize },

    /// An item was dequeued; `percent` counts items finished before it
    BatchProgress { percent: u8, message: String },

    /// Progress reported by the engine for the current item
    ItemProgress { index: usize, percent: u8, message: String },

    /// An accepted transcript was written to disk
    ItemCompleted { index: usize, path: PathBuf, output_path: PathBuf },

    /// A transcript is ready and the worker is waiting for a decision
    ConfirmationNeeded { index: usize, path: PathBuf, text: String },

    /// The run ended by exhaustion, a stop decision or cancellation
    BatchCompleted { run_id: uuid::Uuid, results: BatchResults, cancelled: bool },

    /// The run hit an internal fault; always preceded by an `error` event
    BatchFailed { run_id: uuid::Uuid, results: BatchResults },

    /// A human-readable failure (missing file, engine error, save error, fault)
    Error { message: String },
}

impl BatchEvent {
    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchEvent::BatchCompleted { .. } | BatchEvent::BatchFailed { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BatchEvent::BatchStarted { .. } => "batch_started",
            BatchEvent::BatchProgress { .. } => "batch_progress",
            BatchEvent::ItemProgress { .. } => "item_progress",
            BatchEvent::ItemCompleted { .. } => "item_completed",
            BatchEvent::ConfirmationNeeded { .. } => "confirmation_needed",
            BatchEvent::BatchCompleted { .. } => "batch_completed",
            BatchEvent::BatchFailed { .. } => "batch_failed",
            BatchEvent::Error { .. } => "error",
        }
    }
}

/// Fan-out sender for batch events.
#[derive(Debug, Clone)]
pub struct EventReporter {
    tx: broadcast::Sender<BatchEvent>,
}

impl EventReporter {
    /// `capacity` is how many events a slow observer may fall behind before
    /// it starts missing some.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }

    /// Send to every current observer. Having none is fine.
    pub fn emit(&self, event: BatchEvent) {
        trace!(kind = event.kind(), "Batch event");
        let _ = self.tx.send(event);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(BatchEvent::Error { message: message.into() });
    }
}
