//! # Transcription Engine Adapter
//!
//! The dependency boundary between the batch orchestrator and whatever actually
//! turns media into text. The orchestrator only ever talks to a
//! [`TranscriptionEngine`]; it never sees model weights or processes.
//!
//! ## Contract:
//! - **start**: begins exactly one transcription and returns an [`EngineJob`].
//!   A second `start` while a job is in flight fails immediately with
//!   [`EngineError::Busy`] (single-flight).
//! - **events**: a job yields zero or more `Progress` events with
//!   non-decreasing percent in `[0, 100]`, then at most one terminal event
//!   (`Complete` or `Error`). A job whose channel closes without a terminal
//!   event was abandoned (for example after cancellation).
//! - **cancel**: best-effort and cooperative. The engine acknowledges by
//!   ending the job with `Error` or by closing it; callers must not assume
//!   the job stops synchronously.
//!
//! The callback slots of a classic engine API are modelled as one channel of
//! [`EngineEvent`]s. [`JobReporter`] is the sending half: its terminal methods
//! consume it, so an adapter cannot report two outcomes for one job.

use crate::transcription::model::TranscriptionConfig;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One notification from a running transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Intermediate progress (percent in `[0, 100]`, never decreasing)
    Progress { percent: u8, message: String },

    /// The transcription finished; carries the transcript text
    Complete(String),

    /// The transcription failed or was cancelled
    Error(String),
}

impl EngineEvent {
    /// Whether this event ends the job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineEvent::Progress { .. })
    }
}

/// Reasons an engine refuses to start a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Another job is still in flight on this engine
    Busy,

    /// The engine could not launch its work
    Spawn(String),

    /// The engine is not usable (missing program, bad configuration, ...)
    Unavailable(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Busy => write!(f, "A transcription is already in progress"),
            EngineError::Spawn(msg) => write!(f, "Failed to start transcription: {}", msg),
            EngineError::Unavailable(msg) => write!(f, "Transcription engine unavailable: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// A transcription engine the orchestrator can drive.
///
/// Implementations own whatever heavy resource they need (a loaded model, a
/// resolved program) and may reuse it across jobs, as long as that reuse is
/// invisible through this interface.
pub trait TranscriptionEngine: Send + Sync + 'static {
    /// Begin transcribing `path`. Fails with [`EngineError::Busy`] if a job is
    /// already running.
    fn start(&self, path: &Path, config: &TranscriptionConfig) -> Result<EngineJob, EngineError>;

    /// Ask the in-flight job (if any) to stop. Returns whether a job was running.
    fn cancel(&self) -> bool;

    /// Whether a job is currently in flight.
    fn is_busy(&self) -> bool;
}

/// Receiving half of a running transcription.
#[derive(Debug)]
pub struct EngineJob {
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EngineJob {
    /// Wait for the next event. `None` means the job ended without (further)
    /// events.
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.events.recv().await
    }
}

/// Single-flight guard shared by an engine and its running job.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the engine for one job. `None` if a job is already in flight.
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { busy: Some(self.busy.clone()) })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Holds the engine busy until released or dropped.
#[derive(Debug)]
pub struct FlightGuard {
    busy: Option<Arc<AtomicBool>>,
}

impl FlightGuard {
    fn release(&mut self) {
        if let Some(busy) = self.busy.take() {
            busy.store(false, Ordering::Release);
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Sending half of a running transcription, held by the adapter.
///
/// The engine is released *before* the terminal event is sent, so a caller
/// reacting to `Complete`/`Error` can start the next job immediately.
#[derive(Debug)]
pub struct JobReporter {
    tx: mpsc::UnboundedSender<EngineEvent>,
    guard: FlightGuard,
    last_percent: u8,
}

impl JobReporter {
    /// Report progress. Values are clamped to `[0, 100]` and never move backwards.
    pub fn progress(&mut self, percent: u8, message: impl Into<String>) {
        let percent = percent.min(100).max(self.last_percent);
        self.last_percent = percent;
        let _ = self.tx.send(EngineEvent::Progress { percent, message: message.into() });
    }

    /// Finish the job successfully.
    pub fn complete(mut self, text: impl Into<String>) {
        self.guard.release();
        let _ = self.tx.send(EngineEvent::Complete(text.into()));
    }

    /// Finish the job with an error.
    pub fn fail(mut self, message: impl Into<String>) {
        self.guard.release();
        let _ = self.tx.send(EngineEvent::Error(message.into()));
    }
}

/// Create the two halves of a job around an acquired flight guard.
pub fn job_channel(guard: FlightGuard) -> (JobReporter, EngineJob) {
    let (tx, events) = mpsc::unbounded_channel();
    (
        JobReporter { tx, guard, last_percent: 0 },
        EngineJob { events },
    )
}
