//! # Batch Orchestrator
//!
//! Drives a queue of media files through one [`TranscriptionEngine`], one item
//! at a time, parking after every transcript until someone confirms it.
//!
//! ## Control Surface:
//! - [`process_batch`](BatchOrchestrator::process_batch): start a run (rejected while one is active)
//! - [`cancel`](BatchOrchestrator::cancel): stop the whole remaining queue
//! - [`cancel_item`](BatchOrchestrator::cancel_item): drop only the item being processed
//! - [`confirm_and_continue`](BatchOrchestrator::confirm_and_continue): resolve the confirmation gate
//!
//! Everything else is reported through [`BatchEvent`]s from
//! [`subscribe`](BatchOrchestrator::subscribe).
//!
//! ## Cancellation:
//! Each run owns a `CancellationToken`; each item gets a child token. A batch
//! cancel fires the run token (and with it the current item's token), an item
//! cancel fires only the child. The worker watches the item token while the
//! engine runs and while it waits at the gate, so both suspensions end as soon
//! as the token fires.
//!
//! ## Failure Handling:
//! Missing files, engine errors and save errors become `error` events and the
//! queue moves on. Broken run invariants (and a panicking worker) end the run
//! in [`BatchPhase::Failed`]. Either way the orchestrator returns to `Idle`.

use crate::batch::events::{BatchEvent, EventReporter};
use crate::batch::gate::{ConfirmationGate, GateOutcome, Resolution};
use crate::batch::item::{BatchPhase, BatchResults, BatchRun, Decision, ItemResult, MediaItem};
use crate::batch::persist::{output_path_for, save_transcript};
use crate::config::EngineConfig;
use crate::error::BatchError;
use crate::transcription::engine::{EngineEvent, EngineJob, TranscriptionEngine};
use crate::transcription::model::TranscriptionConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a cancelled engine job may take to acknowledge before the worker
/// logs an overrun. The worker keeps waiting after that, until the engine is
/// free or the whole run is cancelled.
const ENGINE_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings the orchestrator needs from the engine configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub output_extension: String,
    pub event_buffer: usize,
    pub release_grace: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for OrchestratorOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            output_extension: config.output_extension.clone(),
            event_buffer: config.event_buffer,
            release_grace: ENGINE_RELEASE_TIMEOUT,
        }
    }
}

/// How the previous run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: uuid::Uuid,
    pub phase: BatchPhase,
    pub total: usize,
    pub processed: usize,
    pub saved: usize,
    pub final_index: Option<usize>,
    pub cancelled: bool,
    pub finished_at: DateTime<Utc>,
}

/// Point-in-time view of the orchestrator for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub phase: BatchPhase,
    pub run_id: Option<uuid::Uuid>,
    pub current_index: Option<usize>,
    pub total: usize,
    pub pending_confirmation: Option<usize>,
    pub cancel_requested: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_run: Option<RunSummary>,
}

/// Shared control state. The worker writes `current_index` and the item token
/// together so `cancel_item` always hits the item it validated.
#[derive(Debug)]
struct Control {
    phase: BatchPhase,
    run_id: Option<uuid::Uuid>,
    total: usize,
    current_index: Option<usize>,
    cancel_requested: bool,
    run_token: Option<CancellationToken>,
    item_token: Option<CancellationToken>,
    started_at: Option<DateTime<Utc>>,
    last_run: Option<RunSummary>,
}

impl Control {
    fn idle(last_run: Option<RunSummary>) -> Self {
        Self {
            phase: BatchPhase::Idle,
            run_id: None,
            total: 0,
            current_index: None,
            cancel_requested: false,
            run_token: None,
            item_token: None,
            started_at: None,
            last_run,
        }
    }

    /// Phase changes made by the worker never undo a pending cancellation.
    fn set_worker_phase(&mut self, phase: BatchPhase) {
        if !self.cancel_requested {
            self.phase = phase;
        }
    }
}

/// What the worker hands back when it exits.
#[derive(Debug)]
struct RunOutcome {
    results: BatchResults,
    processed: usize,
    final_index: Option<usize>,
    fault: Option<String>,
}

/// Result of running one item through the engine.
enum Transcription {
    Text(String),
    Failed(String),
    Cancelled,
}

struct Inner {
    engine: Arc<dyn TranscriptionEngine>,
    events: EventReporter,
    gate: ConfirmationGate,
    control: Mutex<Control>,
    options: OrchestratorOptions,
}

/// The batch state machine. Cheap to clone; clones share one orchestrator.
#[derive(Clone)]
pub struct BatchOrchestrator {
    inner: Arc<Inner>,
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<dyn TranscriptionEngine>, options: OrchestratorOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                events: EventReporter::new(options.event_buffer),
                gate: ConfirmationGate::new(),
                control: Mutex::new(Control::idle(None)),
                options,
            }),
        }
    }

    /// Observe every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    /// Start a run over `paths` in order. Returns the run id immediately;
    /// everything after validation happens on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn process_batch(
        &self,
        paths: Vec<PathBuf>,
        config: TranscriptionConfig,
    ) -> Result<uuid::Uuid, BatchError> {
        config
            .validate()
            .map_err(|e| BatchError::InvalidConfig(e.to_string()))?;

        let run = BatchRun::new(MediaItem::from_paths(paths));
        let run_id = run.id;
        let run_token = CancellationToken::new();

        {
            let mut control = self.inner.lock();
            if control.phase != BatchPhase::Idle {
                return Err(BatchError::AlreadyRunning);
            }
            let last_run = control.last_run.take();
            *control = Control::idle(last_run);
            control.phase = BatchPhase::Running;
            control.run_id = Some(run_id);
            control.total = run.total();
            control.run_token = Some(run_token.clone());
            control.started_at = Some(Utc::now());
            // Emitted under the lock so it cannot interleave with the previous
            // run's terminal event.
            self.inner.events.emit(BatchEvent::BatchStarted { run_id, total: run.total() });
        }

        info!(%run_id, total = run.total(), model = %config.model, "Batch accepted");

        let inner = self.inner.clone();
        let worker = tokio::spawn(Inner::run_worker(inner.clone(), run, config, run_token));
        tokio::spawn(async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => RunOutcome {
                    results: BatchResults::new(),
                    processed: 0,
                    final_index: inner.lock().current_index,
                    fault: Some(format!("Batch worker terminated unexpectedly: {}", e)),
                },
            };
            inner.finish(run_id, outcome);
        });

        Ok(run_id)
    }

    /// Stop the run after the current step. Interrupts both the engine and a
    /// pending confirmation. Returns `false` if there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let mut control = self.inner.lock();
        if !control.phase.is_active() || control.cancel_requested {
            return false;
        }

        control.cancel_requested = true;
        control.phase = BatchPhase::Cancelling;
        if let Some(token) = &control.run_token {
            token.cancel();
        }
        info!(run_id = ?control.run_id, "Batch cancellation requested");
        true
    }

    /// Abandon only the item at `index`, which must be the one in progress.
    /// The run continues with the next item.
    pub fn cancel_item(&self, index: usize) -> Result<(), BatchError> {
        let control = self.inner.lock();
        if !control.phase.is_active() {
            return Err(BatchError::NotRunning);
        }
        if control.current_index != Some(index) {
            return Err(BatchError::NotCurrentItem { requested: index, current: control.current_index });
        }

        if let Some(token) = &control.item_token {
            token.cancel();
        }
        info!(index, "Item cancellation requested");
        Ok(())
    }

    /// Resolve the pending confirmation. `path` must name the pending item;
    /// `text` is what gets saved, so callers may pass an edited transcript.
    /// Returns the index of the confirmed item.
    pub fn confirm_and_continue(
        &self,
        decision: Decision,
        path: PathBuf,
        text: String,
    ) -> Result<usize, BatchError> {
        let index = self.inner.gate.resolve(Resolution { decision, path, text })?;
        debug!(index, ?decision, "Confirmation received");
        Ok(index)
    }

    pub fn status(&self) -> BatchStatus {
        let control = self.inner.lock();
        BatchStatus {
            phase: control.phase,
            run_id: control.run_id,
            current_index: control.current_index,
            total: control.total,
            pending_confirmation: self.inner.gate.pending_index(),
            cancel_requested: control.cancel_requested,
            started_at: control.started_at,
            last_run: control.last_run.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().phase.is_active()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_worker(
        self: Arc<Self>,
        mut run: BatchRun,
        config: TranscriptionConfig,
        run_token: CancellationToken,
    ) -> RunOutcome {
        let total = run.total();
        let mut processed = 0;
        let mut fault = None;

        for position in 0..total {
            if run_token.is_cancelled() {
                debug!(run_id = %run.id, position, "Run cancelled, remaining items skipped");
                break;
            }

            let item = run.items[position].clone();
            if let Err(e) = run.advance_to(item.index) {
                fault = Some(e);
                break;
            }

            let item_token = run_token.child_token();
            {
                let mut control = self.lock();
                control.current_index = Some(item.index);
                control.item_token = Some(item_token.clone());
                control.set_worker_phase(BatchPhase::Running);
            }

            self.events.emit(BatchEvent::BatchProgress {
                percent: run.percent_before(position),
                message: format!("Processing item {} of {}: {}", position + 1, total, item.display_name()),
            });

            if let Err(e) = self.process_item(&mut run, &item, &config, &item_token, &run_token).await {
                fault = Some(e);
                processed += 1;
                break;
            }
            processed += 1;
        }

        RunOutcome {
            results: run.results,
            processed,
            final_index: run.current_index,
            fault,
        }
    }

    /// Transcribe, confirm and persist one item. `Err` only for broken invariants.
    async fn process_item(
        &self,
        run: &mut BatchRun,
        item: &MediaItem,
        config: &TranscriptionConfig,
        item_token: &CancellationToken,
        run_token: &CancellationToken,
    ) -> Result<(), String> {
        let exists = tokio::fs::metadata(&item.path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false);
        if !exists {
            warn!(index = item.index, path = %item.path.display(), "Media file missing, skipping");
            self.events.error(format!("File not found: {}", item.path.display()));
            return Ok(());
        }

        self.events.emit(BatchEvent::ItemProgress {
            index: item.index,
            percent: 0,
            message: "Starting transcription...".to_string(),
        });

        let text = match self.transcribe(item, config, item_token, run_token).await {
            Transcription::Text(text) => text,
            Transcription::Failed(message) => {
                warn!(index = item.index, %message, "Transcription failed, moving on");
                self.events.error(format!("Error processing {}: {}", item.display_name(), message));
                return Ok(());
            }
            Transcription::Cancelled => {
                info!(index = item.index, "Item cancelled during transcription");
                return Ok(());
            }
        };

        self.events.emit(BatchEvent::ItemProgress {
            index: item.index,
            percent: 100,
            message: "Transcription completed".to_string(),
        });

        let pending = self.gate.arm(item.index, item.path.clone())?;
        self.lock().set_worker_phase(BatchPhase::AwaitingConfirmation);
        self.events.emit(BatchEvent::ConfirmationNeeded {
            index: item.index,
            path: item.path.clone(),
            text,
        });

        let resolution = match pending.wait(item_token).await {
            GateOutcome::Resolved(resolution) => resolution,
            GateOutcome::Interrupted => {
                info!(index = item.index, "Confirmation wait interrupted, transcript discarded");
                return Ok(());
            }
        };

        if resolution.decision.saves() {
            self.save(run, item, resolution.text).await;
        }

        if resolution.decision.stops() {
            info!(index = item.index, decision = ?resolution.decision, "Stopping after this item");
            let mut control = self.lock();
            control.cancel_requested = true;
            control.phase = BatchPhase::Cancelling;
            run_token.cancel();
        }

        Ok(())
    }

    /// Run the engine for one item, forwarding its progress. Watches the item
    /// token the whole time.
    async fn transcribe(
        &self,
        item: &MediaItem,
        config: &TranscriptionConfig,
        token: &CancellationToken,
        run_token: &CancellationToken,
    ) -> Transcription {
        let mut job = match self.engine.start(&item.path, config) {
            Ok(job) => job,
            Err(e) => return Transcription::Failed(e.to_string()),
        };

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.engine.cancel();
                    self.release(item.index, job, run_token).await;
                    return Transcription::Cancelled;
                }
                event = job.next_event() => match event {
                    Some(EngineEvent::Progress { percent, message }) => {
                        self.events.emit(BatchEvent::ItemProgress { index: item.index, percent, message });
                    }
                    Some(EngineEvent::Complete(text)) => return Transcription::Text(text),
                    Some(EngineEvent::Error(_)) | None if token.is_cancelled() => {
                        return Transcription::Cancelled;
                    }
                    Some(EngineEvent::Error(message)) => return Transcription::Failed(message),
                    None => {
                        return Transcription::Failed("Transcription ended without a result".to_string());
                    }
                },
            }
        }
    }

    /// Wait for a cancelled job to acknowledge, so the engine is free for the
    /// next item. A slow engine is waited out; only a run cancel gives up on it.
    async fn release(&self, index: usize, mut job: EngineJob, run_token: &CancellationToken) {
        let drain = async {
            while let Some(event) = job.next_event().await {
                if event.is_terminal() {
                    break;
                }
            }
        };
        tokio::pin!(drain);

        if tokio::time::timeout(self.options.release_grace, &mut drain).await.is_ok() {
            return;
        }
        warn!(
            index,
            grace_ms = self.options.release_grace.as_millis() as u64,
            "Engine slow to acknowledge cancellation, still waiting"
        );

        tokio::select! {
            _ = &mut drain => debug!(index, "Engine released after cancellation"),
            _ = run_token.cancelled() => warn!(index, "Run cancelled before the engine released"),
        }
    }

    /// Persist next to the item's own media file.
    async fn save(&self, run: &mut BatchRun, item: &MediaItem, text: String) {
        let path = item.path.clone();
        let output_path = output_path_for(&path, &self.options.output_extension);
        match save_transcript(&output_path, &text).await {
            Ok(()) => {
                info!(index = item.index, output = %output_path.display(), "Transcript saved");
                run.results.insert(ItemResult {
                    index: item.index,
                    path: path.clone(),
                    output_path: Some(output_path.clone()),
                    text,
                });
                self.events.emit(BatchEvent::ItemCompleted { index: item.index, path, output_path });
            }
            Err(e) => {
                error!(index = item.index, error = %e, "Saving transcript failed");
                self.events.error(format!("{:#}", e));
            }
        }
    }

    /// Publish the terminal event and return to `Idle`.
    fn finish(&self, run_id: uuid::Uuid, outcome: RunOutcome) {
        let mut control = self.lock();
        let cancelled = control.cancel_requested;
        let phase = if outcome.fault.is_some() { BatchPhase::Failed } else { BatchPhase::Completed };
        control.phase = phase;

        let summary = RunSummary {
            run_id,
            phase,
            total: control.total,
            processed: outcome.processed,
            saved: outcome.results.len(),
            final_index: outcome.final_index,
            cancelled,
            finished_at: Utc::now(),
        };

        match outcome.fault {
            Some(message) => {
                error!(%run_id, %message, "Batch failed");
                self.events.error(message);
                self.events.emit(BatchEvent::BatchFailed { run_id, results: outcome.results });
            }
            None => {
                info!(
                    %run_id,
                    processed = summary.processed,
                    saved = summary.saved,
                    cancelled,
                    "Batch completed"
                );
                self.events.emit(BatchEvent::BatchCompleted { run_id, results: outcome.results, cancelled });
            }
        }

        *control = Control::idle(Some(summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::{job_channel, EngineError, SingleFlight};
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    /// What the scripted engine does for a given file name.
    #[derive(Clone)]
    enum Script {
        Succeed(String),
        Fail(String),
        /// Never finishes unless cancelled
        Hang,
        /// Acknowledges a cancel only after the given delay
        Stubborn(Duration),
        /// `start` itself panics
        Panic,
    }

    /// Engine whose behaviour per file is fixed up front.
    struct ScriptedEngine {
        scripts: HashMap<String, Script>,
        flight: SingleFlight,
        token: Mutex<Option<CancellationToken>>,
        started: Mutex<Vec<PathBuf>>,
    }

    impl ScriptedEngine {
        fn new(scripts: &[(&str, Script)]) -> Arc<Self> {
            Arc::new(Self {
                scripts: scripts.iter().map(|(n, s)| (n.to_string(), s.clone())).collect(),
                flight: SingleFlight::new(),
                token: Mutex::new(None),
                started: Mutex::new(Vec::new()),
            })
        }

        fn started(&self) -> Vec<String> {
            self.started
                .lock()
                .unwrap()
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        }
    }

    impl TranscriptionEngine for ScriptedEngine {
        fn start(&self, path: &Path, _config: &TranscriptionConfig) -> Result<EngineJob, EngineError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            let script = self.scripts.get(&name).cloned().unwrap_or(Script::Succeed(name));
            if let Script::Panic = script {
                panic!("engine crashed on {}", path.display());
            }

            let guard = self.flight.try_acquire().ok_or(EngineError::Busy)?;
            self.started.lock().unwrap().push(path.to_path_buf());
            let token = CancellationToken::new();
            *self.token.lock().unwrap() = Some(token.clone());

            let (mut reporter, job) = job_channel(guard);
            tokio::spawn(async move {
                reporter.progress(10, "Loading base model...");
                match script {
                    Script::Succeed(text) => {
                        reporter.progress(90, "Finalizing...");
                        reporter.complete(text);
                    }
                    Script::Fail(message) => reporter.fail(message),
                    Script::Hang => {
                        token.cancelled().await;
                        reporter.fail("Transcription cancelled");
                    }
                    Script::Stubborn(delay) => {
                        token.cancelled().await;
                        tokio::time::sleep(delay).await;
                        reporter.fail("Transcription cancelled");
                    }
                    Script::Panic => unreachable!(),
                }
            });
            Ok(job)
        }

        fn cancel(&self) -> bool {
            match self.token.lock().unwrap().as_ref() {
                Some(token) if self.flight.is_busy() => {
                    token.cancel();
                    true
                }
                _ => false,
            }
        }

        fn is_busy(&self) -> bool {
            self.flight.is_busy()
        }
    }

    fn media_dir(names: &[&str]) -> (TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, b"fake media").unwrap();
                path
            })
            .collect();
        (dir, paths)
    }

    fn orchestrator(engine: Arc<ScriptedEngine>) -> BatchOrchestrator {
        BatchOrchestrator::new(engine, OrchestratorOptions::default())
    }

    async fn next(rx: &mut broadcast::Receiver<BatchEvent>) -> BatchEvent {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Collect events until the run ends, answering every confirmation with `decide`.
    async fn drive(
        orchestrator: &BatchOrchestrator,
        rx: &mut broadcast::Receiver<BatchEvent>,
        mut decide: impl FnMut(usize) -> Decision,
    ) -> Vec<BatchEvent> {
        let mut seen = Vec::new();
        loop {
            let event = next(rx).await;
            if let BatchEvent::ConfirmationNeeded { index, path, text } = &event {
                orchestrator
                    .confirm_and_continue(decide(*index), path.clone(), text.clone())
                    .unwrap();
            }
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                return seen;
            }
        }
    }

    fn completed_results(events: &[BatchEvent]) -> (BatchResults, bool) {
        match events.last() {
            Some(BatchEvent::BatchCompleted { results, cancelled, .. }) => (results.clone(), *cancelled),
            other => panic!("expected batch_completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_items_confirmed_and_saved() {
        let (_dir, paths) = media_dir(&["a.mp3", "b.wav", "c.mkv"]);
        let engine = ScriptedEngine::new(&[]);
        let orchestrator = orchestrator(engine.clone());
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths.clone(), TranscriptionConfig::default()).unwrap();
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;

        let (results, cancelled) = completed_results(&events);
        assert!(!cancelled);
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(
            events.iter().filter(|e| matches!(e, BatchEvent::BatchCompleted { .. })).count(),
            1
        );

        let transcript = std::fs::read_to_string(paths[1].with_extension("txt")).unwrap();
        assert_eq!(transcript, "b.wav");

        let status = orchestrator.status();
        assert_eq!(status.phase, BatchPhase::Idle);
        let last = status.last_run.unwrap();
        assert_eq!(last.phase, BatchPhase::Completed);
        assert_eq!(last.final_index, Some(2));
        assert_eq!(last.saved, 3);
    }

    #[tokio::test]
    async fn test_failed_item_skips_confirmation_and_continues() {
        let (_dir, paths) = media_dir(&["a.mp3", "b.mp3", "c.mp3"]);
        let engine = ScriptedEngine::new(&[("b.mp3", Script::Fail("decoder exploded".to_string()))]);
        let orchestrator = orchestrator(engine.clone());
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;

        let confirmations: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::ConfirmationNeeded { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(confirmations, vec![0, 2]);

        let errors: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Error { message } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("decoder exploded"));

        assert_eq!(engine.started(), vec!["a.mp3", "b.mp3", "c.mp3"]);
        assert_eq!(completed_results(&events).0.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped_without_engine() {
        let (_dir, mut paths) = media_dir(&["a.mp3"]);
        paths.insert(0, PathBuf::from("/no/such/dir/gone.mp3"));
        let engine = ScriptedEngine::new(&[]);
        let orchestrator = orchestrator(engine.clone());
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;

        assert!(events.iter().any(
            |e| matches!(e, BatchEvent::Error { message } if message.starts_with("File not found"))
        ));
        assert_eq!(engine.started(), vec!["a.mp3"]);
        assert_eq!(completed_results(&events).0.len(), 1);
    }

    #[tokio::test]
    async fn test_save_and_stop_keeps_one_result() {
        let (_dir, paths) = media_dir(&["a.mp3", "b.mp3", "c.mp3"]);
        let engine = ScriptedEngine::new(&[]);
        let orchestrator = orchestrator(engine.clone());
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndStop).await;

        let (results, cancelled) = completed_results(&events);
        assert!(cancelled);
        assert_eq!(results.len(), 1);
        assert_eq!(results.get(0).unwrap().text, "a.mp3");
        assert_eq!(engine.started(), vec!["a.mp3"]);
    }

    #[tokio::test]
    async fn test_discard_and_stop_saves_nothing() {
        let (_dir, paths) = media_dir(&["a.mp3", "b.mp3"]);
        let orchestrator = orchestrator(ScriptedEngine::new(&[]));
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths.clone(), TranscriptionConfig::default()).unwrap();
        let events = drive(&orchestrator, &mut rx, |_| Decision::DiscardAndStop).await;

        assert!(completed_results(&events).0.is_empty());
        assert!(!paths[0].with_extension("txt").exists());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_confirmation_wait() {
        let (_dir, paths) = media_dir(&["a.mp3", "b.mp3", "c.mp3", "d.mp3", "e.mp3"]);
        let engine = ScriptedEngine::new(&[]);
        let orchestrator = orchestrator(engine.clone());
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        loop {
            if let BatchEvent::ConfirmationNeeded { index, .. } = next(&mut rx).await {
                assert_eq!(index, 0);
                break;
            }
        }
        assert_eq!(orchestrator.status().phase, BatchPhase::AwaitingConfirmation);

        assert!(orchestrator.cancel());
        assert!(!orchestrator.cancel());

        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;
        let (results, cancelled) = completed_results(&events);
        assert!(cancelled);
        assert!(results.is_empty());
        assert_eq!(engine.started(), vec!["a.mp3"]);
        assert!(!orchestrator.is_running());
        assert!(!orchestrator.cancel());
    }

    #[tokio::test]
    async fn test_cancel_during_transcription_stops_engine() {
        let (_dir, paths) = media_dir(&["slow.mp3", "b.mp3"]);
        let engine = ScriptedEngine::new(&[("slow.mp3", Script::Hang)]);
        let orchestrator = orchestrator(engine.clone());
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        loop {
            if let BatchEvent::ItemProgress { index: 0, percent: 10, .. } = next(&mut rx).await {
                break;
            }
        }

        assert!(orchestrator.cancel());
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;

        assert!(completed_results(&events).1);
        assert!(!events.iter().any(|e| matches!(e, BatchEvent::Error { .. })));
        assert_eq!(engine.started(), vec!["slow.mp3"]);
        assert!(!engine.is_busy());
    }

    #[tokio::test]
    async fn test_cancel_item_moves_to_next_item() {
        let (_dir, paths) = media_dir(&["slow.mp3", "b.mp3"]);
        let engine = ScriptedEngine::new(&[("slow.mp3", Script::Hang)]);
        let orchestrator = orchestrator(engine.clone());
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        loop {
            if let BatchEvent::ItemProgress { index: 0, percent: 10, .. } = next(&mut rx).await {
                break;
            }
        }

        assert_eq!(
            orchestrator.cancel_item(1),
            Err(BatchError::NotCurrentItem { requested: 1, current: Some(0) })
        );
        orchestrator.cancel_item(0).unwrap();

        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;
        let (results, cancelled) = completed_results(&events);
        assert!(!cancelled);
        assert_eq!(results.len(), 1);
        assert_eq!(results.get(1).unwrap().text, "b.mp3");
        assert_eq!(engine.started(), vec!["slow.mp3", "b.mp3"]);
    }

    #[tokio::test]
    async fn test_second_batch_is_rejected_while_running() {
        let (_dir, paths) = media_dir(&["slow.mp3"]);
        let engine = ScriptedEngine::new(&[("slow.mp3", Script::Hang)]);
        let orchestrator = orchestrator(engine.clone());
        let mut rx = orchestrator.subscribe();

        let run_id = orchestrator.process_batch(paths.clone(), TranscriptionConfig::default()).unwrap();
        assert_eq!(
            orchestrator.process_batch(paths, TranscriptionConfig::default()),
            Err(BatchError::AlreadyRunning)
        );

        let status = orchestrator.status();
        assert_eq!(status.run_id, Some(run_id));
        assert_eq!(status.total, 1);
        assert!(status.phase.is_active());

        orchestrator.cancel();
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;
        assert!(matches!(
            events.last(),
            Some(BatchEvent::BatchCompleted { run_id: finished, .. }) if *finished == run_id
        ));
    }

    #[tokio::test]
    async fn test_usage_errors_without_run() {
        let orchestrator = orchestrator(ScriptedEngine::new(&[]));

        assert!(!orchestrator.cancel());
        assert_eq!(orchestrator.cancel_item(0), Err(BatchError::NotRunning));
        assert_eq!(
            orchestrator.confirm_and_continue(Decision::SaveAndContinue, PathBuf::from("a"), String::new()),
            Err(BatchError::NoPendingConfirmation)
        );

        let mut config = TranscriptionConfig::default();
        config.language = "not-a-language".to_string();
        assert!(matches!(
            orchestrator.process_batch(vec![], config),
            Err(BatchError::InvalidConfig(_))
        ));
        assert_eq!(orchestrator.status().phase, BatchPhase::Idle);
    }

    #[tokio::test]
    async fn test_empty_batch_completes_immediately() {
        let orchestrator = orchestrator(ScriptedEngine::new(&[]));
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(vec![], TranscriptionConfig::default()).unwrap();
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;
        assert!(completed_results(&events).0.is_empty());
    }

    #[tokio::test]
    async fn test_edited_transcript_is_saved_verbatim() {
        let (dir, paths) = media_dir(&["a.mp3"]);
        let orchestrator = orchestrator(ScriptedEngine::new(&[]));
        let mut rx = orchestrator.subscribe();
        let edited = "Edited by hand.\n  Keeps  spacing\tand ünïcode\n";

        orchestrator.process_batch(paths.clone(), TranscriptionConfig::default()).unwrap();
        loop {
            match next(&mut rx).await {
                BatchEvent::ConfirmationNeeded { path, .. } => {
                    orchestrator
                        .confirm_and_continue(Decision::SaveAndContinue, path, edited.to_string())
                        .unwrap();
                }
                BatchEvent::ItemCompleted { output_path, .. } => {
                    assert_eq!(output_path, dir.path().join("a.txt"));
                }
                event if event.is_terminal() => break,
                _ => {}
            }
        }

        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), edited);
    }

    #[tokio::test]
    async fn test_save_failure_reports_error_and_advances() {
        let (dir, paths) = media_dir(&["a.mp3", "b.mp3"]);
        // A directory where the transcript should go makes the write fail.
        std::fs::create_dir(dir.path().join("a.txt")).unwrap();

        let orchestrator = orchestrator(ScriptedEngine::new(&[]));
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;

        assert!(events.iter().any(
            |e| matches!(e, BatchEvent::Error { message } if message.contains("Error saving file"))
        ));
        let (results, _) = completed_results(&events);
        assert_eq!(results.len(), 1);
        assert_eq!(results.get(1).unwrap().text, "b.mp3");
    }

    #[tokio::test]
    async fn test_events_for_items_do_not_interleave() {
        let (_dir, paths) = media_dir(&["a.mp3", "b.mp3", "c.mp3"]);
        let orchestrator = orchestrator(ScriptedEngine::new(&[]));
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;

        let indices: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::ItemProgress { index, .. }
                | BatchEvent::ConfirmationNeeded { index, .. }
                | BatchEvent::ItemCompleted { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));

        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::BatchProgress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![0, 33, 66]);
    }

    #[tokio::test]
    async fn test_confirm_for_other_path_is_rejected_and_writes_nothing() {
        let (dir, paths) = media_dir(&["a.mp3"]);
        let elsewhere = tempfile::tempdir().unwrap();
        let victim = elsewhere.path().join("new").join("dir").join("victim.mp3");
        let orchestrator = orchestrator(ScriptedEngine::new(&[]));
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        let pending_path = loop {
            if let BatchEvent::ConfirmationNeeded { index: 0, path, .. } = next(&mut rx).await {
                break path;
            }
        };

        assert!(matches!(
            orchestrator.confirm_and_continue(Decision::SaveAndContinue, victim.clone(), "overwritten".to_string()),
            Err(BatchError::PathMismatch { index: 0, .. })
        ));
        let status = orchestrator.status();
        assert_eq!(status.phase, BatchPhase::AwaitingConfirmation);
        assert_eq!(status.pending_confirmation, Some(0));

        orchestrator
            .confirm_and_continue(Decision::SaveAndContinue, pending_path.clone(), "kept".to_string())
            .unwrap();
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;

        let (results, _) = completed_results(&events);
        assert_eq!(results.get(0).unwrap().path, pending_path);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "kept");
        assert!(!victim.with_extension("txt").exists());
        assert!(!elsewhere.path().join("new").exists());
    }

    #[tokio::test]
    async fn test_worker_panic_fails_the_run() {
        let (_dir, paths) = media_dir(&["crash.mp3", "b.mp3"]);
        let engine = ScriptedEngine::new(&[("crash.mp3", Script::Panic)]);
        let orchestrator = orchestrator(engine.clone());
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;

        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec!["batch_started", "batch_progress", "item_progress", "error", "batch_failed"]
        );
        assert!(matches!(
            &events[3],
            BatchEvent::Error { message } if message.contains("terminated unexpectedly")
        ));

        let status = orchestrator.status();
        assert_eq!(status.phase, BatchPhase::Idle);
        assert_eq!(status.last_run.unwrap().phase, BatchPhase::Failed);
        assert!(engine.started().is_empty());

        // The orchestrator accepts new work after a failed run.
        assert!(orchestrator.process_batch(vec![], TranscriptionConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_item_at_confirmation_discards_and_continues() {
        let (dir, paths) = media_dir(&["a.mp3", "b.mp3"]);
        let engine = ScriptedEngine::new(&[]);
        let orchestrator = orchestrator(engine.clone());
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        loop {
            if let BatchEvent::ConfirmationNeeded { index: 0, .. } = next(&mut rx).await {
                break;
            }
        }
        orchestrator.cancel_item(0).unwrap();

        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;
        let confirmations: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::ConfirmationNeeded { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(confirmations, vec![1]);

        let (results, cancelled) = completed_results(&events);
        assert!(!cancelled);
        assert_eq!(results.len(), 1);
        assert!(results.get(0).is_none());
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(engine.started(), vec!["a.mp3", "b.mp3"]);
    }

    #[tokio::test]
    async fn test_slow_cancel_does_not_cost_the_next_item() {
        let (_dir, paths) = media_dir(&["slow.mp3", "b.mp3"]);
        let engine = ScriptedEngine::new(&[("slow.mp3", Script::Stubborn(Duration::from_millis(200)))]);
        let options = OrchestratorOptions { release_grace: Duration::from_millis(20), ..Default::default() };
        let orchestrator = BatchOrchestrator::new(engine.clone(), options);
        let mut rx = orchestrator.subscribe();

        orchestrator.process_batch(paths, TranscriptionConfig::default()).unwrap();
        loop {
            if let BatchEvent::ItemProgress { index: 0, percent: 10, .. } = next(&mut rx).await {
                break;
            }
        }
        orchestrator.cancel_item(0).unwrap();

        let events = drive(&orchestrator, &mut rx, |_| Decision::SaveAndContinue).await;
        assert!(!events.iter().any(|e| matches!(e, BatchEvent::Error { .. })));
        let (results, cancelled) = completed_results(&events);
        assert!(!cancelled);
        assert_eq!(results.get(1).unwrap().text, "b.mp3");
        assert_eq!(engine.started(), vec!["slow.mp3", "b.mp3"]);
    }
}
