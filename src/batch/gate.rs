//! # Confirmation Gate
//!
//! Single-slot rendezvous between the worker and whoever confirms a
//! transcript. The worker [`arm`](ConfirmationGate::arm)s the gate before it
//! announces the transcript, then waits on the returned
//! [`PendingConfirmation`]. The wait ends on exactly one of:
//! - a [`resolve`](ConfirmationGate::resolve) call carrying the decision
//! - the cancellation token passed to [`PendingConfirmation::wait`]
//!
//! There is no polling: the wait is a oneshot receive raced against the token.

use crate::batch::item::Decision;
use crate::error::BatchError;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A decision plus the (possibly edited) transcript to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: Decision,
    pub path: PathBuf,
    pub text: String,
}

/// How a confirmation wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Resolved(Resolution),
    Interrupted,
}

#[derive(Debug)]
struct Armed {
    index: usize,
    path: PathBuf,
    tx: oneshot::Sender<Resolution>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfirmationGate {
    slot: Arc<Mutex<Option<Armed>>>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Armed>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open the gate for the item at `index`. Fails if a confirmation is
    /// already pending.
    pub fn arm(&self, index: usize, path: PathBuf) -> Result<PendingConfirmation, String> {
        let mut slot = self.lock();
        if let Some(armed) = slot.as_ref() {
            return Err(format!(
                "Confirmation for item {} requested while item {} is still pending",
                index, armed.index
            ));
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(Armed { index, path, tx });
        Ok(PendingConfirmation { gate: self.clone(), index, rx })
    }

    /// Deliver a decision to the waiting worker. Returns the item index it
    /// applied to. A second resolve for the same wait is rejected, as is a
    /// resolution naming a different file than the pending item. A rejected
    /// resolve leaves the gate armed.
    pub fn resolve(&self, resolution: Resolution) -> Result<usize, BatchError> {
        let armed = {
            let mut slot = self.lock();
            let pending = slot.as_ref().ok_or(BatchError::NoPendingConfirmation)?;
            if pending.path != resolution.path {
                return Err(BatchError::PathMismatch {
                    index: pending.index,
                    expected: pending.path.clone(),
                    actual: resolution.path,
                });
            }
            slot.take().ok_or(BatchError::NoPendingConfirmation)?
        };
        let index = armed.index;
        armed
            .tx
            .send(resolution)
            .map_err(|_| BatchError::NoPendingConfirmation)?;
        Ok(index)
    }

    /// Index of the item waiting for a decision, if any.
    pub fn pending_index(&self) -> Option<usize> {
        self.lock().as_ref().map(|armed| armed.index)
    }

    fn disarm(&self, index: usize) {
        let mut slot = self.lock();
        if slot.as_ref().map(|armed| armed.index) == Some(index) {
            slot.take();
        }
    }
}

/// The worker's half of an armed gate. Dropping it closes the gate.
#[derive(Debug)]
pub struct PendingConfirmation {
    gate: ConfirmationGate,
    index: usize,
    rx: oneshot::Receiver<Resolution>,
}

impl PendingConfirmation {
    /// Wait for a decision or for `cancel` to fire. A decision that already
    /// arrived wins over a cancellation that fires at the same time.
    pub async fn wait(mut self, cancel: &CancellationToken) -> GateOutcome {
        let outcome = tokio::select! {
            biased;
            received = &mut self.rx => match received {
                Ok(resolution) => GateOutcome::Resolved(resolution),
                Err(_) => GateOutcome::Interrupted,
            },
            _ = cancel.cancelled() => GateOutcome::Interrupted,
        };

        // Once disarmed no resolver can reach us; pick up one that slipped in.
        self.gate.disarm(self.index);
        if outcome == GateOutcome::Interrupted {
            if let Ok(resolution) = self.rx.try_recv() {
                return GateOutcome::Resolved(resolution);
            }
        }
        outcome
    }
}

impl Drop for PendingConfirmation {
    fn drop(&mut self) {
        self.gate.disarm(self.index);
    }
}
