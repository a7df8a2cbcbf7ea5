//! # Batch Module
//!
//! Queued transcription with human confirmation between items.
//!
//! ## Key Components:
//! - **Orchestrator** ([`orchestrator`]): the run state machine and its worker
//! - **Confirmation Gate** ([`gate`]): where the worker waits for a decision
//! - **Events** ([`events`]): what observers see of a run
//! - **Items** ([`item`]): queued files, decisions, phases and results
//! - **Persistence** ([`persist`]): writing accepted transcripts to disk

pub mod events;
pub mod gate;
pub mod item;
pub mod orchestrator;
pub mod persist;

pub use events::{BatchEvent, EventReporter};
pub use item::{BatchPhase, BatchResults, Decision, ItemResult, MediaItem};
pub use orchestrator::{BatchOrchestrator, BatchStatus, OrchestratorOptions, RunSummary};
