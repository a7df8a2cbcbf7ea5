//! # Transcription Module
//!
//! Everything on the engine side of the batch pipeline.
//!
//! ## Key Components:
//! - **Engine contract** ([`engine`]): the trait the orchestrator drives, its
//!   event stream and the single-flight guard
//! - **Command engine** ([`command`]): runs an external transcriber program
//! - **Model selection** ([`model`]): model tiers, compute device, per-batch settings
//! - **Estimation** ([`estimate`]): advisory processing-time estimates
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, good balance for development
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest

pub mod command;     // External-program engine
pub mod engine;      // Adapter contract
pub mod estimate;    // Processing-time estimates
pub mod model;       // Model tiers and per-batch settings

pub use command::CommandEngine;
pub use engine::{EngineError, EngineEvent, EngineJob, TranscriptionEngine};
pub use model::{ComputeDevice, ModelSize, TranscriptionConfig};
