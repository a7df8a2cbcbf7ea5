//! # Transcription Settings
//!
//! Model tiers, compute devices, and the per-batch transcription configuration
//! handed to the engine adapter. A `TranscriptionConfig` is supplied once per
//! batch and is read-only while the batch runs.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Available Whisper model tiers, ordered from smallest to largest.
///
/// ## Trade-offs:
/// - **Size vs Accuracy**: Larger models are more accurate but slower
/// - **Estimation**: Each tier carries a seconds-per-MB factor used only for
///   advisory progress text (see `estimate.rs`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// All tiers, smallest first.
    pub const ALL: [ModelSize; 5] = [
        ModelSize::Tiny,
        ModelSize::Base,
        ModelSize::Small,
        ModelSize::Medium,
        ModelSize::Large,
    ];

    /// Get the approximate model size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "Fastest, basic accuracy",
            ModelSize::Base => "Fast, good for testing",
            ModelSize::Small => "Balanced speed and accuracy",
            ModelSize::Medium => "Good accuracy, handles technical vocabulary",
            ModelSize::Large => "Best accuracy, slower processing",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Compute device requested for a batch.
///
/// `Accelerated` is a request, not a guarantee: adapters fall back to the CPU
/// when no accelerator is present and say so in their progress messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Accelerated,
}

impl std::str::FromStr for ComputeDevice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(ComputeDevice::Cpu),
            "accelerated" | "gpu" | "cuda" | "metal" => Ok(ComputeDevice::Accelerated),
            _ => Err(anyhow!("Unknown compute device: {}", s)),
        }
    }
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "cpu"),
            ComputeDevice::Accelerated => write!(f, "accelerated"),
        }
    }
}

/// Settings for every item of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// `"auto"` for language detection, otherwise an ISO 639-1 code ("en", "pt", ...)
    pub language: String,

    /// Which model tier to transcribe with
    pub model: ModelSize,

    /// Requested compute device
    pub device: ComputeDevice,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            model: ModelSize::Base,
            device: ComputeDevice::Cpu,
        }
    }
}

impl TranscriptionConfig {
    /// Language hint to pass to the engine; `None` means auto-detect.
    pub fn language_hint(&self) -> Option<&str> {
        if self.language.eq_ignore_ascii_case("auto") {
            None
        } else {
            Some(self.language.as_str())
        }
    }

    /// Check the configuration before a batch is accepted.
    pub fn validate(&self) -> Result<()> {
        let language = self.language.trim();
        if language.is_empty() {
            return Err(anyhow!("Language must be \"auto\" or an ISO language code"));
        }
        if !language.eq_ignore_ascii_case("auto")
            && !(2..=3).contains(&language.len())
        {
            return Err(anyhow!("Invalid language code: {}", self.language));
        }
        Ok(())
    }
}
