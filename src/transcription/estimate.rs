//! # Time Estimation
//!
//! Advisory estimate of how long a transcription will take. The value only
//! feeds human-readable progress text; nothing times out or aborts on it.
//!
//! `estimate = file size (MB) × model factor × device factor`

use crate::transcription::model::{ComputeDevice, ModelSize};
use std::time::Duration;

/// Seconds of processing per MB of media for each model tier.
pub fn model_factor(model: ModelSize) -> f64 {
    match model {
        ModelSize::Tiny => 1.0,
        ModelSize::Base => 2.0,
        ModelSize::Small => 4.0,
        ModelSize::Medium => 8.0,
        ModelSize::Large => 16.0,
    }
}

/// Slowdown applied when running without acceleration.
pub fn device_factor(device: ComputeDevice) -> f64 {
    match device {
        ComputeDevice::Accelerated => 1.0,
        ComputeDevice::Cpu => 3.0,
    }
}

/// Estimate processing time for a file of `file_size_bytes`.
pub fn estimate_duration(file_size_bytes: u64, model: ModelSize, device: ComputeDevice) -> Duration {
    let size_mb = file_size_bytes as f64 / (1024.0 * 1024.0);
    let seconds = size_mb * model_factor(model) * device_factor(device);
    Duration::from_secs_f64(seconds.max(0.0))
}

/// Render a duration as `"1h 2min 3s"`, `"2min 3s"` or `"3s"`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);

    if hours > 0 {
        format!("{}h {}min {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}min {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
