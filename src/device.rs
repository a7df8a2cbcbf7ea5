//! # Accelerator Detection
//!
//! Decides whether an "accelerated" transcription request can actually run on
//! a GPU, so engines can fall back to the CPU and say so. Detection is cheap
//! but not free, so the answer is cached for the life of the process.

use crate::transcription::model::ComputeDevice;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Cached accelerator availability to avoid repeated detection
static ACCELERATOR_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Device detection and selection utilities
pub struct DeviceManager;

impl DeviceManager {
    /// Resolve the requested device to one that is usable on this machine.
    pub fn resolve(requested: ComputeDevice) -> ComputeDevice {
        match requested {
            ComputeDevice::Accelerated if Self::is_accelerator_available() => ComputeDevice::Accelerated,
            _ => ComputeDevice::Cpu,
        }
    }

    /// Whether a GPU accelerator is available (cached).
    pub fn is_accelerator_available() -> bool {
        *ACCELERATOR_AVAILABLE.get_or_init(Self::detect_accelerator)
    }

    fn detect_accelerator() -> bool {
        info!("Detecting compute accelerator...");

        if Self::cuda_disabled_by_env() {
            info!("CUDA disabled through CUDA_VISIBLE_DEVICES, using CPU");
            return false;
        }

        if Self::has_cuda_device() {
            info!("CUDA device detected");
            return true;
        }

        if Self::has_metal_device() {
            info!("Metal device detected (Apple Silicon)");
            return true;
        }

        info!("No accelerator available, transcription will run on CPU");
        false
    }

    fn cuda_disabled_by_env() -> bool {
        match std::env::var("CUDA_VISIBLE_DEVICES") {
            Ok(value) => {
                let value = value.trim();
                value.is_empty() || value == "-1"
            }
            Err(_) => false,
        }
    }

    fn has_cuda_device() -> bool {
        let present = Path::new("/dev/nvidia0").exists() || Path::new("/proc/driver/nvidia/version").exists();
        debug!("CUDA device node present: {}", present);
        present
    }

    fn has_metal_device() -> bool {
        cfg!(all(target_os = "macos", target_arch = "aarch64"))
    }

    /// Get device information for logging/debugging
    pub fn describe(device: ComputeDevice) -> &'static str {
        match device {
            ComputeDevice::Cpu => "CPU",
            ComputeDevice::Accelerated => "GPU",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_always_resolves_to_cpu() {
        assert_eq!(DeviceManager::resolve(ComputeDevice::Cpu), ComputeDevice::Cpu);
    }

    #[test]
    fn test_accelerated_resolution_matches_detection() {
        let resolved = DeviceManager::resolve(ComputeDevice::Accelerated);
        if DeviceManager::is_accelerator_available() {
            assert_eq!(resolved, ComputeDevice::Accelerated);
        } else {
            assert_eq!(resolved, ComputeDevice::Cpu);
        }
    }
}
