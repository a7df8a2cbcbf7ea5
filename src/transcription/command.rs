//! # Command Engine
//!
//! A [`TranscriptionEngine`] that runs an external transcriber program (for
//! example a whisper.cpp CLI build) once per item and takes the transcript
//! from its standard output.
//!
//! ## Argument Templates:
//! Arguments come from configuration and may contain placeholders:
//! - `{input}`: path of the media file
//! - `{model}`: model tier name ("tiny" ... "large")
//! - `{language}`: language code (only in `language_args`, skipped for "auto")
//! - `{device}`: resolved device ("cpu" / "accelerated")
//!
//! ## Model Reuse:
//! The resolved program and model selection are kept as an owned
//! [`LoadedModel`] and reused while consecutive items ask for the same model
//! and device. A different model replaces it.

use crate::config::EngineConfig;
use crate::device::DeviceManager;
use crate::transcription::engine::{
    job_channel, EngineError, EngineJob, JobReporter, SingleFlight, TranscriptionEngine,
};
use crate::transcription::estimate::{estimate_duration, format_duration};
use crate::transcription::model::{ComputeDevice, ModelSize, TranscriptionConfig};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The engine-side resource reused across items of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModel {
    pub model: ModelSize,
    pub device: ComputeDevice,
    pub program: PathBuf,
}

/// Runs an external transcriber program, one job at a time.
pub struct CommandEngine {
    settings: Arc<EngineConfig>,
    flight: SingleFlight,
    current_job: Arc<Mutex<Option<CancellationToken>>>,
    loaded: Arc<tokio::sync::Mutex<Option<LoadedModel>>>,
}

impl CommandEngine {
    pub fn new(settings: EngineConfig) -> Self {
        Self {
            settings: Arc::new(settings),
            flight: SingleFlight::new(),
            current_job: Arc::new(Mutex::new(None)),
            loaded: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// The model currently held by the engine, if any.
    pub async fn loaded_model(&self) -> Option<LoadedModel> {
        self.loaded.lock().await.clone()
    }

    /// Drop the loaded model so the next job resolves it again.
    pub async fn unload(&self) {
        info!("Unloading transcription model");
        *self.loaded.lock().await = None;
    }

    async fn run_job(
        settings: Arc<EngineConfig>,
        loaded: Arc<tokio::sync::Mutex<Option<LoadedModel>>>,
        path: PathBuf,
        config: TranscriptionConfig,
        token: CancellationToken,
        mut reporter: JobReporter,
    ) {
        let started = Instant::now();

        let file_size = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            _ => {
                reporter.fail(format!("File not found: {}", path.display()));
                return;
            }
        };

        let device = DeviceManager::resolve(config.device);
        if config.device == ComputeDevice::Accelerated && device == ComputeDevice::Cpu {
            reporter.progress(0, "GPU not available, using CPU");
        }

        reporter.progress(10, format!("Loading {} model...", config.model));
        let program = match Self::ensure_loaded(&settings, &loaded, config.model, device).await {
            Ok(program) => program,
            Err(e) => {
                reporter.fail(e.to_string());
                return;
            }
        };

        if token.is_cancelled() {
            reporter.fail("Transcription cancelled");
            return;
        }

        let estimate = estimate_duration(file_size, config.model, device);
        reporter.progress(
            30,
            format!("Starting transcription... Estimated time: {}", format_duration(estimate)),
        );

        let args = render_args(&settings, &path, &config, device);
        debug!(program = %program.display(), ?args, "Spawning transcriber");

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                reporter.fail(EngineError::Spawn(e.to_string()).to_string());
                return;
            }
        };

        // Dropping the pending output future kills the child (kill_on_drop).
        let output = tokio::select! {
            output = child.wait_with_output() => output,
            _ = token.cancelled() => {
                info!(path = %path.display(), "Transcription cancelled, transcriber killed");
                reporter.fail("Transcription cancelled");
                return;
            }
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                reporter.fail(format!("Transcription error: {}", e));
                return;
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "Transcriber exited with failure");
            reporter.fail(format!("Transcription error: {}", stderr.trim()));
            return;
        }

        reporter.progress(
            90,
            format!("Finalizing transcription... Elapsed: {}", format_duration(started.elapsed())),
        );

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(
            path = %path.display(),
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transcription completed"
        );
        reporter.complete(text);
    }

    /// Reuse the loaded model when it matches, otherwise resolve a new one.
    async fn ensure_loaded(
        settings: &EngineConfig,
        loaded: &tokio::sync::Mutex<Option<LoadedModel>>,
        model: ModelSize,
        device: ComputeDevice,
    ) -> Result<PathBuf, EngineError> {
        let mut slot = loaded.lock().await;
        if let Some(current) = slot.as_ref() {
            if current.model == model && current.device == device {
                debug!(%model, "Reusing loaded model");
                return Ok(current.program.clone());
            }
        }

        let program = resolve_program(&settings.program).ok_or_else(|| {
            EngineError::Unavailable(format!("Transcriber program not found: {}", settings.program))
        })?;

        info!(%model, device = DeviceManager::describe(device), program = %program.display(), "Model loaded");
        *slot = Some(LoadedModel { model, device, program: program.clone() });
        Ok(program)
    }
}

impl TranscriptionEngine for CommandEngine {
    fn start(&self, path: &Path, config: &TranscriptionConfig) -> Result<EngineJob, EngineError> {
        let guard = self.flight.try_acquire().ok_or(EngineError::Busy)?;

        let token = CancellationToken::new();
        if let Ok(mut current) = self.current_job.lock() {
            *current = Some(token.clone());
        }

        let (reporter, job) = job_channel(guard);
        tokio::spawn(Self::run_job(
            self.settings.clone(),
            self.loaded.clone(),
            path.to_path_buf(),
            config.clone(),
            token,
            reporter,
        ));

        Ok(job)
    }

    fn cancel(&self) -> bool {
        if !self.flight.is_busy() {
            return false;
        }
        match self.current_job.lock() {
            Ok(current) => match current.as_ref() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    fn is_busy(&self) -> bool {
        self.flight.is_busy()
    }
}

/// Expand the argument templates for one job.
fn render_args(
    settings: &EngineConfig,
    input: &Path,
    config: &TranscriptionConfig,
    device: ComputeDevice,
) -> Vec<String> {
    let input = input.to_string_lossy();
    let model = config.model.to_string();
    let device_name = device.to_string();
    let expand = |arg: &String, language: &str| {
        arg.replace("{input}", &input)
            .replace("{model}", &model)
            .replace("{device}", &device_name)
            .replace("{language}", language)
    };

    let mut args: Vec<String> = settings.args.iter().map(|a| expand(a, "")).collect();
    if let Some(language) = config.language_hint() {
        args.extend(settings.language_args.iter().map(|a| expand(a, language)));
    }
    if device == ComputeDevice::Cpu {
        args.extend(settings.cpu_args.iter().map(|a| expand(a, "")));
    }
    args
}

/// Find the transcriber program, either as a path or on `PATH`. Only
/// executables match; `PATHEXT` applies on Windows.
fn resolve_program(program: &str) -> Option<PathBuf> {
    match which::which(program) {
        Ok(path) => Some(path),
        Err(e) => {
            debug!(program, error = %e, "Transcriber lookup failed");
            None
        }
    }
}
