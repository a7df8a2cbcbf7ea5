//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_PORT, APP_TRANSCRIPTION_MODEL, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use crate::transcription::model::{ComputeDevice, ModelSize, TranscriptionConfig};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub transcription: TranscriptionDefaults,
    pub engine: EngineConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Transcription settings used when a batch request does not carry its own.
///
/// Kept as strings so environment overrides like `APP_TRANSCRIPTION_MODEL=small`
/// work without custom deserializers; `to_transcription_config` parses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionDefaults {
    pub language: String,
    pub model: String,
    pub device: String,
}

impl TranscriptionDefaults {
    pub fn to_transcription_config(&self) -> Result<TranscriptionConfig> {
        let config = TranscriptionConfig {
            language: self.language.clone(),
            model: self.model.parse::<ModelSize>()?,
            device: self.device.parse::<ComputeDevice>()?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// External transcriber program used by the command engine.
///
/// ## Placeholders:
/// `{input}`, `{model}`, `{language}`, `{device}` are expanded per item.
/// `language_args` are appended only when the language is not "auto";
/// `cpu_args` only when the job runs on the CPU.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: String,
    pub args: Vec<String>,
    pub language_args: Vec<String>,
    pub cpu_args: Vec<String>,

    /// Extension of the transcript written next to each media file
    pub output_extension: String,

    /// Capacity of the batch event channel (events per observer before lagging)
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "whisper-cli".to_string(),
            args: vec![
                "-m".to_string(),
                "models/ggml-{model}.bin".to_string(),
                "-f".to_string(),
                "{input}".to_string(),
                "--no-timestamps".to_string(),
            ],
            language_args: vec!["-l".to_string(), "{language}".to_string()],
            cpu_args: vec!["--no-gpu".to_string()],
            output_extension: "txt".to_string(),
            event_buffer: 256,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            transcription: TranscriptionDefaults {
                language: "auto".to_string(),
                model: "base".to_string(),
                device: "cpu".to_string(),
            },
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_PORT=3000`: Override server port
    /// - `APP_TRANSCRIPTION_MODEL=small`: Override default model
    /// - `APP_ENGINE_PROGRAM=/opt/whisper/main`: Override transcriber program
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Same as [`AppConfig::load`] with an explicit config file (extension optional).
    pub fn load_from(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref().to_string_lossy().to_string();
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(&file).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("_")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.engine.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Engine program cannot be empty"));
        }

        if self.engine.event_buffer == 0 {
            return Err(anyhow::anyhow!("Event buffer must be greater than 0"));
        }

        if self.engine.output_extension.trim().is_empty() {
            return Err(anyhow::anyhow!("Output extension cannot be empty"));
        }

        self.transcription.to_transcription_config()?;

        Ok(())
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// Only the fields present in the JSON are changed, e.g.
    /// `{"transcription": {"model": "small"}}`. The result is validated.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Invalid port: {}", port))?;
            }
        }

        if let Some(transcription) = partial_config.get("transcription") {
            if let Some(language) = transcription.get("language").and_then(|v| v.as_str()) {
                self.transcription.language = language.to_string();
            }
            if let Some(model) = transcription.get("model").and_then(|v| v.as_str()) {
                self.transcription.model = model.to_string();
            }
            if let Some(device) = transcription.get("device").and_then(|v| v.as_str()) {
                self.transcription.device = device.to_string();
            }
        }

        if let Some(engine) = partial_config.get("engine") {
            if let Some(program) = engine.get("program").and_then(|v| v.as_str()) {
                self.engine.program = program.to_string();
            }
            if let Some(args) = engine.get("args") {
                self.engine.args = serde_json::from_value(args.clone())?;
            }
            if let Some(extension) = engine.get("output_extension").and_then(|v| v.as_str()) {
                self.engine.output_extension = extension.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }
}
