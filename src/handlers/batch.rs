//! Batch control endpoints: start, cancel, cancel one item, confirm, status.

use crate::batch::Decision;
use crate::discovery::find_media_files;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::model::{ComputeDevice, ModelSize, TranscriptionConfig};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-request overrides of the configured transcription defaults.
#[derive(Debug, Default, Deserialize)]
pub struct TranscriptionOverrides {
    pub language: Option<String>,
    pub model: Option<String>,
    pub device: Option<String>,
}

impl TranscriptionOverrides {
    fn apply(self, mut config: TranscriptionConfig) -> AppResult<TranscriptionConfig> {
        if let Some(language) = self.language {
            config.language = language;
        }
        if let Some(model) = self.model {
            config.model = model
                .parse::<ModelSize>()
                .map_err(|e| AppError::ValidationError(e.to_string()))?;
        }
        if let Some(device) = self.device {
            config.device = device
                .parse::<ComputeDevice>()
                .map_err(|e| AppError::ValidationError(e.to_string()))?;
        }
        Ok(config)
    }
}

/// Body of `POST /api/v1/batch`. Files from `dir` are queued after `paths`.
#[derive(Debug, Deserialize)]
pub struct StartBatchRequest {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub transcription: TranscriptionOverrides,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub decision: Decision,
    pub path: PathBuf,
    pub text: String,
}

pub async fn start_batch(
    state: web::Data<AppState>,
    body: web::Json<StartBatchRequest>,
) -> AppResult<HttpResponse> {
    let StartBatchRequest { mut paths, dir, transcription } = body.into_inner();

    if paths.is_empty() && dir.is_none() {
        return Err(AppError::BadRequest("Provide \"paths\" or \"dir\"".to_string()));
    }

    if let Some(dir) = dir {
        if !dir.is_dir() {
            return Err(AppError::NotFound(format!("Directory not found: {}", dir.display())));
        }
        let dir_for_scan = dir.clone();
        let found = web::block(move || find_media_files(&dir_for_scan))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        info!(dir = %dir.display(), files = found.len(), "Queued media files from directory");
        paths.extend(found);
    }

    let defaults = state.get_config().transcription.to_transcription_config()?;
    let config = transcription.apply(defaults)?;
    let total = paths.len();
    let run_id = state.orchestrator.process_batch(paths, config.clone())?;

    Ok(HttpResponse::Accepted().json(json!({
        "status": "accepted",
        "run_id": run_id,
        "total": total,
        "transcription": config,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn cancel_batch(state: web::Data<AppState>) -> HttpResponse {
    let cancelled = state.orchestrator.cancel();
    HttpResponse::Ok().json(json!({ "cancelled": cancelled }))
}

pub async fn cancel_item(
    state: web::Data<AppState>,
    index: web::Path<usize>,
) -> AppResult<HttpResponse> {
    let index = index.into_inner();
    state.orchestrator.cancel_item(index)?;
    Ok(HttpResponse::Ok().json(json!({ "cancelled": true, "index": index })))
}

pub async fn confirm(
    state: web::Data<AppState>,
    body: web::Json<ConfirmRequest>,
) -> AppResult<HttpResponse> {
    let ConfirmRequest { decision, path, text } = body.into_inner();
    if path.as_os_str().is_empty() || path == Path::new("/") {
        return Err(AppError::ValidationError("A media path is required".to_string()));
    }

    let index = state.orchestrator.confirm_and_continue(decision, path, text)?;
    Ok(HttpResponse::Ok().json(json!({ "index": index, "decision": decision })))
}

pub async fn batch_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.orchestrator.status())
}
