//! Media discovery and model information endpoints.

use crate::device::DeviceManager;
use crate::discovery::{find_media_files, is_media_file, is_video_host_url};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::estimate::{estimate_duration, format_duration};
use crate::transcription::model::{ComputeDevice, ModelSize};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct EstimateQuery {
    pub path: PathBuf,
    pub model: Option<String>,
    pub device: Option<String>,
}

/// `GET /api/v1/media/scan?dir=...`
pub async fn scan_directory(query: web::Query<ScanQuery>) -> AppResult<HttpResponse> {
    let dir = query.into_inner().dir;
    let scan_dir = dir.clone();
    let files = web::block(move || find_media_files(&scan_dir))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "dir": dir,
        "count": files.len(),
        "files": files
    })))
}

/// `GET /api/v1/media/classify?url=...`
pub async fn classify_url(query: web::Query<ClassifyQuery>) -> HttpResponse {
    let url = query.into_inner().url;
    let video_host = is_video_host_url(&url);
    HttpResponse::Ok().json(json!({
        "url": url,
        "video_host": video_host,
        "media_file": !video_host && is_media_file(std::path::Path::new(&url))
    }))
}

/// `GET /api/v1/media/estimate?path=...&model=...&device=...`
///
/// Uses the configured defaults for anything not given.
pub async fn estimate(
    state: web::Data<AppState>,
    query: web::Query<EstimateQuery>,
) -> AppResult<HttpResponse> {
    let EstimateQuery { path, model, device } = query.into_inner();
    let defaults = state.get_config().transcription.to_transcription_config()?;

    let model = match model {
        Some(model) => model.parse::<ModelSize>().map_err(|e| AppError::ValidationError(e.to_string()))?,
        None => defaults.model,
    };
    let requested = match device {
        Some(device) => device
            .parse::<ComputeDevice>()
            .map_err(|e| AppError::ValidationError(e.to_string()))?,
        None => defaults.device,
    };

    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|_| AppError::NotFound(format!("File not found: {}", path.display())))?;
    let device = DeviceManager::resolve(requested);
    let estimate = estimate_duration(metadata.len(), model, device);

    Ok(HttpResponse::Ok().json(json!({
        "path": path,
        "size_bytes": metadata.len(),
        "model": model,
        "device": device,
        "estimated_seconds": estimate.as_secs(),
        "estimated": format_duration(estimate)
    })))
}

/// `GET /api/v1/models`
pub async fn list_models(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let models: Vec<_> = ModelSize::ALL
        .iter()
        .map(|model| {
            json!({
                "name": model,
                "size_mb": model.size_mb(),
                "description": model.description(),
                "default": model.to_string() == config.transcription.model
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "models": models,
        "accelerator_available": DeviceManager::is_accelerator_available()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_scan_lists_media_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();

        let app = test::init_service(
            App::new().route("/scan", web::get().to(scan_directory)),
        )
        .await;

        let uri = format!("/scan?dir={}", dir.path().display());
        let req = test::TestRequest::get().uri(&uri).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);
    }

    #[actix_web::test]
    async fn test_classify_url() {
        let app = test::init_service(
            App::new().route("/classify", web::get().to(classify_url)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/classify?url=https%3A%2F%2Fyoutu.be%2Fabc")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["video_host"], true);
    }
}
