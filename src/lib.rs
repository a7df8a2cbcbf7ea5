//! # Media Batch Backend
//!
//! Queued media transcription with human confirmation between items.
//!
//! ## Application Architecture:
//! - **batch**: the orchestrator, its confirmation gate and event stream
//! - **transcription**: the engine contract and the external-program engine
//! - **discovery**: which files and URLs count as media
//! - **device**: accelerator detection
//! - **config**: TOML + environment configuration
//! - **state**: shared state and metrics for handlers
//! - **handlers** / **health** / **websocket**: the HTTP and websocket surface
//! - **error**: error types and their HTTP responses

pub mod batch;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod health;
pub mod state;
pub mod transcription;
pub mod websocket;

use actix_web::web;

/// Register every route on an actix `App`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(handlers::get_config))
            .route("/config", web::put().to(handlers::update_config))
            .route("/models", web::get().to(handlers::list_models))
            .route("/media/scan", web::get().to(handlers::scan_directory))
            .route("/media/classify", web::get().to(handlers::classify_url))
            .route("/media/estimate", web::get().to(handlers::estimate))
            .route("/batch", web::post().to(handlers::start_batch))
            .route("/batch/status", web::get().to(handlers::batch_status))
            .route("/batch/cancel", web::post().to(handlers::cancel_batch))
            .route("/batch/confirm", web::post().to(handlers::confirm))
            .route("/batch/items/{index}/cancel", web::post().to(handlers::cancel_item)),
    )
    .route("/ws/events", web::get().to(websocket::events_websocket))
    .route("/health", web::get().to(health::health_check));
}
