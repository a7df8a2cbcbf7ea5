//! # Media Batch Backend - Main Application Entry Point
//!
//! Starts the HTTP/websocket server that drives batch transcription.
//!
//! ## Startup:
//! 1. **Loads configuration** from `config.toml` and `APP_*` environment variables
//! 2. **Sets up logging** through `tracing` (`RUST_LOG` controls the filter)
//! 3. **Builds the engine and orchestrator** inside the shared application state
//! 4. **Serves** the API until SIGINT/SIGTERM, cancelling any active batch on the way out

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use media_batch_backend::config::AppConfig;
use media_batch_backend::configure_routes;
use media_batch_backend::state::AppState;
use media_batch_backend::transcription::CommandEngine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        program = %config.engine.program,
        model = %config.transcription.model,
        device = %config.transcription.device,
        "Transcription engine configured"
    );

    let engine = Arc::new(CommandEngine::new(config.engine.clone()));
    let app_state = AppState::new(config.clone(), engine);
    let metrics_task = app_state.watch_events();
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(configure_routes)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown.cancelled() => {
            info!("Shutdown signal received, stopping server...");
            if app_state.orchestrator.cancel() {
                info!("Active batch cancelled");
            }
            server_handle.stop(true).await;
        }
    }

    metrics_task.abort();
    info!("Server stopped gracefully");
    Ok(())
}

/// Default filter: `media_batch_backend=debug,actix_web=info`; `RUST_LOG` overrides it.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_batch_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Cancel `shutdown` on Ctrl+C, or SIGTERM on unix.
fn setup_signal_handlers(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    }
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Received SIGINT");
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
            }
        }

        shutdown.cancel();
    });
}
