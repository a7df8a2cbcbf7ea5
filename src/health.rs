use crate::device::DeviceManager;
use crate::state::AppState;
use crate::transcription::model::ComputeDevice;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let batch = state.orchestrator.status();
    let accelerator = DeviceManager::is_accelerator_available();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "batch": {
            "phase": batch.phase,
            "current_index": batch.current_index,
            "total": batch.total
        },
        "engine": {
            "program": config.engine.program,
            "default_model": config.transcription.model,
            "accelerator_available": accelerator,
            "accelerated_runs_on": DeviceManager::describe(DeviceManager::resolve(ComputeDevice::Accelerated))
        },
        "observers": metrics.active_observers,
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let attempted = metrics.items_transcribed + metrics.errors;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "batches": {
            "started": metrics.batches_started,
            "completed": metrics.batches_completed,
            "cancelled": metrics.batches_cancelled,
            "failed": metrics.batches_failed
        },
        "items": {
            "transcribed": metrics.items_transcribed,
            "saved": metrics.transcripts_saved,
            "errors": metrics.errors,
            "error_rate": if attempted > 0 {
                metrics.errors as f64 / attempted as f64
            } else {
                0.0
            }
        },
        "observers": metrics.active_observers,
        "last_run": state.orchestrator.status().last_run,
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let field = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available for process {}", process::id())
    })
}
