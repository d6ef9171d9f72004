//! # Health and Monitoring Endpoints
//!
//! Liveness, metrics, and system information. These sit outside the
//! handlers module because they report on the process itself rather than
//! on jobs or models.

use crate::device;
use crate::state::AppState;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;

/// GET /health
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let (total_jobs, active_jobs) = state.registry.counts().await;
    let current_model = state.cache.current().await;

    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": {
            "total": total_jobs,
            "active": active_jobs,
            "available_slots": state.runner.available_slots(),
        },
        "current_model": current_model.map(|t| t.to_string()),
    })))
}

/// GET /metrics
pub async fn detailed_metrics(state: web::Data<AppState>) -> Result<HttpResponse> {
    let metrics = state.get_metrics_snapshot();
    let uptime = state.get_uptime_seconds();

    let endpoints: serde_json::Map<String, serde_json::Value> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, m)| {
            (
                endpoint.clone(),
                json!({
                    "request_count": m.request_count,
                    "average_duration_ms": m.average_duration_ms(),
                    "error_rate": m.error_rate(),
                }),
            )
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "uptime_seconds": uptime,
        "request_count": metrics.request_count,
        "error_count": metrics.error_count,
        "requests_per_second": if uptime > 0 {
            metrics.request_count as f64 / uptime as f64
        } else {
            0.0
        },
        "endpoints": endpoints,
    })))
}

/// GET /system
pub async fn system_info(state: web::Data<AppState>) -> Result<HttpResponse> {
    let summary = device::summary();
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "cuda_available": summary.cuda_available,
        "device": summary.device,
        "suggested_model": summary.suggested_model.to_string(),
        "default_model": config.transcription.default_model,
        "language": config.transcription.language,
        "max_concurrent_jobs": config.jobs.max_concurrent,
        "retention_hours": config.jobs.retention_hours,
    })))
}
