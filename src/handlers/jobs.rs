//! Job submission, polling, cancellation, and retention endpoints.

use crate::device;
use crate::error::AppError;
use crate::jobs::executor::submit_job;
use crate::jobs::JobSpec;
use crate::model::ModelTier;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(alias = "file")]
    pub filename: String,
    /// Tier name; parsed in the handler so an unknown tier surfaces as a
    /// structured validation error rather than a deserialization failure
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub use_gpu: bool,
    #[serde(default, alias = "force")]
    pub force_reload: bool,
}

/// Model tier used when the request does not name one: the configured
/// default, or a hardware-appropriate tier if that fails to parse.
pub(crate) fn default_tier(state: &AppState) -> ModelTier {
    state
        .get_config()
        .transcription
        .default_model
        .parse()
        .unwrap_or_else(|_| device::suggested_tier())
}

/// POST /api/v1/jobs
pub async fn submit(
    state: web::Data<AppState>,
    request: web::Json<SubmitJobRequest>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    if request.filename.trim().is_empty() {
        return Err(AppError::ValidationError("filename cannot be empty".to_string()));
    }

    let model = match request.model {
        Some(name) => name
            .parse::<ModelTier>()
            .map_err(|_| AppError::ValidationError(format!("unknown model tier: {}", name)))?,
        None => default_tier(&state),
    };
    info!(file = %request.filename, model = %model, "job submitted");

    let snapshot = submit_job(
        &state.runner,
        JobSpec {
            filename: request.filename,
            model,
            use_gpu: request.use_gpu,
            force_reload: request.force_reload,
            batch_id: None,
        },
    )
    .await?;

    Ok(HttpResponse::Accepted().json(snapshot))
}

/// GET /api/v1/jobs/{id}
pub async fn get(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let snapshot = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no job with id {}", id)))?;
    Ok(HttpResponse::Ok().json(snapshot))
}

/// GET /api/v1/jobs
pub async fn list(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let jobs = state.registry.snapshot_all().await;
    Ok(HttpResponse::Ok().json(json!({
        "total": jobs.len(),
        "jobs": jobs,
    })))
}

/// POST /api/v1/jobs/{id}/cancel
pub async fn cancel(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let snapshot = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no job with id {}", id)))?;

    if snapshot.record.status.is_terminal() {
        return Err(AppError::ValidationError(format!(
            "job {} already finished as {}",
            id, snapshot.record.status
        )));
    }

    state.registry.request_cancel(&id).await;
    info!(job = %id, "cancellation requested");
    Ok(HttpResponse::Ok().json(json!({
        "id": id,
        "cancel_requested": true,
        "message": "the job will stop at its next checkpoint",
    })))
}

/// POST /api/v1/jobs/purge
pub async fn purge(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let window = state.get_config().retention_window();
    let retained = state.registry.purge(chrono::Utc::now(), window).await;
    Ok(HttpResponse::Ok().json(json!({
        "retained": retained,
        "retention_hours": window.num_hours(),
    })))
}
