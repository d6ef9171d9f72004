//! Batch submission and polling endpoints.

use crate::error::AppError;
use crate::handlers::jobs::default_tier;
use crate::jobs::batch::{submit_batch, BatchRequest};
use crate::state::AppState;
use actix_web::{web, HttpResponse};

/// POST /api/v1/batches
pub async fn submit(
    state: web::Data<AppState>,
    request: web::Json<BatchRequest>,
) -> Result<HttpResponse, AppError> {
    let upload_dir = state.get_config().paths.upload_dir;
    let snapshot = submit_batch(
        &state.runner,
        &upload_dir,
        request.into_inner(),
        default_tier(&state),
    )
    .await?;
    Ok(HttpResponse::Accepted().json(snapshot))
}

/// GET /api/v1/batches/{id}
pub async fn get(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let snapshot = state
        .registry
        .get_batch(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no batch with id {}", id)))?;
    Ok(HttpResponse::Ok().json(snapshot))
}
