//! Model listing and switching endpoints.

use crate::device;
use crate::error::AppError;
use crate::model::ModelTier;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// GET /api/v1/models
pub async fn list(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let current = state.cache.current().await;

    let models: Vec<serde_json::Value> = ModelTier::ALL
        .iter()
        .map(|tier| {
            json!({
                "name": tier.to_string(),
                "repo": tier.repo_name(),
                "size_mb": tier.size_mb(),
                "description": tier.description(),
                "loaded": current == Some(*tier),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "models": models,
        "current_model": current.map(|t| t.to_string()),
        "suggested_model": device::suggested_tier().to_string(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct SwitchModelRequest {
    pub model: String,
    #[serde(default)]
    pub use_gpu: bool,
    #[serde(default)]
    pub force: bool,
    /// Report whether the requested model is already loaded without
    /// loading anything
    #[serde(default)]
    pub verify_only: bool,
}

/// POST /api/v1/models/switch
pub async fn switch(
    state: web::Data<AppState>,
    request: web::Json<SwitchModelRequest>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    let tier: ModelTier = request
        .model
        .parse()
        .map_err(|_| AppError::ValidationError(format!("unknown model tier: {}", request.model)))?;
    let current = state.cache.current().await;

    if request.verify_only {
        return Ok(HttpResponse::Ok().json(json!({
            "verified": current == Some(tier),
            "requested_model": tier.to_string(),
            "current_model": current.map(|t| t.to_string()),
        })));
    }

    info!(model = %tier, force = request.force, "model switch requested");
    let device = device::resolve(request.use_gpu);
    let outcome = state.cache.switch(tier, &device, request.force).await?;
    Ok(HttpResponse::Ok().json(outcome))
}
