//! Audio upload and artifact download endpoints.

use crate::error::AppError;
use crate::handlers::jobs::default_tier;
use crate::jobs::executor::submit_job;
use crate::jobs::JobSpec;
use crate::model::ModelTier;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use serde_json::json;
use std::path::Path;
use tracing::info;

/// Keep only the final path component and reject anything that could
/// escape the storage directory.
fn safe_file_name(raw: &str) -> Result<String, AppError> {
    let name = Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::ValidationError(format!("invalid file name: {}", raw)))?;
    if name.is_empty() || name == "." || name == ".." || name.contains("..") {
        return Err(AppError::ValidationError(format!(
            "invalid file name: {}",
            raw
        )));
    }
    Ok(name.to_string())
}

/// POST /api/v1/upload
///
/// Accepts one or more audio files in a multipart form, stores them in the
/// upload directory under their (sanitized) client names, and submits a
/// transcription job per file. Text fields `model`, `use_gpu`, and
/// `force_model` tune the submission; they apply to every file in the form.
pub async fn upload(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let upload_dir = state.get_config().paths.upload_dir;
    let mut stored: Vec<(String, usize)> = Vec::new();
    let mut model: Option<ModelTier> = None;
    let mut use_gpu = false;
    let mut force_reload = false;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::ValidationError(format!("malformed multipart payload: {}", e)))?
    {
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(|f| f.to_string());
        let field_name = field.name().map(|n| n.to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| AppError::ValidationError(format!("upload stream error: {}", e)))?
        {
            data.extend_from_slice(&chunk);
        }

        let Some(filename) = filename else {
            // Text form fields tune the job submission
            let value = String::from_utf8_lossy(&data).trim().to_string();
            match field_name.as_deref() {
                Some("model") => {
                    model = Some(value.parse().map_err(|_| {
                        AppError::ValidationError(format!("unknown model tier: {}", value))
                    })?);
                }
                Some("use_gpu") => use_gpu = value == "true" || value == "1",
                Some("force_model") => force_reload = value == "true" || value == "1",
                _ => {}
            }
            continue;
        };

        let filename = safe_file_name(&filename)?;
        if data.is_empty() {
            return Err(AppError::ValidationError(format!(
                "uploaded file {} is empty",
                filename
            )));
        }

        let dest = upload_dir.join(&filename);
        tokio::fs::write(&dest, &data)
            .await
            .map_err(|e| AppError::IoFailure(format!("failed to store {}: {}", filename, e)))?;
        info!(file = %filename, bytes = data.len(), "file uploaded");
        stored.push((filename, data.len()));
    }

    if stored.is_empty() {
        return Err(AppError::ValidationError(
            "no files found in the upload".to_string(),
        ));
    }

    let model = model.unwrap_or_else(|| default_tier(&state));
    let mut jobs = Vec::with_capacity(stored.len());
    for (filename, size_bytes) in stored {
        let snapshot = submit_job(
            &state.runner,
            JobSpec {
                filename: filename.clone(),
                model,
                use_gpu,
                force_reload,
                batch_id: None,
            },
        )
        .await?;
        jobs.push(json!({
            "filename": filename,
            "size_bytes": size_bytes,
            "job_id": snapshot.record.id,
            "status": snapshot.record.status,
        }));
    }

    Ok(HttpResponse::Accepted().json(json!({ "uploaded": jobs })))
}

/// GET /api/v1/download/{filename}
pub async fn download(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let filename = safe_file_name(&path.into_inner())?;
    let full_path = state.get_config().paths.output_dir.join(&filename);

    let content = tokio::fs::read(&full_path)
        .await
        .map_err(|_| AppError::NotFound(format!("no artifact named {}", filename)))?;

    let content_type = match full_path.extension().and_then(|e| e.to_str()) {
        Some("txt") => "text/plain; charset=utf-8",
        Some("srt") => "application/x-subrip",
        _ => "application/octet-stream",
    };

    Ok(HttpResponse::Ok()
        .content_type(content_type)
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", filename),
        ))
        .body(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_file_name_strips_directories() {
        assert_eq!(safe_file_name("audio.wav").unwrap(), "audio.wav");
        assert_eq!(safe_file_name("/etc/passwd").unwrap(), "passwd");
        assert!(safe_file_name("..").is_err());
        assert!(safe_file_name("").is_err());
    }
}
