//! # Batch Submission
//!
//! Turns one multi-file request into a group of ordinary jobs plus a batch
//! record that tracks them. Batches add no scheduling of their own; the
//! subtasks compete for the same admission permits as standalone jobs and
//! the batch view is derived entirely from their records.

use crate::error::{AppError, AppResult};
use crate::jobs::executor::JobRunner;
use crate::jobs::registry::{BatchSnapshot, JobSpec};
use crate::model::tier::ModelTier;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// One file list submitted as a unit.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BatchRequest {
    pub files: Vec<String>,
    #[serde(default)]
    pub model: Option<ModelTier>,
    #[serde(default)]
    pub use_gpu: bool,
}

/// Validate a batch request, create the batch and its jobs atomically, and
/// start an executor for each subtask.
///
/// Files that do not exist in the upload directory are skipped with a
/// warning rather than poisoning the whole batch; an empty request or a
/// request where nothing exists is rejected outright.
pub async fn submit_batch(
    runner: &Arc<JobRunner>,
    upload_dir: &Path,
    request: BatchRequest,
    default_model: ModelTier,
) -> AppResult<BatchSnapshot> {
    if request.files.is_empty() {
        return Err(AppError::ValidationError(
            "batch request contains no files".to_string(),
        ));
    }

    let model = request.model.unwrap_or(default_model);
    let mut specs = Vec::with_capacity(request.files.len());
    for raw in &request.files {
        // A reference that could escape the upload directory fails the
        // whole batch; a merely missing file is skipped.
        let filename = crate::jobs::validate_plain_file_name(raw)?;
        if !upload_dir.join(filename).is_file() {
            warn!(file = %filename, "skipping missing batch file");
            continue;
        }
        specs.push(JobSpec {
            filename: filename.to_string(),
            model,
            use_gpu: request.use_gpu,
            force_reload: false,
            batch_id: None, // filled in by create_batch
        });
    }

    if specs.is_empty() {
        return Err(AppError::NotFound(
            "none of the requested files exist in the upload directory".to_string(),
        ));
    }

    let (batch_id, subtask_ids) = runner.registry().create_batch(specs).await;
    info!(
        batch = %batch_id,
        subtasks = subtask_ids.len(),
        model = %model,
        "batch submitted"
    );
    for id in subtask_ids {
        runner.spawn(id);
    }

    runner
        .registry()
        .get_batch(&batch_id)
        .await
        .ok_or_else(|| AppError::Internal(format!("batch {} vanished after creation", batch_id)))
}
