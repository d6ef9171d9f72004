//! # Job Executor
//!
//! Runs one transcription job end to end: validate the input, acquire a
//! model handle, transcribe on a blocking thread, write artifacts, and
//! record the terminal state. A shared semaphore bounds how many jobs
//! transcribe at once; jobs past the limit simply stay Queued until a
//! permit frees up, they are never rejected.
//!
//! Cancellation is cooperative. The executor checks the job's cancel flag
//! at each milestone boundary and stops between stages; it never interrupts
//! a transcription already running on a blocking thread.

use crate::device;
use crate::engine::TranscribeOptions;
use crate::error::{AppError, AppResult};
use crate::jobs::artifacts;
use crate::jobs::registry::{sanitize_base_name, JobRegistry, JobSnapshot, JobSpec, JobStatus};
use crate::model::ModelCache;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Spawns and drives job executions against the shared registry and cache.
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    cache: Arc<ModelCache>,
    admission: Arc<Semaphore>,
    upload_dir: PathBuf,
    output_dir: PathBuf,
    language: String,
}

/// Outcome of one execution, consumed by [`JobRunner::run`] to pick the
/// terminal transition.
enum ExecOutcome {
    Completed(HashMap<String, String>),
    Cancelled,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        cache: Arc<ModelCache>,
        max_concurrent: usize,
        upload_dir: PathBuf,
        output_dir: PathBuf,
        language: String,
    ) -> Self {
        Self {
            registry,
            cache,
            admission: Arc::new(Semaphore::new(max_concurrent.max(1))),
            upload_dir,
            output_dir,
            language,
        }
    }

    /// Detach an executor task for a previously created job.
    pub fn spawn(self: &Arc<Self>, job_id: String) {
        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(&job_id).await;
        });
    }

    /// Drive one job to a terminal state. All failures funnel through
    /// `registry.fail` here; nothing below this boundary panics the task.
    pub async fn run(&self, job_id: &str) {
        // Held for the whole execution; jobs past the limit wait here
        // while still reporting Queued.
        let _permit = match self.admission.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        match self.execute(job_id).await {
            Ok(ExecOutcome::Completed(outputs)) => {
                self.registry.complete(job_id, outputs).await;
                info!(job = %job_id, "job completed");
            }
            Ok(ExecOutcome::Cancelled) => {
                self.registry.mark_cancelled(job_id).await;
                info!(job = %job_id, "job cancelled");
            }
            Err(e) => {
                error!(job = %job_id, error = %e, "job failed");
                self.registry.fail(job_id, e.to_string()).await;
            }
        }
    }

    async fn execute(&self, job_id: &str) -> AppResult<ExecOutcome> {
        let Some(snapshot) = self.registry.get(job_id).await else {
            return Err(AppError::NotFound(format!("job {} disappeared", job_id)));
        };
        let job = &snapshot.record;

        // Input validation happens before the job leaves Queued, so a
        // missing file fails at progress 0 with no outputs.
        let audio_path = self.upload_dir.join(&job.filename);
        if !audio_path.is_file() {
            return Err(AppError::ValidationError(format!(
                "audio file not found: {}",
                job.filename
            )));
        }

        if self.cancelled(job_id).await {
            return Ok(ExecOutcome::Cancelled);
        }
        self.registry
            .set_status(job_id, JobStatus::Processing, "preparing input")
            .await;
        self.registry.update_progress(job_id, 10, "preparing input").await;

        if self.cancelled(job_id).await {
            return Ok(ExecOutcome::Cancelled);
        }
        self.registry
            .update_progress(job_id, 20, format!("loading the {} model", job.model))
            .await;

        let device = device::resolve(job.use_gpu);
        let handle = self
            .cache
            .acquire(job.model, &device, job.force_reload)
            .await?;
        // The cache verified the load; this guards against a stale handle
        // if the contract is ever loosened.
        if handle.tier() != job.model {
            return Err(AppError::LoadMismatch(format!(
                "job {} wanted {} but got {}",
                job_id,
                job.model,
                handle.tier()
            )));
        }

        if self.cancelled(job_id).await {
            return Ok(ExecOutcome::Cancelled);
        }
        self.registry
            .update_progress(job_id, 40, "transcribing audio")
            .await;

        let options = TranscribeOptions {
            language: self.language.clone(),
            translate: false,
        };
        let transcribe_path = audio_path.clone();
        let segments = tokio::task::spawn_blocking(move || {
            handle.transcribe(&transcribe_path, &options)
        })
        .await
        .map_err(|e| AppError::Internal(format!("transcription task panicked: {}", e)))?
        .map_err(|e| AppError::TranscriptionFailure(e.to_string()))?;

        if self.cancelled(job_id).await {
            return Ok(ExecOutcome::Cancelled);
        }
        self.registry
            .update_progress(job_id, 80, "saving transcripts")
            .await;

        let base = sanitize_base_name(&job.filename);
        let outputs = artifacts::write_artifacts(&self.output_dir, &base, job.model, &segments)?;

        Ok(ExecOutcome::Completed(outputs))
    }

    async fn cancelled(&self, job_id: &str) -> bool {
        self.registry.cancel_requested(job_id).await
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// How many jobs could start transcribing right now.
    pub fn available_slots(&self) -> usize {
        self.admission.available_permits()
    }
}

/// Convenience for handlers that create and immediately start a job. The
/// file reference is validated here so no record is ever created for a
/// path that could escape the upload directory.
pub async fn submit_job(runner: &Arc<JobRunner>, spec: JobSpec) -> AppResult<JobSnapshot> {
    let filename = crate::jobs::validate_plain_file_name(&spec.filename)?.to_string();
    let spec = JobSpec { filename, ..spec };
    let id = runner.registry.create(spec).await;
    runner.spawn(id.clone());
    runner
        .registry
        .get(&id)
        .await
        .ok_or_else(|| AppError::Internal(format!("job {} vanished after creation", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LoadedSpeechModel, Segment, SpeechEngine};
    use crate::jobs::registry::JobSpec;
    use crate::model::tier::ModelTier;
    use candle_core::Device;
    use std::path::Path;

    struct FixedEngine;

    struct FixedModel {
        tier: ModelTier,
    }

    impl LoadedSpeechModel for FixedModel {
        fn tier(&self) -> ModelTier {
            self.tier
        }

        fn transcribe(
            &self,
            _audio: &Path,
            _opts: &TranscribeOptions,
        ) -> anyhow::Result<Vec<Segment>> {
            Ok(vec![
                Segment::new(0.0, 1.0, "hello"),
                Segment::new(1.0, 2.5, "world"),
            ])
        }
    }

    impl SpeechEngine for FixedEngine {
        fn load(
            &self,
            tier: ModelTier,
            _device: &Device,
        ) -> anyhow::Result<Box<dyn LoadedSpeechModel>> {
            Ok(Box::new(FixedModel { tier }))
        }
    }

    fn test_dirs(tag: &str) -> (PathBuf, PathBuf) {
        let root = std::env::temp_dir().join(format!("executor_test_{}_{}", tag, std::process::id()));
        let uploads = root.join("uploads");
        let outputs = root.join("outputs");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::create_dir_all(&outputs).unwrap();
        (uploads, outputs)
    }

    fn runner_with_dirs(uploads: PathBuf, outputs: PathBuf) -> Arc<JobRunner> {
        let registry = Arc::new(JobRegistry::new());
        let cache = Arc::new(ModelCache::new(Arc::new(FixedEngine)));
        Arc::new(JobRunner::new(
            registry,
            cache,
            2,
            uploads,
            outputs,
            "en".to_string(),
        ))
    }

    fn spec(filename: &str) -> JobSpec {
        JobSpec {
            filename: filename.to_string(),
            model: ModelTier::Tiny,
            use_gpu: false,
            force_reload: false,
            batch_id: None,
        }
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let (uploads, outputs) = test_dirs("ok");
        std::fs::write(uploads.join("talk.wav"), b"fake audio").unwrap();
        let runner = runner_with_dirs(uploads.clone(), outputs.clone());

        let id = runner.registry().create(spec("talk.wav")).await;
        runner.run(&id).await;

        let snap = runner.registry().get(&id).await.unwrap();
        assert_eq!(snap.record.status, JobStatus::Completed);
        assert_eq!(snap.record.progress, 100);
        assert_eq!(snap.record.output_files.len(), 2);
        assert!(outputs.join("talk.txt").exists());
        assert!(outputs.join("talk.srt").exists());

        std::fs::remove_dir_all(uploads.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_missing_input_fails_at_progress_zero() {
        let (uploads, outputs) = test_dirs("missing");
        let runner = runner_with_dirs(uploads.clone(), outputs);

        let id = runner.registry().create(spec("nope.wav")).await;
        runner.run(&id).await;

        let snap = runner.registry().get(&id).await.unwrap();
        assert_eq!(snap.record.status, JobStatus::Error);
        assert_eq!(snap.record.progress, 0);
        assert!(snap.record.output_files.is_empty());
        assert!(snap.record.message.contains("not found"));

        std::fs::remove_dir_all(uploads.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_before_start_ends_cancelled() {
        let (uploads, outputs) = test_dirs("cancel");
        std::fs::write(uploads.join("talk.wav"), b"fake audio").unwrap();
        let runner = runner_with_dirs(uploads.clone(), outputs);

        let id = runner.registry().create(spec("talk.wav")).await;
        runner.registry().request_cancel(&id).await;
        runner.run(&id).await;

        let snap = runner.registry().get(&id).await.unwrap();
        assert_eq!(snap.record.status, JobStatus::Cancelled);
        assert!(snap.record.output_files.is_empty());

        std::fs::remove_dir_all(uploads.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_submit_rejects_escaping_file_references() {
        let (uploads, outputs) = test_dirs("traversal");
        let runner = runner_with_dirs(uploads.clone(), outputs);

        for bad in ["../x.wav", "/etc/passwd", "a/../../b.wav"] {
            let result = submit_job(&runner, spec(bad)).await;
            assert!(
                matches!(result, Err(AppError::ValidationError(_))),
                "{} should be rejected",
                bad
            );
        }
        // Nothing escaped into the registry
        assert!(runner.registry().snapshot_all().await.is_empty());

        std::fs::remove_dir_all(uploads.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_submit_returns_initial_snapshot() {
        let (uploads, outputs) = test_dirs("submit");
        std::fs::write(uploads.join("talk.wav"), b"fake audio").unwrap();
        let runner = runner_with_dirs(uploads.clone(), outputs);

        let snap = submit_job(&runner, spec("talk.wav")).await.unwrap();
        assert!(snap.record.id.contains("talk"));

        // Poll until the detached task finishes
        for _ in 0..100 {
            let current = runner.registry().get(&snap.record.id).await.unwrap();
            if current.record.status.is_terminal() {
                assert_eq!(current.record.status, JobStatus::Completed);
                std::fs::remove_dir_all(uploads.parent().unwrap()).unwrap();
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job did not reach a terminal state in time");
    }
}
