//! # Job Registry
//!
//! Concurrent keyed store for job and batch records, and the lifecycle state
//! machine that governs them. Many callers poll records concurrently while
//! each record is mutated by exactly one executor task; a `tokio::sync::RwLock`
//! around each map gives cheap shared reads and serialized writes.
//!
//! ## Lifecycle contract:
//! Queued → Processing → {Completed, Error, Cancelled}. Transitions only move
//! forward; a terminal record never changes again except for deletion by the
//! retention sweep. Progress is monotone non-decreasing while non-terminal.
//! `output_files` is non-empty if and only if the job Completed, which is why
//! outputs, progress 100, and the Completed status are set inside a single
//! write-lock critical section.

use crate::model::tier::ModelTier;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Current status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Position along the forward-only lifecycle. Terminal states share a
    /// rank: once reached, no further transition is allowed at all.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled => 2,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Everything needed to create a job record.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub filename: String,
    pub model: ModelTier,
    pub use_gpu: bool,
    pub force_reload: bool,
    pub batch_id: Option<String>,
}

/// One asynchronous transcription unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub filename: String,
    pub status: JobStatus,
    /// 0–100, monotone non-decreasing while non-terminal
    pub progress: u8,
    pub message: String,
    pub model: ModelTier,
    pub use_gpu: bool,
    pub start_time: DateTime<Utc>,
    /// Artifact kind ("txt", "srt") → file name; non-empty iff Completed
    pub output_files: HashMap<String, String>,
    /// Back-reference to the batch this job belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip)]
    pub force_reload: bool,
    #[serde(skip)]
    cancel_requested: bool,
}

/// Read-time view of a job, with elapsed run time computed for jobs that
/// are still moving.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub record: JobRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_time: Option<i64>,
}

/// A named group of jobs submitted together. The subtask list never changes
/// after creation; status and progress are derived from the subtasks on read.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub id: String,
    pub subtask_ids: Vec<String>,
    pub start_time: DateTime<Utc>,
}

/// Read-time view of a batch with its derived aggregate fields.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub subtask_ids: Vec<String>,
    pub start_time: DateTime<Utc>,
}

/// Concurrent store of job and batch records.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobRecord>>,
    batches: RwLock<HashMap<String, BatchRecord>>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            batches: RwLock::new(HashMap::new()),
        }
    }

    /// Create a job record in the Queued state and return its id.
    ///
    /// Ids are built from the submission time and the sanitized base name of
    /// the input; a numeric suffix keeps them unique when two submissions of
    /// the same file land within the same second.
    pub async fn create(&self, spec: JobSpec) -> String {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let id = unique_job_id(&jobs, now, &spec.filename);
        jobs.insert(id.clone(), new_record(id.clone(), spec, now));
        debug!(job = %id, "job created");
        id
    }

    /// Consistent snapshot of one job, or None if unknown.
    pub async fn get(&self, id: &str) -> Option<JobSnapshot> {
        let jobs = self.jobs.read().await;
        jobs.get(id).map(|record| snapshot(record, Utc::now()))
    }

    /// Snapshot of every job, newest first.
    pub async fn snapshot_all(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let now = Utc::now();
        let mut all: Vec<JobSnapshot> = jobs.values().map(|r| snapshot(r, now)).collect();
        all.sort_by(|a, b| b.record.start_time.cmp(&a.record.start_time));
        all
    }

    /// Advance a job's status. Backward transitions and any change to a
    /// terminal record are rejected (logged and ignored). Returns whether
    /// the update was applied.
    pub async fn set_status(&self, id: &str, status: JobStatus, message: impl Into<String>) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(id) else {
            return false;
        };
        if record.status.is_terminal() || status.rank() < record.status.rank() {
            warn!(
                job = %id,
                from = %record.status,
                to = %status,
                "rejected status transition"
            );
            return false;
        }
        record.status = status;
        record.message = message.into();
        true
    }

    /// Update progress and message of a non-terminal job. Progress never
    /// moves backwards.
    pub async fn update_progress(&self, id: &str, progress: u8, message: impl Into<String>) {
        let mut jobs = self.jobs.write().await;
        if let Some(record) = jobs.get_mut(id) {
            if record.status.is_terminal() {
                return;
            }
            record.progress = record.progress.max(progress.min(100));
            record.message = message.into();
        }
    }

    /// Finish a job: outputs, progress 100, and the Completed status are
    /// installed atomically so no poller ever sees a half-completed record.
    pub async fn complete(&self, id: &str, output_files: HashMap<String, String>) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(id) else {
            return false;
        };
        if record.status.is_terminal() {
            warn!(job = %id, "ignored completion of a terminal job");
            return false;
        }
        record.status = JobStatus::Completed;
        record.progress = 100;
        record.message = format!("transcription finished using the {} model", record.model);
        record.output_files = output_files;
        true
    }

    /// Mark a job failed with a descriptive message. Progress stays where
    /// it was when the failure happened.
    pub async fn fail(&self, id: &str, message: impl Into<String>) -> bool {
        self.set_status(id, JobStatus::Error, message).await
    }

    /// Flag a job for cooperative cancellation. The owning executor picks
    /// the flag up at its next milestone boundary. No-op on terminal jobs.
    pub async fn request_cancel(&self, id: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(record) if !record.status.is_terminal() => {
                record.cancel_requested = true;
                true
            }
            _ => false,
        }
    }

    pub async fn cancel_requested(&self, id: &str) -> bool {
        let jobs = self.jobs.read().await;
        jobs.get(id).map(|r| r.cancel_requested).unwrap_or(false)
    }

    /// Transition a job to the terminal Cancelled state.
    pub async fn mark_cancelled(&self, id: &str) -> bool {
        self.set_status(id, JobStatus::Cancelled, "cancelled by request")
            .await
    }

    /// Create a batch and all of its member jobs in one critical section.
    /// Returns the batch id and the ordered subtask ids.
    pub async fn create_batch(&self, specs: Vec<JobSpec>) -> (String, Vec<String>) {
        let mut jobs = self.jobs.write().await;
        let mut batches = self.batches.write().await;
        let now = Utc::now();

        let batch_id = unique_batch_id(&batches, now);
        let mut subtask_ids = Vec::with_capacity(specs.len());
        for mut spec in specs {
            spec.batch_id = Some(batch_id.clone());
            let id = unique_job_id(&jobs, now, &spec.filename);
            jobs.insert(id.clone(), new_record(id.clone(), spec, now));
            subtask_ids.push(id);
        }

        batches.insert(
            batch_id.clone(),
            BatchRecord {
                id: batch_id.clone(),
                subtask_ids: subtask_ids.clone(),
                start_time: now,
            },
        );
        debug!(batch = %batch_id, subtasks = subtask_ids.len(), "batch created");
        (batch_id, subtask_ids)
    }

    /// Snapshot of a batch with status and progress derived from the
    /// current state of its subtasks.
    pub async fn get_batch(&self, id: &str) -> Option<BatchSnapshot> {
        let batches = self.batches.read().await;
        let record = batches.get(id)?.clone();
        drop(batches);

        let jobs = self.jobs.read().await;
        let subtasks: Vec<(JobStatus, u8)> = record
            .subtask_ids
            .iter()
            .map(|sid| {
                jobs.get(sid)
                    .map(|j| (j.status, j.progress))
                    // A purged subtask was terminal; count it as done
                    .unwrap_or((JobStatus::Completed, 100))
            })
            .collect();
        let (status, progress, message) = aggregate_subtasks(&subtasks);

        Some(BatchSnapshot {
            id: record.id,
            status,
            progress,
            message,
            subtask_ids: record.subtask_ids,
            start_time: record.start_time,
        })
    }

    /// Retention sweep: drop job and batch records older than `window`.
    ///
    /// Non-terminal jobs are exempt no matter how old they are, so a client
    /// polling a long-running job is never orphaned; batches survive as long
    /// as any of their subtasks is still live. Returns the number of records
    /// retained.
    pub async fn purge(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut jobs = self.jobs.write().await;
        let mut batches = self.batches.write().await;

        let before = jobs.len() + batches.len();
        jobs.retain(|_, record| {
            !record.status.is_terminal() || now - record.start_time <= window
        });
        batches.retain(|_, record| {
            let live_subtask = record
                .subtask_ids
                .iter()
                .any(|sid| jobs.get(sid).map(|j| !j.status.is_terminal()).unwrap_or(false));
            live_subtask || now - record.start_time <= window
        });

        let retained = jobs.len() + batches.len();
        debug!(
            removed = before - retained,
            retained, "retention sweep finished"
        );
        retained
    }

    /// Counts for the health endpoint.
    pub async fn counts(&self) -> (usize, usize) {
        let jobs = self.jobs.read().await;
        let active = jobs.values().filter(|j| !j.status.is_terminal()).count();
        (jobs.len(), active)
    }
}

fn new_record(id: String, spec: JobSpec, now: DateTime<Utc>) -> JobRecord {
    JobRecord {
        id,
        filename: spec.filename,
        status: JobStatus::Queued,
        progress: 0,
        message: "waiting for a worker".to_string(),
        model: spec.model,
        use_gpu: spec.use_gpu,
        start_time: now,
        output_files: HashMap::new(),
        batch_id: spec.batch_id,
        force_reload: spec.force_reload,
        cancel_requested: false,
    }
}

fn snapshot(record: &JobRecord, now: DateTime<Utc>) -> JobSnapshot {
    let run_time = if record.status.is_terminal() {
        None
    } else {
        Some((now - record.start_time).num_seconds().max(0))
    };
    JobSnapshot {
        record: record.clone(),
        run_time,
    }
}

/// Strip the extension and replace anything that is not alphanumeric,
/// a dash, or an underscore.
pub fn sanitize_base_name(filename: &str) -> String {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "audio".to_string()
    } else {
        cleaned
    }
}

fn unique_job_id(
    jobs: &HashMap<String, JobRecord>,
    now: DateTime<Utc>,
    filename: &str,
) -> String {
    let base = format!("task_{}_{}", now.timestamp(), sanitize_base_name(filename));
    if !jobs.contains_key(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !jobs.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn unique_batch_id(batches: &HashMap<String, BatchRecord>, now: DateTime<Utc>) -> String {
    let base = format!("batch_{}", now.timestamp());
    if !batches.contains_key(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !batches.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Derive batch status, progress, and message from subtask states.
///
/// Any Error subtask makes the batch Error; all subtasks terminal and
/// Completed makes it Completed; everything else is Processing. Progress is
/// the arithmetic mean, with Cancelled subtasks counting at their last
/// known progress.
fn aggregate_subtasks(subtasks: &[(JobStatus, u8)]) -> (JobStatus, u8, String) {
    if subtasks.is_empty() {
        return (JobStatus::Completed, 100, "empty batch".to_string());
    }

    let any_error = subtasks.iter().any(|(s, _)| *s == JobStatus::Error);
    let all_completed = subtasks.iter().all(|(s, _)| *s == JobStatus::Completed);
    let completed = subtasks
        .iter()
        .filter(|(s, _)| *s == JobStatus::Completed)
        .count();

    let status = if any_error {
        JobStatus::Error
    } else if all_completed {
        JobStatus::Completed
    } else {
        JobStatus::Processing
    };

    let total: u32 = subtasks.iter().map(|(_, p)| *p as u32).sum();
    let progress = (total / subtasks.len() as u32) as u8;
    let message = format!("{} of {} subtasks completed", completed, subtasks.len());

    (status, progress, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(filename: &str) -> JobSpec {
        JobSpec {
            filename: filename.to_string(),
            model: ModelTier::Small,
            use_gpu: false,
            force_reload: false,
            batch_id: None,
        }
    }

    #[tokio::test]
    async fn test_created_job_starts_queued() {
        let registry = JobRegistry::new();
        let id = registry.create(spec("meeting.wav")).await;

        let snap = registry.get(&id).await.unwrap();
        assert_eq!(snap.record.status, JobStatus::Queued);
        assert_eq!(snap.record.progress, 0);
        assert!(snap.record.output_files.is_empty());
        assert!(snap.run_time.is_some());
        assert!(id.contains("meeting"));
    }

    #[tokio::test]
    async fn test_ids_unique_for_same_file_same_second() {
        let registry = JobRegistry::new();
        let a = registry.create(spec("same.wav")).await;
        let b = registry.create(spec("same.wav")).await;
        let c = registry.create(spec("same.wav")).await;
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let registry = JobRegistry::new();
        let id = registry.create(spec("a.wav")).await;

        assert!(registry.set_status(&id, JobStatus::Processing, "go").await);
        assert!(!registry.set_status(&id, JobStatus::Queued, "back").await);
        assert_eq!(
            registry.get(&id).await.unwrap().record.status,
            JobStatus::Processing
        );

        assert!(registry.fail(&id, "boom").await);
        // Terminal records never change again
        assert!(!registry.set_status(&id, JobStatus::Processing, "again").await);
        assert!(!registry.complete(&id, HashMap::new()).await);
        assert_eq!(
            registry.get(&id).await.unwrap().record.status,
            JobStatus::Error
        );
    }

    #[tokio::test]
    async fn test_progress_is_monotone() {
        let registry = JobRegistry::new();
        let id = registry.create(spec("a.wav")).await;
        registry.set_status(&id, JobStatus::Processing, "go").await;

        registry.update_progress(&id, 40, "transcribing").await;
        registry.update_progress(&id, 20, "stale update").await;
        assert_eq!(registry.get(&id).await.unwrap().record.progress, 40);
    }

    #[tokio::test]
    async fn test_complete_sets_everything_at_once() {
        let registry = JobRegistry::new();
        let id = registry.create(spec("a.wav")).await;
        registry.set_status(&id, JobStatus::Processing, "go").await;

        let mut outputs = HashMap::new();
        outputs.insert("txt".to_string(), "a.txt".to_string());
        outputs.insert("srt".to_string(), "a.srt".to_string());
        assert!(registry.complete(&id, outputs).await);

        let snap = registry.get(&id).await.unwrap();
        assert_eq!(snap.record.status, JobStatus::Completed);
        assert_eq!(snap.record.progress, 100);
        assert_eq!(snap.record.output_files.len(), 2);
        assert!(snap.run_time.is_none());
    }

    #[tokio::test]
    async fn test_cancel_flag_and_terminal_cancel() {
        let registry = JobRegistry::new();
        let id = registry.create(spec("a.wav")).await;

        assert!(registry.request_cancel(&id).await);
        assert!(registry.cancel_requested(&id).await);
        assert!(registry.mark_cancelled(&id).await);
        // Cancelling twice is a no-op
        assert!(!registry.request_cancel(&id).await);
    }

    #[tokio::test]
    async fn test_batch_aggregation_matrix() {
        // two completed + one error => error
        assert_eq!(
            aggregate_subtasks(&[
                (JobStatus::Completed, 100),
                (JobStatus::Completed, 100),
                (JobStatus::Error, 40),
            ])
            .0,
            JobStatus::Error
        );
        // all completed => completed
        assert_eq!(
            aggregate_subtasks(&[
                (JobStatus::Completed, 100),
                (JobStatus::Completed, 100),
                (JobStatus::Completed, 100),
            ])
            .0,
            JobStatus::Completed
        );
        // any other mix => processing
        assert_eq!(
            aggregate_subtasks(&[
                (JobStatus::Completed, 100),
                (JobStatus::Processing, 40),
                (JobStatus::Queued, 0),
            ])
            .0,
            JobStatus::Processing
        );
        // cancelled counts at its last progress, and blocks Completed
        let (status, progress, _) = aggregate_subtasks(&[
            (JobStatus::Completed, 100),
            (JobStatus::Cancelled, 50),
        ]);
        assert_eq!(status, JobStatus::Processing);
        assert_eq!(progress, 75);
    }

    #[tokio::test]
    async fn test_batch_snapshot_derives_from_subtasks() {
        let registry = JobRegistry::new();
        let (batch_id, ids) = registry
            .create_batch(vec![spec("a.wav"), spec("b.wav"), spec("c.wav")])
            .await;
        assert_eq!(ids.len(), 3);

        for id in &ids {
            assert_eq!(
                registry.get(id).await.unwrap().record.batch_id.as_deref(),
                Some(batch_id.as_str())
            );
        }

        let snap = registry.get_batch(&batch_id).await.unwrap();
        assert_eq!(snap.status, JobStatus::Processing);
        assert_eq!(snap.progress, 0);

        for id in &ids {
            registry.set_status(id, JobStatus::Processing, "go").await;
            registry.complete(id, HashMap::from([("txt".into(), "x".into())])).await;
        }
        let snap = registry.get_batch(&batch_id).await.unwrap();
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress, 100);
    }

    #[tokio::test]
    async fn test_purge_drops_old_terminal_jobs_only() {
        let registry = JobRegistry::new();
        let old_done = registry.create(spec("old.wav")).await;
        let old_running = registry.create(spec("running.wav")).await;
        let fresh = registry.create(spec("fresh.wav")).await;

        registry.set_status(&old_done, JobStatus::Processing, "go").await;
        registry.fail(&old_done, "failed").await;
        registry
            .set_status(&old_running, JobStatus::Processing, "go")
            .await;

        // Age two of the records by 25 hours
        {
            let mut jobs = registry.jobs.write().await;
            for id in [&old_done, &old_running] {
                jobs.get_mut(id.as_str()).unwrap().start_time =
                    Utc::now() - Duration::hours(25);
            }
        }

        let retained = registry.purge(Utc::now(), Duration::hours(24)).await;
        assert_eq!(retained, 2);
        assert!(registry.get(&old_done).await.is_none());
        // Non-terminal jobs are exempt regardless of age
        assert!(registry.get(&old_running).await.is_some());
        assert!(registry.get(&fresh).await.is_some());
    }

    #[tokio::test]
    async fn test_purge_keeps_batches_with_live_subtasks() {
        let registry = JobRegistry::new();
        let (batch_id, ids) = registry.create_batch(vec![spec("a.wav")]).await;
        registry
            .set_status(&ids[0], JobStatus::Processing, "go")
            .await;

        {
            let mut jobs = registry.jobs.write().await;
            jobs.get_mut(&ids[0]).unwrap().start_time = Utc::now() - Duration::hours(30);
            let mut batches = registry.batches.write().await;
            batches.get_mut(&batch_id).unwrap().start_time = Utc::now() - Duration::hours(30);
        }

        registry.purge(Utc::now(), Duration::hours(24)).await;
        assert!(registry.get_batch(&batch_id).await.is_some());

        // Once the subtask finishes, the next sweep takes both
        registry.complete(&ids[0], HashMap::from([("txt".into(), "x".into())])).await;
        registry.purge(Utc::now(), Duration::hours(24)).await;
        assert!(registry.get_batch(&batch_id).await.is_none());
        assert!(registry.get(&ids[0]).await.is_none());
    }

    #[test]
    fn test_sanitize_base_name() {
        assert_eq!(sanitize_base_name("team meeting (1).wav"), "team_meeting__1_");
        assert_eq!(sanitize_base_name("clean-name.mp3"), "clean-name");
        assert_eq!(sanitize_base_name(".wav"), "_wav");
    }
}
