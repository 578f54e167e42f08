//! In-memory registry of background generation jobs.
//!
//! Each job runs on its own tokio task. The runner reports progress over a
//! bounded channel; a companion task folds those events into the job's
//! [`JobSnapshot`] and records the final outcome once the runner's task
//! has finished, whether it returned, failed or panicked.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use bookgen_core::book::Book;
use bookgen_core::job::JobStatus;
use bookgen_core::types::Timestamp;
use bookgen_pipeline::{BookRunner, JobLog, LogTag, PipelineError, RunContext, RunEvent, RunSummary};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinError;

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// Length of a job id in hex characters.
const JOB_ID_LEN: usize = 12;

/// Point-in-time view of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub book_id: String,
    pub status: JobStatus,
    pub log_path: PathBuf,
    /// Most recently saved artifact.
    pub last_image: Option<PathBuf>,
    /// Name of the record being processed.
    pub current_record: Option<String>,
    /// `(position, total)` of the current record.
    pub record_position: Option<(usize, usize)>,
    pub pages_saved: usize,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
}

impl JobSnapshot {
    fn running(job_id: &str, book_id: &str, log_path: PathBuf) -> Self {
        Self {
            job_id: job_id.to_string(),
            book_id: book_id.to_string(),
            status: JobStatus::Running,
            log_path,
            last_image: None,
            current_record: None,
            record_position: None,
            pages_saved: 0,
            started_at: Utc::now(),
            finished_at: None,
            summary: None,
            error: None,
        }
    }
}

#[derive(Default)]
struct Jobs {
    by_id: HashMap<String, JobSnapshot>,
    /// Most recently started job per book.
    latest: HashMap<String, String>,
}

impl Jobs {
    /// Forget the oldest finished jobs beyond `keep`. Running jobs and each
    /// book's latest job are never evicted.
    fn prune_finished(&mut self, keep: usize) {
        let latest: HashSet<&str> = self.latest.values().map(String::as_str).collect();
        let mut evictable: Vec<(Timestamp, String)> = self
            .by_id
            .values()
            .filter(|job| job.status.is_terminal() && !latest.contains(job.job_id.as_str()))
            .map(|job| (job.finished_at.unwrap_or(job.started_at), job.job_id.clone()))
            .collect();
        if evictable.len() <= keep {
            return;
        }
        evictable.sort();
        let excess = evictable.len() - keep;
        for (_, job_id) in evictable.into_iter().take(excess) {
            self.by_id.remove(&job_id);
            tracing::debug!(job_id = %job_id, "Evicted finished job");
        }
    }
}

/// Registry shared by the HTTP layer and the command line.
///
/// Starting a job never blocks on the job itself. Concurrent jobs are
/// allowed, including two for the same book.
pub struct JobRegistry {
    jobs: RwLock<Jobs>,
    runner: Arc<dyn BookRunner>,
    logs_dir: PathBuf,
    default_output_root: PathBuf,
    channel_capacity: usize,
    history_limit: usize,
}

fn new_job_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(JOB_ID_LEN);
    id
}

impl JobRegistry {
    pub fn new(runner: Arc<dyn BookRunner>, config: &WorkerConfig) -> Self {
        Self {
            jobs: RwLock::new(Jobs::default()),
            runner,
            logs_dir: config.logs_dir.clone(),
            default_output_root: config.default_output_root.clone(),
            channel_capacity: config.event_channel_capacity.max(1),
            history_limit: config.job_history_limit,
        }
    }

    /// Register a job for `book` and start it in the background.
    ///
    /// Returns the new job id as soon as the log file exists.
    pub async fn start_job(self: &Arc<Self>, book: Book) -> Result<String, WorkerError> {
        let job_id = new_job_id();
        let log_path = self.logs_dir.join(format!("{job_id}.log"));
        let log = JobLog::create(&log_path, &job_id)?;

        {
            let mut jobs = self.jobs.write().await;
            jobs.by_id.insert(
                job_id.clone(),
                JobSnapshot::running(&job_id, &book.id, log_path),
            );
            jobs.latest.insert(book.id.clone(), job_id.clone());
        }
        tracing::info!(job_id = %job_id, book_id = %book.id, "Job started");

        let (tx, mut rx) = mpsc::channel(self.channel_capacity);
        let ctx = RunContext {
            job_id: job_id.clone(),
            log: log.clone(),
            events: tx,
            default_output_root: self.default_output_root.clone(),
        };
        let runner = Arc::clone(&self.runner);
        let handle = tokio::spawn(async move { runner.run(&book, &ctx).await });

        let registry = Arc::clone(self);
        let id = job_id.clone();
        tokio::spawn(async move {
            // The channel closes once the runner task drops its context.
            while let Some(event) = rx.recv().await {
                registry.apply_event(&id, event).await;
            }
            registry.finish(&id, handle.await, &log).await;
        });

        Ok(job_id)
    }

    pub async fn status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.read().await.by_id.get(job_id).cloned()
    }

    /// Snapshot of the most recently started job for `book_id`.
    pub async fn latest_for_book(&self, book_id: &str) -> Option<JobSnapshot> {
        let jobs = self.jobs.read().await;
        jobs.latest
            .get(book_id)
            .and_then(|job_id| jobs.by_id.get(job_id))
            .cloned()
    }

    pub async fn running_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .by_id
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .count()
    }

    async fn apply_event(&self, job_id: &str, event: RunEvent) {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.by_id.get_mut(job_id) else {
            return;
        };
        match event {
            RunEvent::RecordStarted {
                position,
                total,
                name,
            } => {
                job.current_record = Some(name);
                job.record_position = Some((position, total));
            }
            RunEvent::PageSaved { path, .. } => {
                job.last_image = Some(path);
                job.pages_saved += 1;
            }
        }
    }

    async fn finish(
        &self,
        job_id: &str,
        outcome: Result<Result<RunSummary, PipelineError>, JoinError>,
        log: &JobLog,
    ) {
        // Log lines go out before the status flips so a stream that sees
        // the terminal status can drain them.
        let (status, summary, error) = match outcome {
            Ok(Ok(summary)) => (JobStatus::Finished, Some(summary), None),
            Ok(Err(e)) => {
                log.line(LogTag::Err, format!("job failed: {e}"));
                (JobStatus::Failed, None, Some(e.to_string()))
            }
            Err(e) => {
                let message = if e.is_panic() {
                    "job panicked".to_string()
                } else {
                    format!("job aborted: {e}")
                };
                log.line(LogTag::Err, &message);
                (JobStatus::Failed, None, Some(message))
            }
        };

        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.by_id.get_mut(job_id) {
            job.status = status;
            job.summary = summary;
            job.error = error;
            job.finished_at = Some(Utc::now());
        }
        jobs.prune_finished(self.history_limit);
        tracing::info!(job_id = %job_id, status = %status, "Job finished");
    }
}
