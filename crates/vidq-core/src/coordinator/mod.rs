//! Job coordinator: the only way job rows change status.
//!
//! Wraps the ledger with the global exclusive slot (a size-1 semaphore),
//! cooperative cancellation, queue pause/resume and progress notifications.
//! One instance is shared (`Arc<Coordinator>`) by the worker, the pipeline and
//! any collaborator that runs jobs.

mod admin;
mod enqueue;

pub use enqueue::EnqueueError;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::VidqConfig;
use crate::control::{CancelToken, Cancelled, JobControl};
use crate::ledger::{unix_timestamp, JobId, JobStatus, Ledger, Metadata, NewJob};
use crate::progress::{JobUpdate, ProgressBroadcaster, ProgressEvent, Stage};

/// Error recorded for jobs that were running when the process shut down.
pub const INTERRUPTED_BY_SHUTDOWN: &str = "interrupted by shutdown";

/// Timing knobs for exclusive starts and the retry budget given to new downloads.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Longest an exclusive start waits for other active jobs before proceeding anyway.
    pub idle_timeout: Duration,
    pub idle_poll: Duration,
    pub max_retries: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&VidqConfig::default())
    }
}

impl CoordinatorSettings {
    pub fn from_config(cfg: &VidqConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(cfg.worker.exclusive_idle_timeout_secs),
            idle_poll: Duration::from_millis(cfg.worker.exclusive_poll_ms.max(1)),
            max_retries: cfg.retry.max_retries,
        }
    }
}

/// One progress call: overall fraction, label and a metadata merge-patch.
#[derive(Debug, Clone, Default)]
pub struct ProgressReport {
    pub fraction: f64,
    pub label: Option<String>,
    pub stage: Option<Stage>,
    pub content_id: Option<String>,
    pub bytes_done: Option<u64>,
    pub bytes_total: Option<u64>,
    pub patch: Metadata,
}

impl ProgressReport {
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction,
            ..Self::default()
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Result of the startup sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub interrupted: u64,
    pub paused: bool,
    pub pause_reason: Option<String>,
}

pub struct Coordinator {
    ledger: Ledger,
    events: ProgressBroadcaster,
    control: Arc<JobControl>,
    exclusive: Arc<Semaphore>,
    held: Mutex<HashMap<JobId, OwnedSemaphorePermit>>,
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(
        ledger: Ledger,
        events: ProgressBroadcaster,
        control: Arc<JobControl>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            ledger,
            events,
            control,
            exclusive: Arc::new(Semaphore::new(1)),
            held: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn events(&self) -> &ProgressBroadcaster {
        &self.events
    }

    pub fn control(&self) -> &Arc<JobControl> {
        &self.control
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Whether some job currently holds the exclusive slot.
    pub fn exclusive_held(&self) -> bool {
        self.exclusive.available_permits() == 0
    }

    fn emit_status(&self, id: JobId, status: JobStatus, progress: f64) {
        self.events.emit(ProgressEvent::Job(JobUpdate {
            progress,
            ..JobUpdate::status_only(id, status)
        }));
    }

    fn release(&self, id: JobId) {
        let permit = self
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if permit.is_some() {
            tracing::debug!(job_id = id, "exclusive slot released");
        }
        self.control.unregister(id);
    }

    /// Sweep jobs left active by a previous process and report the persisted pause state.
    pub async fn recover_after_restart(&self) -> Result<Recovery> {
        let interrupted = self.ledger.sweep_interrupted().await?;
        if interrupted > 0 {
            tracing::warn!(count = interrupted, "marked interrupted jobs as error");
        }
        let pause = self.ledger.load_pause_state().await?;
        if pause.paused {
            tracing::info!(reason = ?pause.reason, "queue is paused from a previous run");
        }
        Ok(Recovery {
            interrupted,
            paused: pause.paused,
            pause_reason: pause.reason,
        })
    }

    /// Insert a queued job and notify listeners.
    pub async fn create(&self, job: NewJob) -> Result<JobId> {
        let id = self.ledger.insert_job(&job).await?;
        tracing::info!(job_id = id, kind = %job.kind, title = %job.title, "job created");
        self.emit_status(id, JobStatus::Queued, 0.0);
        Ok(id)
    }

    async fn wait_for_idle(&self, id: JobId) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.settings.idle_timeout;
        loop {
            let others = self.ledger.count_active_except(id).await?;
            if others == 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    job_id = id,
                    active = others,
                    "timed out waiting for idle, starting exclusive job anyway"
                );
                return Ok(());
            }
            tokio::time::sleep(self.settings.idle_poll).await;
        }
    }

    /// queued -> active. With `exclusive`, first waits for other active jobs to finish
    /// (bounded) and for the exclusive slot. Returns None if the job was no longer queued.
    pub async fn start(&self, id: JobId, exclusive: bool) -> Result<Option<CancelToken>> {
        let permit = if exclusive {
            self.wait_for_idle(id).await?;
            let permit = Arc::clone(&self.exclusive)
                .acquire_owned()
                .await
                .map_err(|_| anyhow::anyhow!("exclusive slot closed"))?;
            Some(permit)
        } else {
            None
        };

        if !self.ledger.mark_active(id).await? {
            tracing::debug!(job_id = id, "start skipped: job is not queued");
            return Ok(None);
        }
        if let Some(permit) = permit {
            self.held
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(id, permit);
            tracing::debug!(job_id = id, "exclusive slot acquired");
        }
        let token = self.control.register(id);
        self.emit_status(id, JobStatus::Active, 0.0);
        Ok(Some(token))
    }

    /// Persist progress/label/metadata of an active job and notify listeners.
    pub async fn progress(&self, id: JobId, report: ProgressReport) -> Result<()> {
        let mut patch = report.patch;
        if let Some(stage) = report.stage {
            patch.insert("stage".into(), stage.as_str().into());
        }
        let updated = self
            .ledger
            .update_progress(id, report.fraction, report.label.as_deref(), &patch)
            .await?;
        if !updated {
            return Ok(());
        }
        self.events.emit(ProgressEvent::Job(JobUpdate {
            job_id: id,
            content_id: report.content_id,
            status: JobStatus::Active,
            progress: report.fraction.clamp(0.0, 1.0),
            stage: report.stage,
            stage_label: report.label,
            bytes_done: report.bytes_done,
            bytes_total: report.bytes_total,
        }));
        Ok(())
    }

    /// active -> done. No-op (returns false) after the first terminal transition.
    pub async fn complete(&self, id: JobId, result: Option<&str>) -> Result<bool> {
        let changed = self.ledger.complete_job(id, result).await?;
        self.release(id);
        if changed {
            tracing::info!(job_id = id, "job done");
            self.emit_status(id, JobStatus::Done, 1.0);
        }
        Ok(changed)
    }

    /// active -> error. No-op after the first terminal transition.
    pub async fn fail(&self, id: JobId, error: &str) -> Result<bool> {
        let changed = self
            .ledger
            .finish_with_error(id, JobStatus::Error, error)
            .await?;
        self.release(id);
        if changed {
            tracing::warn!(job_id = id, "job failed: {}", error);
            self.emit_status(id, JobStatus::Error, 0.0);
        }
        Ok(changed)
    }

    /// active -> parked (content permanently unavailable or retries exhausted).
    pub async fn park(&self, id: JobId, reason: &str) -> Result<bool> {
        let changed = self
            .ledger
            .finish_with_error(id, JobStatus::Parked, reason)
            .await?;
        self.release(id);
        if changed {
            tracing::warn!(job_id = id, "job parked: {}", reason);
            self.emit_status(id, JobStatus::Parked, 0.0);
        }
        Ok(changed)
    }

    /// active -> retry_wait for `delay`. `retry_count` None keeps the stored counter.
    pub async fn schedule_retry(
        &self,
        id: JobId,
        retry_count: Option<u32>,
        delay: Duration,
        message: &str,
    ) -> Result<bool> {
        let retry_after = unix_timestamp() + delay.as_secs_f64().ceil() as i64;
        let changed = self
            .ledger
            .schedule_retry(id, retry_count, retry_after, message)
            .await?;
        self.release(id);
        if changed {
            tracing::info!(
                job_id = id,
                retry_count,
                delay_secs = delay.as_secs(),
                "job will retry: {}",
                message
            );
            self.emit_status(id, JobStatus::RetryWait, 0.0);
        }
        Ok(changed)
    }

    /// queued/active/retry_wait -> cancelled, and flip the job's cancel token if it runs here.
    pub async fn cancel(&self, id: JobId) -> Result<bool> {
        let signalled = self.control.request_cancel(id);
        let changed = self.ledger.cancel_job(id).await?;
        self.release(id);
        if changed {
            tracing::info!(job_id = id, signalled, "job cancelled");
            self.emit_status(id, JobStatus::Cancelled, 0.0);
        }
        Ok(changed)
    }

    /// Shutdown: record every job running in this process as interrupted (active -> error),
    /// then trip their tokens so in-flight transfers stop. A run that settles afterwards finds
    /// the row already finished and leaves it alone. Returns the jobs marked.
    pub async fn interrupt_running(&self) -> Result<Vec<JobId>> {
        let mut marked = Vec::new();
        for id in self.control.running() {
            if self
                .ledger
                .finish_with_error(id, JobStatus::Error, INTERRUPTED_BY_SHUTDOWN)
                .await?
            {
                self.emit_status(id, JobStatus::Error, 0.0);
                marked.push(id);
            }
        }
        if !marked.is_empty() {
            tracing::warn!(jobs = ?marked, "running jobs interrupted by shutdown");
        }
        self.control.cancel_all();
        Ok(marked)
    }

    /// Run `task` as job `id` under the exclusive slot, with queued -> active -> done/error/cancelled
    /// bookkeeping. The task receives the job's cancel token. Returns the final status.
    pub async fn run_exclusive<F, Fut>(&self, id: JobId, task: F) -> Result<JobStatus>
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = Result<Option<String>>>,
    {
        let Some(token) = self.start(id, true).await? else {
            bail!("job {} is not queued", id);
        };
        let outcome = task(token.clone()).await;
        let status = match outcome {
            _ if token.is_cancelled() => {
                self.cancel(id).await?;
                JobStatus::Cancelled
            }
            Ok(result) => {
                self.complete(id, result.as_deref()).await?;
                JobStatus::Done
            }
            Err(e) if e.downcast_ref::<Cancelled>().is_some() => {
                self.cancel(id).await?;
                JobStatus::Cancelled
            }
            Err(e) => {
                self.fail(id, &format!("{:#}", e)).await?;
                JobStatus::Error
            }
        };
        Ok(status)
    }
}
