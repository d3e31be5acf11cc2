//! Operator actions on the queue: pause/resume, requeue, cleanup, queries.

use std::time::Duration;

use anyhow::Result;

use super::Coordinator;
use crate::ledger::{unix_timestamp, Job, JobId, JobKind, JobStats, JobStatus, PauseState};
use crate::progress::ProgressEvent;

impl Coordinator {
    /// Persist the pause flag; the worker stops claiming jobs on its next iteration.
    pub async fn pause_queue(&self, reason: Option<&str>) -> Result<()> {
        let state = PauseState {
            paused: true,
            reason: reason.map(str::to_string),
        };
        self.ledger.save_pause_state(&state).await?;
        tracing::info!(reason = ?state.reason, "queue paused");
        self.events.emit(ProgressEvent::QueuePaused {
            reason: state.reason,
        });
        Ok(())
    }

    pub async fn resume_queue(&self) -> Result<()> {
        self.ledger.save_pause_state(&PauseState::default()).await?;
        tracing::info!("queue resumed");
        self.events.emit(ProgressEvent::QueueResumed);
        Ok(())
    }

    pub async fn pause_state(&self) -> Result<PauseState> {
        self.ledger.load_pause_state().await
    }

    /// error/cancelled/retry_wait -> queued with the retry counter reset.
    pub async fn retry(&self, id: JobId) -> Result<bool> {
        let changed = self
            .ledger
            .requeue_job(
                id,
                &[JobStatus::Error, JobStatus::Cancelled, JobStatus::RetryWait],
            )
            .await?;
        if changed {
            tracing::info!(job_id = id, "job requeued");
            self.emit_status(id, JobStatus::Queued, 0.0);
        }
        Ok(changed)
    }

    /// parked -> queued.
    pub async fn resume_parked(&self, id: JobId) -> Result<bool> {
        let changed = self.ledger.requeue_job(id, &[JobStatus::Parked]).await?;
        if changed {
            tracing::info!(job_id = id, "parked job resumed");
            self.emit_status(id, JobStatus::Queued, 0.0);
        }
        Ok(changed)
    }

    /// Requeue every failed, cancelled or waiting download. Parked jobs stay parked.
    pub async fn retry_all_failed(&self) -> Result<u64> {
        let n = self
            .ledger
            .requeue_all(
                JobKind::Download,
                &[JobStatus::Error, JobStatus::Cancelled, JobStatus::RetryWait],
            )
            .await?;
        if n > 0 {
            tracing::info!(count = n, "requeued failed downloads");
        }
        Ok(n)
    }

    /// Queued/error/cancelled/parked download -> retry_wait for `delay`, retry counter reset.
    /// The worker promotes it back to the queue once the delay has passed.
    pub async fn retry_with_delay(&self, id: JobId, delay: Duration) -> Result<bool> {
        let retry_after = unix_timestamp() + delay.as_secs_f64().ceil() as i64;
        let changed = self.ledger.delay_job(id, retry_after).await?;
        if changed {
            tracing::info!(job_id = id, delay_secs = delay.as_secs(), "job retry scheduled");
            self.emit_status(id, JobStatus::RetryWait, 0.0);
        }
        Ok(changed)
    }

    /// Delete every finished row (done, error, cancelled, parked).
    pub async fn cleanup_finished(&self) -> Result<u64> {
        let count = self.ledger.delete_finished(None).await?;
        tracing::info!(count, "cleared finished jobs");
        self.events.emit(ProgressEvent::JobsCleared { count });
        Ok(count)
    }

    /// Delete done/error/cancelled rows that finished more than `max_age` ago.
    pub async fn sweep_older_than(&self, max_age: Duration) -> Result<u64> {
        let cutoff = unix_timestamp() - max_age.as_secs() as i64;
        let count = self.ledger.delete_finished(Some(cutoff)).await?;
        if count > 0 {
            tracing::info!(count, "retention sweep removed old jobs");
            self.events.emit(ProgressEvent::JobsCleared { count });
        }
        Ok(count)
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.ledger.get_job(id).await
    }

    pub async fn list_active(&self, limit: i64) -> Result<Vec<Job>> {
        self.ledger.list_active(limit).await
    }

    pub async fn list_recent(&self, limit: i64, kind: Option<JobKind>) -> Result<Vec<Job>> {
        self.ledger.list_recent(limit, kind).await
    }

    pub async fn stats(&self) -> Result<JobStats> {
        self.ledger.job_stats().await
    }
}
