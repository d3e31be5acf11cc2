//! Job write operations: insert, guarded status transitions, progress, sweeps.
//!
//! Every status change is a single conditional UPDATE (`WHERE status IN (...)`), so a
//! transition that is not an edge of the state machine affects no rows and reports `false`.

use anyhow::Result;

use super::super::db::{unix_timestamp, Ledger};
use super::super::types::{JobId, JobKind, JobStatus, Metadata, NewJob};

/// Longest error text stored for a failed or parked job.
pub const MAX_ERROR_LEN: usize = 500;
/// Longest error text stored while a job waits to retry.
pub const MAX_RETRY_NOTE_LEN: usize = 200;

/// Truncate to at most `max` chars on a char boundary.
pub(crate) fn truncate_message(msg: &str, max: usize) -> String {
    match msg.char_indices().nth(max) {
        Some((idx, _)) => msg[..idx].to_string(),
        None => msg.to_string(),
    }
}

/// SQL list of quoted status literals; only sources allowed by the state machine are kept.
fn sources_for(to: JobStatus, from: &[JobStatus]) -> String {
    let allowed: Vec<String> = from
        .iter()
        .filter(|s| s.can_transition_to(to))
        .map(|s| format!("'{}'", s.as_str()))
        .collect();
    if allowed.is_empty() {
        // Matches nothing.
        "NULL".to_string()
    } else {
        allowed.join(", ")
    }
}

impl Ledger {
    /// Insert a new queued job.
    pub async fn insert_job(&self, job: &NewJob) -> Result<JobId> {
        let now = unix_timestamp();
        let metadata_json = serde_json::to_string(&job.metadata)?;
        let row_id = sqlx::query(
            r#"
            INSERT INTO jobs (
                kind, title, description, status, progress, priority,
                metadata_json, parent_id, created_at
            ) VALUES (?1, ?2, ?3, 'queued', 0, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(job.kind.as_str())
        .bind(&job.title)
        .bind(&job.description)
        .bind(job.priority)
        .bind(metadata_json)
        .bind(job.parent_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(row_id)
    }

    /// queued -> active. Returns false if the job was not queued.
    pub async fn mark_active(&self, id: JobId) -> Result<bool> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'active',
                started_at = ?1,
                error_message = NULL
            WHERE id = ?2 AND status = 'queued'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// active -> done.
    pub async fn complete_job(&self, id: JobId, result: Option<&str>) -> Result<bool> {
        let now = unix_timestamp();
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'done',
                progress = 1.0,
                completed_at = ?1,
                result = ?2
            WHERE id = ?3 AND status IN ({})
            "#,
            sources_for(JobStatus::Done, &JobStatus::ALL)
        );
        let r = sqlx::query(&sql)
            .bind(now)
            .bind(result)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() == 1)
    }

    /// active -> error or active -> parked, recording the (truncated) message.
    pub async fn finish_with_error(
        &self,
        id: JobId,
        status: JobStatus,
        message: &str,
    ) -> Result<bool> {
        debug_assert!(matches!(status, JobStatus::Error | JobStatus::Parked));
        let now = unix_timestamp();
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = ?1,
                completed_at = ?2,
                error_message = ?3
            WHERE id = ?4 AND status IN ({})
            "#,
            sources_for(status, &JobStatus::ALL)
        );
        let r = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(now)
            .bind(truncate_message(message, MAX_ERROR_LEN))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() == 1)
    }

    /// queued/active/retry_wait -> cancelled.
    pub async fn cancel_job(&self, id: JobId) -> Result<bool> {
        let now = unix_timestamp();
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                completed_at = ?1
            WHERE id = ?2 AND status IN ({})
            "#,
            sources_for(JobStatus::Cancelled, &JobStatus::ALL)
        );
        let r = sqlx::query(&sql)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() == 1)
    }

    /// active -> retry_wait until `retry_after` (Unix seconds).
    /// `retry_count` is written into metadata when given; otherwise the stored count is kept.
    pub async fn schedule_retry(
        &self,
        id: JobId,
        retry_count: Option<u32>,
        retry_after: i64,
        message: &str,
    ) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'retry_wait',
                metadata_json = json_set(
                    metadata_json,
                    '$.retry_after', ?1,
                    '$.retry_count', COALESCE(?2, json_extract(metadata_json, '$.retry_count'), 0)
                ),
                description = 'Waiting to retry',
                error_message = ?3
            WHERE id = ?4 AND status = 'active'
            "#,
        )
        .bind(retry_after)
        .bind(retry_count.map(i64::from))
        .bind(truncate_message(message, MAX_RETRY_NOTE_LEN))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Operator delay: a queued, failed, cancelled or parked download goes to `retry_wait`
    /// until `retry_after`, with its retry counter reset and error/progress cleared.
    /// Active and done jobs are left alone.
    pub async fn delay_job(&self, id: JobId, retry_after: i64) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'retry_wait',
                progress = 0,
                started_at = NULL,
                completed_at = NULL,
                error_message = NULL,
                result = NULL,
                description = 'Waiting to retry',
                metadata_json = json_set(
                    metadata_json,
                    '$.retry_count', 0,
                    '$.retry_after', ?1
                )
            WHERE id = ?2 AND kind = 'download' AND status IN ({})
            "#,
            sources_for(
                JobStatus::RetryWait,
                &[
                    JobStatus::Queued,
                    JobStatus::Error,
                    JobStatus::Cancelled,
                    JobStatus::Parked,
                ],
            )
        );
        let r = sqlx::query(&sql)
            .bind(retry_after)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() == 1)
    }

    /// retry_wait -> queued for every job whose `retry_after` has passed. Returns jobs promoted.
    pub async fn promote_due_retries(&self, now: i64) -> Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued',
                metadata_json = json_remove(metadata_json, '$.retry_after'),
                progress = 0,
                started_at = NULL
            WHERE status = 'retry_wait'
              AND COALESCE(json_extract(metadata_json, '$.retry_after'), 0) <= ?1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Put a job back in the queue from one of `from` (operator action).
    /// Download jobs get their retry counter reset.
    pub async fn requeue_job(&self, id: JobId, from: &[JobStatus]) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'queued',
                progress = 0,
                started_at = NULL,
                completed_at = NULL,
                error_message = NULL,
                result = NULL,
                metadata_json = CASE kind
                    WHEN 'download' THEN json_remove(json_set(metadata_json, '$.retry_count', 0), '$.retry_after')
                    ELSE metadata_json
                END
            WHERE id = ?1 AND status IN ({})
            "#,
            sources_for(JobStatus::Queued, from)
        );
        let r = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(r.rows_affected() == 1)
    }

    /// Bulk form of `requeue_job` for every job of `kind` in one of `from`.
    pub async fn requeue_all(&self, kind: JobKind, from: &[JobStatus]) -> Result<u64> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'queued',
                progress = 0,
                started_at = NULL,
                completed_at = NULL,
                error_message = NULL,
                result = NULL,
                metadata_json = json_remove(json_set(metadata_json, '$.retry_count', 0), '$.retry_after')
            WHERE kind = ?1 AND status IN ({})
            "#,
            sources_for(JobStatus::Queued, from)
        );
        let r = sqlx::query(&sql)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Merge-patch metadata and update progress/label of an active job.
    /// Keys set to `null` in `patch` are removed.
    pub async fn update_progress(
        &self,
        id: JobId,
        progress: f64,
        label: Option<&str>,
        patch: &Metadata,
    ) -> Result<bool> {
        let patch_json = serde_json::to_string(patch)?;
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = ?1,
                description = COALESCE(?2, description),
                metadata_json = json_patch(metadata_json, ?3)
            WHERE id = ?4 AND status = 'active'
            "#,
        )
        .bind(progress.clamp(0.0, 1.0))
        .bind(label)
        .bind(patch_json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    pub async fn update_title(&self, id: JobId, title: &str) -> Result<()> {
        sqlx::query(r#"UPDATE jobs SET title = ?1 WHERE id = ?2"#)
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move jobs left `active` by a previous process to `error`, except resumable kinds.
    /// Returns the number of jobs swept.
    pub async fn sweep_interrupted(&self) -> Result<u64> {
        let now = unix_timestamp();
        let resumable: Vec<String> = JobKind::ALL
            .into_iter()
            .filter(|k| k.resumes_after_restart())
            .map(|k| format!("'{}'", k.as_str()))
            .collect();
        let exclude = if resumable.is_empty() {
            "NULL".to_string()
        } else {
            resumable.join(", ")
        };
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'error',
                completed_at = ?1,
                error_message = 'interrupted by restart'
            WHERE status = 'active' AND kind NOT IN ({})
            "#,
            exclude
        );
        let r = sqlx::query(&sql).bind(now).execute(&self.pool).await?;
        Ok(r.rows_affected())
    }

    /// Delete finished rows. With `older_than`, only rows completed before that Unix time
    /// (done/error/cancelled); without it, every finished row including parked ones.
    pub async fn delete_finished(&self, older_than: Option<i64>) -> Result<u64> {
        let r = match older_than {
            Some(cutoff) => {
                sqlx::query(
                    r#"
                    DELETE FROM jobs
                    WHERE status IN ('done', 'error', 'cancelled')
                      AND COALESCE(completed_at, created_at) < ?1
                    "#,
                )
                .bind(cutoff)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    DELETE FROM jobs
                    WHERE status IN ('done', 'error', 'cancelled', 'parked')
                    "#,
                )
                .execute(&self.pool)
                .await?
            }
        };
        Ok(r.rows_affected())
    }

    /// Permanently remove a job row.
    pub async fn remove_job(&self, id: JobId) -> Result<()> {
        sqlx::query(r#"DELETE FROM jobs WHERE id = ?1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
