//! Job read operations: get, listings, queue selection and counts.

use anyhow::Result;
use sqlx::Row;

use super::super::db::Ledger;
use super::super::types::{Job, JobId, JobKind, JobStats, JobStatus};
use super::{job_from_row, placeholders, JOB_COLUMNS};

impl Ledger {
    /// Fetch a single job row.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Unfinished jobs (queued, active, retry_wait): active first, then priority desc, oldest first.
    pub async fn list_active(&self, limit: i64) -> Result<Vec<Job>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM jobs
            WHERE status IN ('queued', 'active', 'retry_wait')
            ORDER BY CASE status WHEN 'active' THEN 0 ELSE 1 END,
                     priority DESC, created_at ASC, id ASC
            LIMIT ?1
            "#,
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Most recent jobs of any status, newest first, optionally filtered by kind.
    pub async fn list_recent(&self, limit: i64, kind: Option<JobKind>) -> Result<Vec<Job>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM jobs
            WHERE (?1 IS NULL OR kind = ?1)
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(kind.map(JobKind::as_str))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Highest-priority, oldest queued job of `kind` (ties broken by id).
    pub async fn next_queued(&self, kind: JobKind) -> Result<Option<Job>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM jobs
            WHERE status = 'queued' AND kind = ?1
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT 1
            "#,
            JOB_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// True if any active job is of a kind that holds off the download worker.
    pub async fn has_active_blocking(&self) -> Result<bool> {
        let blocking: Vec<&str> = JobKind::ALL
            .into_iter()
            .filter(|k| k.blocks_downloads())
            .map(JobKind::as_str)
            .collect();
        let sql = format!(
            "SELECT COUNT(*) AS n FROM jobs WHERE status = 'active' AND kind IN ({})",
            placeholders(1, blocking.len())
        );
        let mut q = sqlx::query(&sql);
        for kind in &blocking {
            q = q.bind(*kind);
        }
        let n: i64 = q.fetch_one(&self.pool).await?.get("n");
        Ok(n > 0)
    }

    /// Number of active jobs other than `except`.
    pub async fn count_active_except(&self, except: JobId) -> Result<i64> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS n FROM jobs WHERE status = 'active' AND id != ?1"#,
        )
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// An unfinished download job for `content_id`, if one exists.
    pub async fn find_open_download(&self, content_id: &str) -> Result<Option<JobId>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE kind = 'download'
              AND status IN ('queued', 'active', 'retry_wait')
              AND json_extract(metadata_json, '$.content_id') = ?1
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("id")))
    }

    /// Per-status counts. Pause fields are filled from settings.
    pub async fn job_stats(&self) -> Result<JobStats> {
        let rows = sqlx::query(r#"SELECT status, COUNT(*) AS n FROM jobs GROUP BY status"#)
            .fetch_all(&self.pool)
            .await?;
        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            if let Some(status) = JobStatus::from_str(&status) {
                stats.add(status, n);
            }
        }
        let pause = self.load_pause_state().await?;
        stats.paused = pause.paused;
        stats.pause_reason = pause.reason;
        Ok(stats)
    }
}
