//! Job CRUD split into reads and state-changing writes.

mod read;
mod write;

pub use write::{MAX_ERROR_LEN, MAX_RETRY_NOTE_LEN};

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::types::{Job, JobKind, JobStatus, Metadata};

pub(crate) const JOB_COLUMNS: &str = r#"
    id, kind, title, description, status, progress, priority, metadata_json,
    parent_id, created_at, started_at, completed_at, result, error_message
"#;

/// `?1, ?2, ...` placeholders starting at `first`, for `IN (...)` clauses.
pub(crate) fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn parse_metadata(raw: Option<&str>) -> Result<Metadata> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Metadata::new()),
        Some(s) => Ok(serde_json::from_str::<Metadata>(s)?),
    }
}

pub(crate) fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id: i64 = row.get("id");
    let kind_str: String = row.get("kind");
    let status_str: String = row.get("status");
    let metadata_json: Option<String> = row.get("metadata_json");

    let kind = JobKind::from_str(&kind_str)
        .ok_or_else(|| anyhow!("job {}: unknown kind {:?}", id, kind_str))?;
    let status = JobStatus::from_str(&status_str)
        .ok_or_else(|| anyhow!("job {}: unknown status {:?}", id, status_str))?;
    let metadata = parse_metadata(metadata_json.as_deref())
        .map_err(|e| anyhow!("job {}: bad metadata: {}", id, e))?;

    Ok(Job {
        id,
        kind,
        title: row.get("title"),
        description: row.get("description"),
        status,
        progress: row.get("progress"),
        priority: row.get("priority"),
        metadata,
        parent_id: row.get("parent_id"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        result: row.get("result"),
        error_message: row.get("error_message"),
    })
}
