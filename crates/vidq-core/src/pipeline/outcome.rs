use std::time::Duration;

use crate::ledger::JobStatus;

/// How one pipeline run ended, after the job row was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// Moved to `retry_wait`; promoted back to `queued` after `delay`.
    Retry { delay: Duration },
    Parked,
    Failed,
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Done)
    }

    /// Status the job row ends in.
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Done => JobStatus::Done,
            JobOutcome::Retry { .. } => JobStatus::RetryWait,
            JobOutcome::Parked => JobStatus::Parked,
            JobOutcome::Failed => JobStatus::Error,
            JobOutcome::Cancelled => JobStatus::Cancelled,
        }
    }
}
