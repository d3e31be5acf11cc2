use std::time::Duration;

use crate::config::RetryConfig;

use super::classify::ErrorKind;
use super::error::DownloadError;

/// Decision for an in-process transfer retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Short exponential backoff for a single transfer that dropped mid-way.
///
/// Only connection-level failures are retried here; throttling and 5xx go to the
/// job-level `RetrySchedule` so the queue cooldown escalates.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// `attempt` is 1-based (1 = first attempt).
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        match kind {
            ErrorKind::Timeout | ErrorKind::Connection => {
                let exp = 1u32 << attempt.saturating_sub(1).min(8);
                RetryDecision::RetryAfter(self.base_delay.saturating_mul(exp).min(self.max_delay))
            }
            _ => RetryDecision::NoRetry,
        }
    }
}

/// What happens to a job after a failed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Terminal but resumable by an operator.
    Park { reason: String },
    /// Back to the queue after `delay`, with the counter bumped to `retry_count`.
    Retry { retry_count: u32, delay: Duration },
    /// Terminal error.
    Fail { message: String },
    Cancelled,
}

/// Job-level retry schedule (default 2, 5 and 15 minutes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self::new(
            cfg.schedule_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        )
    }

    /// Delay before retry number `retry_index + 1`; the last entry repeats.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        self.delays
            .get(retry_index as usize)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::from_secs(60))
    }

    /// Map a failure to the job's next state given how often it was already retried.
    pub fn decide(&self, err: &DownloadError, retry_count: u32, max_retries: u32) -> FailureOutcome {
        match err {
            DownloadError::Cancelled => FailureOutcome::Cancelled,
            DownloadError::PermanentContent(msg) => FailureOutcome::Park {
                reason: msg.clone(),
            },
            DownloadError::Throttle(msg) | DownloadError::Transient(msg) => {
                if retry_count < max_retries {
                    FailureOutcome::Retry {
                        retry_count: retry_count + 1,
                        delay: self.delay_for(retry_count),
                    }
                } else {
                    FailureOutcome::Park {
                        reason: format!("retries exhausted ({}): {}", max_retries, msg),
                    }
                }
            }
            DownloadError::Pipeline(msg) => FailureOutcome::Fail {
                message: msg.clone(),
            },
        }
    }
}
