//! Download failure taxonomy.

use crate::control::Cancelled;

use super::classify::{classify_curl_error, classify_http_status, classify_message, ErrorKind};

/// Failure of one pipeline run, already classified at the boundary where it was caught.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    /// Removed, private, region-locked or members-only content. The job is parked.
    #[error("content unavailable: {0}")]
    PermanentContent(String),
    /// Upstream throttling. Retried later; the rate-limiter category escalates.
    #[error("throttled: {0}")]
    Throttle(String),
    /// Timeouts, connection drops, 5xx. Retried later.
    #[error("temporary failure: {0}")]
    Transient(String),
    /// Local or unclassified failure (mux exit code, disk, no usable stream).
    #[error("{0}")]
    Pipeline(String),
    #[error("cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Unavailable => DownloadError::PermanentContent(message),
            ErrorKind::Throttled => DownloadError::Throttle(message),
            ErrorKind::Timeout
            | ErrorKind::Connection
            | ErrorKind::Http5xx(_)
            | ErrorKind::Temporary => DownloadError::Transient(message),
            ErrorKind::Other => DownloadError::Pipeline(message),
        }
    }

    /// Classify free-form error text.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::from_kind(classify_message(&message), message)
    }

    pub fn from_http_status(code: u32, what: &str) -> Self {
        Self::from_kind(
            classify_http_status(code),
            format!("HTTP Error {} fetching {}", code, what),
        )
    }

    pub fn from_curl(e: &curl::Error) -> Self {
        Self::from_kind(classify_curl_error(e), format!("curl: {}", e))
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        DownloadError::Pipeline(message.into())
    }

    /// Human-readable text without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            DownloadError::PermanentContent(m)
            | DownloadError::Throttle(m)
            | DownloadError::Transient(m)
            | DownloadError::Pipeline(m) => m,
            DownloadError::Cancelled => "cancelled",
        }
    }

    /// Throttle and transient failures go to `retry_wait`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DownloadError::Throttle(_) | DownloadError::Transient(_))
    }

    /// Short tag stored in job metadata as `last_error_kind`.
    pub fn kind_str(&self) -> &'static str {
        match self {
            DownloadError::PermanentContent(_) => "unavailable",
            DownloadError::Throttle(_) => "throttle",
            DownloadError::Transient(_) => "temporary",
            DownloadError::Pipeline(_) => "pipeline",
            DownloadError::Cancelled => "cancelled",
        }
    }
}

impl From<Cancelled> for DownloadError {
    fn from(_: Cancelled) -> Self {
        DownloadError::Cancelled
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        DownloadError::Pipeline(format!("io: {}", e))
    }
}
