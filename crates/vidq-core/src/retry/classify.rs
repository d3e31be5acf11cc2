//! Classify third-party failures (resolver stderr, HTTP status, curl errors) into error kinds.
//!
//! This is the only place error text is matched against keywords; everything
//! downstream works with `ErrorKind` / `DownloadError`.

/// High-level classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Content is gone, private, region-locked or members-only. Never retried.
    Unavailable,
    /// Upstream asked us to slow down (429, 403, "rate limit", ...).
    Throttled,
    /// Operation timed out (connect/read).
    Timeout,
    /// Network-level failure (connection reset, DNS, ...).
    Connection,
    /// Retryable HTTP 5xx status.
    Http5xx(u16),
    /// Temporary upstream trouble reported in text ("service unavailable", ...).
    Temporary,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Kinds that send a job to `retry_wait`.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Unavailable | ErrorKind::Other)
    }
}

const UNAVAILABLE_SIGNALS: &[&str] = &[
    "video unavailable",
    "private video",
    "removed",
    "account terminated",
    "copyright",
    "not available",
    "join this channel",
    "members-only",
    "age-restricted",
    "sign in to confirm your age",
];

const THROTTLE_SIGNALS: &[&str] = &[
    "retries exceeded",
    "429",
    "too many requests",
    "throttl",
    "rate limit",
    "forbidden",
];

const TIMEOUT_SIGNALS: &[&str] = &["timed out", "timeout"];

const CONNECTION_SIGNALS: &[&str] = &["connection reset", "connection refused", "broken pipe"];

const TEMPORARY_SIGNALS: &[&str] = &[
    "503",
    "service unavailable",
    "temporarily unavailable",
    "http error 5",
    "server error",
];

/// Signals that escalate a rate-limiter category. Narrower than the download
/// classification: plain timeouts and 5xx do not count as throttling.
const LIMITER_THROTTLE_SIGNALS: &[&str] = &[
    "429",
    "too many requests",
    "rate limit",
    "throttl",
    "retries exceeded",
    "forbidden",
    "http error 403",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify free-form error text (e.g. resolver stderr). Unavailable wins over throttle,
/// throttle over temporary.
pub fn classify_message(msg: &str) -> ErrorKind {
    let lower = msg.to_lowercase();
    if contains_any(&lower, UNAVAILABLE_SIGNALS) {
        ErrorKind::Unavailable
    } else if contains_any(&lower, THROTTLE_SIGNALS) {
        ErrorKind::Throttled
    } else if contains_any(&lower, TIMEOUT_SIGNALS) {
        ErrorKind::Timeout
    } else if contains_any(&lower, CONNECTION_SIGNALS) {
        ErrorKind::Connection
    } else if contains_any(&lower, TEMPORARY_SIGNALS) {
        ErrorKind::Temporary
    } else {
        ErrorKind::Other
    }
}

/// Whether `msg` is a throttle signal for the rate limiter.
pub fn is_throttle_signal(msg: &str) -> bool {
    contains_any(&msg.to_lowercase(), LIMITER_THROTTLE_SIGNALS)
}

/// Classify an HTTP status code.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        403 | 429 => ErrorKind::Throttled,
        503 => ErrorKind::Temporary,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}
