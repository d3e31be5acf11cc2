//! Failure classification and retry policy.
//!
//! Third-party errors are turned into `DownloadError` once, where they are caught.
//! `RetrySchedule` decides the job's next state (park, retry later, fail);
//! `RetryPolicy` covers short in-process retries of a dropped transfer.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{
    classify_curl_error, classify_http_status, classify_message, is_throttle_signal, ErrorKind,
};
pub use error::DownloadError;
pub use policy::{FailureOutcome, RetryDecision, RetryPolicy, RetrySchedule};
pub use run::run_with_retry;
