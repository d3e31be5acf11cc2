//! Retry loop for blocking transfers: run a closure until success or policy says stop.

use std::time::Duration;

use crate::control::CancelToken;

use super::classify::ErrorKind;
use super::error::DownloadError;
use super::policy::{RetryDecision, RetryPolicy};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Runs `f(attempt)` until it succeeds, the policy says stop, or `token` is cancelled.
/// Backoff sleeps are sliced so cancellation is noticed promptly.
pub fn run_with_retry<T, F>(
    policy: &RetryPolicy,
    token: &CancelToken,
    mut f: F,
) -> Result<T, DownloadError>
where
    F: FnMut(u32) -> Result<T, (ErrorKind, DownloadError)>,
{
    let mut attempt = 1u32;
    loop {
        token.check()?;
        match f(attempt) {
            Ok(v) => return Ok(v),
            Err((kind, err)) => match policy.decide(attempt, kind) {
                RetryDecision::NoRetry => return Err(err),
                RetryDecision::RetryAfter(delay) => {
                    tracing::debug!(attempt, ?delay, "transfer failed, retrying: {}", err);
                    let mut left = delay;
                    while !left.is_zero() {
                        token.check()?;
                        let step = left.min(SLEEP_SLICE);
                        std::thread::sleep(step);
                        left -= step;
                    }
                    attempt += 1;
                }
            },
        }
    }
}
