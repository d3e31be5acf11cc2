//! Blocking HTTP transfer of one stream to a file (libcurl).
//!
//! Progress is reported as (bytes_done, bytes_total) no more often than the
//! configured interval. The transfer aborts at the next chunk once the job's
//! cancel token is set. Dropped connections are retried in place with a short
//! backoff; everything else is returned classified.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use curl::easy::Easy;

use crate::control::CancelToken;
use crate::progress::EmitThrottle;
use crate::retry::{
    classify_curl_error, classify_http_status, run_with_retry, DownloadError, ErrorKind,
    RetryPolicy,
};

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Minimum interval between progress callbacks.
    pub min_emit: Duration,
    pub retry: RetryPolicy,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            min_emit: Duration::from_millis(400),
            retry: RetryPolicy::default(),
        }
    }
}

type AttemptError = (ErrorKind, DownloadError);

fn curl_failure(e: curl::Error) -> AttemptError {
    (classify_curl_error(&e), DownloadError::from_curl(&e))
}

fn configure(easy: &mut Easy, url: &str) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(Duration::from_secs(30))?;
    easy.low_speed_limit(1024)?;
    easy.low_speed_time(Duration::from_secs(60))?;
    easy.timeout(Duration::from_secs(3600))?;
    easy.progress(true)?;
    Ok(())
}

fn attempt(
    url: &str,
    dest: &Path,
    what: &str,
    token: &CancelToken,
    throttle: &mut EmitThrottle,
    on_progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<u64, AttemptError> {
    let file = File::create(dest).map_err(|e| (ErrorKind::Other, DownloadError::from(e)))?;
    let mut out = BufWriter::new(file);
    let mut written: u64 = 0;
    let mut write_err: Option<std::io::Error> = None;

    let mut easy = Easy::new();
    configure(&mut easy, url).map_err(curl_failure)?;

    let performed = {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                if token.is_cancelled() {
                    return Ok(0);
                }
                match out.write_all(data) {
                    Ok(()) => {
                        written += data.len() as u64;
                        Ok(data.len())
                    }
                    Err(e) => {
                        write_err = Some(e);
                        Ok(0)
                    }
                }
            })
            .map_err(curl_failure)?;
        transfer
            .progress_function(|total, now, _, _| {
                if now > 0.0 && throttle.ready() {
                    on_progress(now as u64, (total > 0.0).then_some(total as u64));
                }
                !token.is_cancelled()
            })
            .map_err(curl_failure)?;
        transfer.perform()
    };

    if let Err(e) = performed {
        if token.is_cancelled() {
            return Err((ErrorKind::Other, DownloadError::Cancelled));
        }
        if let Some(io) = write_err {
            return Err((ErrorKind::Other, DownloadError::from(io)));
        }
        return Err(curl_failure(e));
    }

    let code = easy.response_code().map_err(curl_failure)?;
    if code >= 400 {
        return Err((
            classify_http_status(code),
            DownloadError::from_http_status(code, what),
        ));
    }
    out.flush()
        .map_err(|e| (ErrorKind::Other, DownloadError::from(e)))?;
    on_progress(written, Some(written));
    Ok(written)
}

/// Download `url` into `dest` (truncated first), returning the bytes written.
/// `what` names the stream in error messages.
pub fn fetch_to_file(
    url: &str,
    dest: &Path,
    what: &str,
    token: &CancelToken,
    opts: &FetchOptions,
    on_progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<u64, DownloadError> {
    let mut throttle = EmitThrottle::new(opts.min_emit);
    let bytes = run_with_retry(&opts.retry, token, |n| {
        if n > 1 {
            tracing::info!(attempt = n, "retrying {} transfer", what);
        }
        attempt(url, dest, what, token, &mut throttle, on_progress)
    })?;
    tracing::debug!(bytes, path = %dest.display(), "fetched {}", what);
    Ok(bytes)
}
