//! Cooperative cancellation: per-job cancel tokens and the control socket path.
//!
//! Every started job is registered with a `CancelToken`. `cancel` (from the
//! coordinator or a `vidq cancel` client over the control socket) flips the token;
//! the pipeline polls it at phase and chunk boundaries and stops.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::ledger::JobId;

/// Returned by `CancelToken::check` once cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("job cancelled by user")]
pub struct Cancelled;

/// Shared flag polled by running work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Registry of job id -> cancel token for jobs running in this process.
#[derive(Default)]
pub struct JobControl {
    jobs: RwLock<HashMap<JobId, CancelToken>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job and return its token. Re-registering replaces the old token.
    pub fn register(&self, job_id: JobId) -> CancelToken {
        let token = CancelToken::new();
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id, token.clone());
        token
    }

    /// Unregister a job (call when the job finishes, whatever the outcome).
    pub fn unregister(&self, job_id: JobId) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
    }

    /// Flip the token of a running job. Returns false if the job is not running here.
    pub fn request_cancel(&self, job_id: JobId) -> bool {
        match self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered job (shutdown).
    pub fn cancel_all(&self) {
        for token in self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
        {
            token.cancel();
        }
    }

    pub fn running(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Default path for the control socket (same XDG state dir as the ledger).
pub fn default_control_socket_path() -> anyhow::Result<PathBuf> {
    Ok(crate::logging::state_dir()?.join("control.sock"))
}
