//! Progress notifications fanned out to external listeners.
//!
//! Job updates (phase transitions and throttled byte ticks), queue pause/resume
//! and cooldown events all travel over one broadcast channel. Slow listeners
//! lose old events (`RecvError::Lagged`) rather than stalling the pipeline.

mod phases;
mod throttle;

pub use phases::{global_fraction, PhaseSpan, PipelineShape, Stage};
pub use throttle::EmitThrottle;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::ledger::{JobId, JobStatus};

const DEFAULT_CAPACITY: usize = 256;

/// Snapshot of one job, sent on every phase transition and throttled byte tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub content_id: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub stage: Option<Stage>,
    pub stage_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_done: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
}

impl JobUpdate {
    pub fn status_only(job_id: JobId, status: JobStatus) -> Self {
        Self {
            job_id,
            content_id: None,
            status,
            progress: 0.0,
            stage: None,
            stage_label: None,
            bytes_done: None,
            bytes_total: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Job(JobUpdate),
    QueuePaused { reason: Option<String> },
    QueueResumed,
    /// Inter-job cooldown countdown.
    Cooldown { seconds: u64, remaining: u64 },
    JobsCleared { count: u64 },
}

/// Cloneable handle to the broadcast channel.
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Send to all current listeners; having none is fine.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}
