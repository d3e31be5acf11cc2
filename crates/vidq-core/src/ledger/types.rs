//! Types used by the job ledger.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Job identifier.
pub type JobId = i64;

/// Open metadata map stored as JSON in the `jobs` row.
pub type Metadata = Map<String, Value>;

/// Job status stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Active,
    Done,
    Error,
    Cancelled,
    /// Terminal until an operator resumes it.
    Parked,
    /// Waiting for `retry_after` before returning to the queue.
    RetryWait,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Active,
        JobStatus::Done,
        JobStatus::Error,
        JobStatus::Cancelled,
        JobStatus::Parked,
        JobStatus::RetryWait,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Parked => "parked",
            JobStatus::RetryWait => "retry_wait",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        JobStatus::ALL.into_iter().find(|st| st.as_str() == s)
    }

    /// Rows in these states are swept by retention.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Error | JobStatus::Cancelled | JobStatus::Parked
        )
    }

    /// Whether `self -> next` is an edge of the job state machine.
    ///
    /// Includes the operator edges (cancel, retry, delayed retry, resume parked).
    /// `done` is never left.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Active | Cancelled) => true,
            (Active, Done | Error | Cancelled | Parked | RetryWait) => true,
            (RetryWait, Queued | Cancelled) => true,
            (Error | Cancelled | Parked, Queued) => true,
            (Queued | Error | Cancelled | Parked, RetryWait) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Download,
    FeedCycle,
    Import,
    AvatarFetch,
    ChannelScan,
    ArchiveScan,
    Cleanup,
}

impl JobKind {
    pub const ALL: [JobKind; 7] = [
        JobKind::Download,
        JobKind::FeedCycle,
        JobKind::Import,
        JobKind::AvatarFetch,
        JobKind::ChannelScan,
        JobKind::ArchiveScan,
        JobKind::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::FeedCycle => "feed_cycle",
            JobKind::Import => "import",
            JobKind::AvatarFetch => "avatar_fetch",
            JobKind::ChannelScan => "channel_scan",
            JobKind::ArchiveScan => "archive_scan",
            JobKind::Cleanup => "cleanup",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        JobKind::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// While a job of this kind is active the download worker holds off.
    pub fn blocks_downloads(self) -> bool {
        !matches!(
            self,
            JobKind::Download | JobKind::FeedCycle | JobKind::AvatarFetch
        )
    }

    /// Kinds whose owner re-queues remaining work from its own checkpoint after a restart.
    pub fn resumes_after_restart(self) -> bool {
        matches!(self, JobKind::AvatarFetch)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields for inserting a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub title: String,
    pub description: Option<String>,
    pub metadata: Metadata,
    pub priority: i64,
    pub parent_id: Option<JobId>,
}

impl NewJob {
    pub fn new(kind: JobKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: None,
            metadata: Metadata::new(),
            priority: 0,
            parent_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parent(mut self, parent_id: JobId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Full job row.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub title: String,
    /// Doubles as the current stage label while active.
    pub description: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub priority: i64,
    pub metadata: Metadata,
    pub parent_id: Option<JobId>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result: Option<String>,
    pub error_message: Option<String>,
}

/// Options attached to a download job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    pub quality: String,
    pub format: String,
    pub audio_only: bool,
    /// Allow the adaptive path (separate video and audio, then mux).
    pub merge_audio: bool,
    pub download_thumbnail: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_id: Option<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            quality: "best".to_string(),
            format: "mp4".to_string(),
            audio_only: false,
            merge_audio: true,
            download_thumbnail: true,
            stream_id: None,
            audio_stream_id: None,
        }
    }
}

impl DownloadOptions {
    pub fn from_config(cfg: &crate::config::VidqConfig) -> Self {
        Self {
            quality: cfg.default_quality.clone(),
            format: cfg.default_format.clone(),
            merge_audio: cfg.merge_audio,
            download_thumbnail: cfg.download_thumbnail,
            ..Self::default()
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

/// Typed view of a download job's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadPayload {
    pub content_id: String,
    pub source_url: String,
    #[serde(default)]
    pub options: DownloadOptions,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Unix seconds after which a `retry_wait` job is promoted back to `queued`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<i64>,
    /// Progress keys and anything else collaborators attach.
    #[serde(flatten)]
    pub extra: Metadata,
}

impl DownloadPayload {
    pub fn new(content_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            source_url: source_url.into(),
            options: DownloadOptions::default(),
            retry_count: 0,
            max_retries: default_max_retries(),
            retry_after: None,
            extra: Metadata::new(),
        }
    }

    pub fn to_metadata(&self) -> Metadata {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Metadata::new(),
        }
    }
}

/// Job metadata decoded by kind. Download jobs are validated; everything else stays an open map.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    Download(DownloadPayload),
    Generic(Metadata),
}

#[derive(Debug, thiserror::Error)]
#[error("job {job_id}: invalid {kind} metadata: {source}")]
pub struct PayloadError {
    pub job_id: JobId,
    pub kind: JobKind,
    #[source]
    pub source: serde_json::Error,
}

impl Job {
    pub fn payload(&self) -> Result<JobPayload, PayloadError> {
        match self.kind {
            JobKind::Download => self.download_payload().map(JobPayload::Download),
            _ => Ok(JobPayload::Generic(self.metadata.clone())),
        }
    }

    pub fn download_payload(&self) -> Result<DownloadPayload, PayloadError> {
        serde_json::from_value(Value::Object(self.metadata.clone())).map_err(|source| {
            PayloadError {
                job_id: self.id,
                kind: self.kind,
                source,
            }
        })
    }

    /// `content_id` from metadata, if present.
    pub fn content_id(&self) -> Option<&str> {
        self.metadata.get("content_id").and_then(Value::as_str)
    }
}

/// Persisted queue pause flag and reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseState {
    pub paused: bool,
    pub reason: Option<String>,
}

/// Per-status job counts plus the pause flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub queued: i64,
    pub active: i64,
    pub done: i64,
    pub error: i64,
    pub cancelled: i64,
    pub parked: i64,
    pub retry_wait: i64,
    pub total: i64,
    pub paused: bool,
    pub pause_reason: Option<String>,
}

impl JobStats {
    pub(crate) fn add(&mut self, status: JobStatus, n: i64) {
        let slot = match status {
            JobStatus::Queued => &mut self.queued,
            JobStatus::Active => &mut self.active,
            JobStatus::Done => &mut self.done,
            JobStatus::Error => &mut self.error,
            JobStatus::Cancelled => &mut self.cancelled,
            JobStatus::Parked => &mut self.parked,
            JobStatus::RetryWait => &mut self.retry_wait,
        };
        *slot += n;
        self.total += n;
    }
}
