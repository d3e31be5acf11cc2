//! Turning a user-supplied reference into a queued download job.

use anyhow::Result;

use super::Coordinator;
use crate::content_ref::{parse_content_ref, ContentRefError};
use crate::ledger::{DownloadOptions, DownloadPayload, JobId, JobKind, NewJob, ARTIFACT_READY};

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error(transparent)]
    BadReference(#[from] ContentRefError),
    #[error("{0} is already in the library")]
    AlreadyInLibrary(String),
    #[error("{content_id} already has an open job ({job_id})")]
    AlreadyQueued { content_id: String, job_id: JobId },
}

impl Coordinator {
    /// Queue a download for `reference` (URL or bare id).
    ///
    /// Refuses content that is already in the library unless `force`, and content
    /// that already has a queued/active/waiting job. Those refusals are
    /// `EnqueueError`s inside the returned `anyhow::Error`.
    pub async fn enqueue_download(
        &self,
        reference: &str,
        options: DownloadOptions,
        priority: i64,
        force: bool,
    ) -> Result<JobId> {
        let content = parse_content_ref(reference).map_err(EnqueueError::from)?;

        if !force {
            if let Some(artifact) = self.ledger.get_artifact(&content.content_id).await? {
                if artifact.status == ARTIFACT_READY {
                    return Err(EnqueueError::AlreadyInLibrary(content.content_id).into());
                }
            }
        }
        if let Some(job_id) = self.ledger.find_open_download(&content.content_id).await? {
            return Err(EnqueueError::AlreadyQueued {
                content_id: content.content_id,
                job_id,
            }
            .into());
        }

        let mut payload = DownloadPayload::new(&content.content_id, &content.source_url);
        payload.options = options;
        payload.max_retries = self.settings.max_retries;

        let job = NewJob::new(JobKind::Download, &content.content_id)
            .with_description("Waiting in queue")
            .with_priority(priority)
            .with_metadata(payload.to_metadata());
        self.create(job).await
    }
}
