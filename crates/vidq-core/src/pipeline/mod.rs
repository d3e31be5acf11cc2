//! Download pipeline: resolve -> download video -> download audio -> merge -> finalize.
//!
//! One `run` takes an already-active download job to a terminal or waiting state.
//! Blocking work (resolver subprocess, libcurl transfers, ffmpeg) runs on the
//! blocking pool; progress flows back over a channel and through the coordinator.
//! Failures are classified where they are caught and settled here; nothing
//! escapes to the worker.

mod fetch;
mod finalize;
mod mux;
mod outcome;
mod report;
mod resolve;
mod select;
mod subtitles;
mod workdir;

pub use fetch::{fetch_to_file, FetchOptions};
pub use mux::{merge_fraction, parse_progress_line, FfmpegMuxer, Muxer, UNKNOWN_DURATION_FRACTION};
pub use outcome::JobOutcome;
pub use resolve::{parse_resolver_json, ResolvedMedia, StreamInfo, StreamResolver, SubtitleTrack, YtDlpResolver};
pub use select::{select_streams, StreamSelection};
pub use subtitles::srt_to_vtt;
pub use workdir::WorkDir;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::config::VidqConfig;
use crate::control::CancelToken;
use crate::coordinator::Coordinator;
use crate::ledger::{Artifact, DownloadPayload, Job, JobId};
use crate::limiter::RateLimiter;
use crate::progress::{PipelineShape, Stage};
use crate::retry::{DownloadError, FailureOutcome, RetryPolicy, RetrySchedule};

use report::StageReporter;

/// Limiter categories used by the pipeline.
pub const CATEGORY_RESOLVE: &str = "resolve";
pub const CATEGORY_DOWNLOAD: &str = "download";
pub const CATEGORY_THUMBNAIL: &str = "thumbnail";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub media_dir: PathBuf,
    pub auto_chapters: bool,
    pub auto_subtitles: bool,
    pub subtitle_langs: Vec<String>,
    pub fetch: FetchOptions,
    pub schedule: RetrySchedule,
}

impl PipelineSettings {
    /// Defaults rooted at `media_dir`.
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
            auto_chapters: true,
            auto_subtitles: false,
            subtitle_langs: vec!["en".to_string()],
            fetch: FetchOptions::default(),
            schedule: RetrySchedule::default(),
        }
    }

    pub fn from_config(cfg: &VidqConfig) -> Result<Self> {
        Ok(Self {
            media_dir: cfg.resolved_media_dir()?,
            auto_chapters: cfg.auto_chapters,
            auto_subtitles: cfg.auto_subtitles,
            subtitle_langs: cfg.subtitle_langs.clone(),
            fetch: FetchOptions {
                min_emit: Duration::from_millis(cfg.worker.progress_emit_ms),
                retry: RetryPolicy::default(),
            },
            schedule: RetrySchedule::from_config(&cfg.retry),
        })
    }
}

pub struct DownloadPipeline {
    coordinator: Arc<Coordinator>,
    limiter: Arc<RateLimiter>,
    resolver: Arc<dyn StreamResolver>,
    muxer: Arc<dyn Muxer>,
    settings: PipelineSettings,
}

fn record(id: JobId, result: Result<bool>) {
    if let Err(e) = result {
        tracing::error!(job_id = id, "failed to record job outcome: {:#}", e);
    }
}

fn join_error(e: tokio::task::JoinError) -> DownloadError {
    DownloadError::pipeline(format!("blocking task failed: {}", e))
}

/// Files produced by the download phases, still inside the work dir.
struct Downloaded {
    path: PathBuf,
    ext: String,
}

impl DownloadPipeline {
    pub fn new(
        coordinator: Arc<Coordinator>,
        limiter: Arc<RateLimiter>,
        resolver: Arc<dyn StreamResolver>,
        muxer: Arc<dyn Muxer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            coordinator,
            limiter,
            resolver,
            muxer,
            settings,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Run an active download job to completion and settle its row.
    pub async fn run(&self, job: &Job, token: CancelToken) -> JobOutcome {
        let payload = match job.download_payload() {
            Ok(p) => p,
            Err(e) => {
                record(job.id, self.coordinator.fail(job.id, &e.to_string()).await);
                return JobOutcome::Failed;
            }
        };

        let result = match self.execute(job.id, &payload, &token).await {
            Err(_) if token.is_cancelled() => Err(DownloadError::Cancelled),
            other => other,
        };
        self.settle(job.id, &payload, result).await
    }

    async fn settle(
        &self,
        id: JobId,
        payload: &DownloadPayload,
        result: Result<Artifact, DownloadError>,
    ) -> JobOutcome {
        let c = &self.coordinator;
        let err = match result {
            Ok(artifact) => {
                record(id, c.complete(id, artifact.file_path.as_deref()).await);
                return JobOutcome::Done;
            }
            Err(e) => e,
        };

        match self
            .settings
            .schedule
            .decide(&err, payload.retry_count, payload.max_retries)
        {
            FailureOutcome::Cancelled => {
                record(id, c.cancel(id).await);
                JobOutcome::Cancelled
            }
            FailureOutcome::Park { reason } => {
                record(id, c.park(id, &reason).await);
                JobOutcome::Parked
            }
            FailureOutcome::Retry { retry_count, delay } => {
                record(
                    id,
                    c.schedule_retry(id, Some(retry_count), delay, err.message())
                        .await,
                );
                JobOutcome::Retry { delay }
            }
            FailureOutcome::Fail { message } => {
                record(id, c.fail(id, &message).await);
                JobOutcome::Failed
            }
        }
    }

    async fn resolve(&self, source_url: &str) -> Result<ResolvedMedia, DownloadError> {
        self.limiter.acquire(CATEGORY_RESOLVE).await;
        let resolver = Arc::clone(&self.resolver);
        let url = source_url.to_string();
        let result = tokio::task::spawn_blocking(move || resolver.resolve(&url))
            .await
            .map_err(join_error)?;
        match &result {
            Ok(_) => self.limiter.success(CATEGORY_RESOLVE),
            Err(e) => {
                self.limiter.error(CATEGORY_RESOLVE, e.message());
            }
        }
        result
    }

    async fn fetch_stream(
        &self,
        reporter: &mut StageReporter<'_>,
        stage: Stage,
        stream: &StreamInfo,
        dest: PathBuf,
        what: &'static str,
        token: &CancelToken,
    ) -> Result<Downloaded, DownloadError> {
        token.check()?;
        reporter.enter(stage).await;
        self.limiter.acquire(CATEGORY_DOWNLOAD).await;

        let (tx, mut rx) = mpsc::unbounded_channel::<(u64, Option<u64>)>();
        let url = stream.url.clone();
        let path = dest.clone();
        let opts = self.settings.fetch;
        let blocking_token = token.clone();
        let handle = tokio::task::spawn_blocking(move || {
            fetch_to_file(&url, &path, what, &blocking_token, &opts, &mut |done, total| {
                let _ = tx.send((done, total));
            })
        });
        while let Some((done, total)) = rx.recv().await {
            reporter
                .bytes(stage, done, total.or(stream.filesize))
                .await;
        }
        let result = handle.await.map_err(join_error)?;
        match &result {
            Ok(_) => self.limiter.success(CATEGORY_DOWNLOAD),
            Err(DownloadError::Cancelled) => {}
            Err(e) => {
                self.limiter.error(CATEGORY_DOWNLOAD, e.message());
            }
        }
        result?;
        Ok(Downloaded {
            path: dest,
            ext: stream.ext.clone(),
        })
    }

    async fn merge(
        &self,
        reporter: &mut StageReporter<'_>,
        video: &Downloaded,
        audio: &Downloaded,
        output: PathBuf,
        duration: Option<f64>,
        token: &CancelToken,
    ) -> Result<PathBuf, DownloadError> {
        token.check()?;
        reporter.enter(Stage::Merging).await;

        let (tx, mut rx) = mpsc::unbounded_channel::<f64>();
        let muxer = Arc::clone(&self.muxer);
        let (v, a, out) = (video.path.clone(), audio.path.clone(), output.clone());
        let blocking_token = token.clone();
        let handle = tokio::task::spawn_blocking(move || {
            muxer.merge(&v, &a, &out, duration, &blocking_token, &mut |f| {
                let _ = tx.send(f);
            })
        });
        while let Some(local) = rx.recv().await {
            let label = match duration {
                Some(d) => format!(
                    "{} ({:.0}%, {:.0}s)",
                    Stage::Merging.label(),
                    local * 100.0,
                    d
                ),
                None => Stage::Merging.label().to_string(),
            };
            reporter.local(Stage::Merging, local, label).await;
        }
        handle.await.map_err(join_error)??;
        Ok(output)
    }

    /// Resolve, select, download, merge and finalize. Returns the ready artifact.
    async fn execute(
        &self,
        id: JobId,
        payload: &DownloadPayload,
        token: &CancelToken,
    ) -> Result<Artifact, DownloadError> {
        let mut reporter = StageReporter::new(&self.coordinator, id, &payload.content_id);

        reporter.enter(Stage::Resolving).await;
        let media = self.resolve(&payload.source_url).await?;
        token.check()?;
        if !media.title.is_empty() {
            if let Err(e) = self.coordinator.ledger().update_title(id, &media.title).await {
                tracing::warn!(job_id = id, "failed to update title: {:#}", e);
            }
        }

        let selection = select_streams(&media, &payload.options)?;
        reporter.set_shape(selection.shape);
        tracing::info!(
            job_id = id,
            content_id = %payload.content_id,
            shape = ?selection.shape,
            stream = %selection.primary.id,
            audio = selection.audio.as_ref().map(|a| a.id.as_str()),
            "streams selected"
        );

        let work = WorkDir::create(&self.settings.media_dir, id)?;
        let (first_stage, what) = match selection.shape {
            PipelineShape::AudioOnly => (Stage::DownloadingAudio, "audio stream"),
            _ => (Stage::DownloadingVideo, "video stream"),
        };
        let primary = self
            .fetch_stream(
                &mut reporter,
                first_stage,
                &selection.primary,
                work.file(&format!("primary.{}", selection.primary.ext)),
                what,
                token,
            )
            .await?;

        let final_file = match &selection.audio {
            Some(audio_stream) => {
                let audio = self
                    .fetch_stream(
                        &mut reporter,
                        Stage::DownloadingAudio,
                        audio_stream,
                        work.file(&format!("audio.{}", audio_stream.ext)),
                        "audio stream",
                        token,
                    )
                    .await?;
                let ext = payload.options.format.clone();
                let merged = self
                    .merge(
                        &mut reporter,
                        &primary,
                        &audio,
                        work.file(&format!("merged.{}", ext)),
                        media.duration_secs,
                        token,
                    )
                    .await?;
                Downloaded { path: merged, ext }
            }
            None => primary,
        };

        token.check()?;
        reporter.enter(Stage::Finalizing).await;
        let artifact = self
            .finalize(id, payload, &media, &selection, &final_file, &work, token)
            .await?;
        tracing::info!(
            job_id = id,
            content_id = %artifact.content_id,
            progress = reporter.fraction(),
            "download ready"
        );
        Ok(artifact)
    }
}
