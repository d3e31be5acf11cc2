//! Integration tests: full pipeline runs against a local HTTP server.
//!
//! A fake resolver points the pipeline at streams served by `common::media_server`;
//! a fake muxer concatenates video and audio so the merged artifact can be checked.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::media_server::{self, Route};
use tempfile::tempdir;
use vidq_core::config::LimiterConfig;
use vidq_core::control::{CancelToken, JobControl};
use vidq_core::coordinator::{Coordinator, CoordinatorSettings};
use vidq_core::ledger::{Chapter, DownloadOptions, JobId, JobStatus, Ledger};
use vidq_core::limiter::RateLimiter;
use vidq_core::pipeline::{
    DownloadPipeline, JobOutcome, Muxer, PipelineSettings, ResolvedMedia, StreamInfo,
    StreamResolver,
};
use vidq_core::progress::{ProgressBroadcaster, ProgressEvent, Stage};
use vidq_core::retry::DownloadError;

const CONTENT_ID: &str = "dQw4w9WgXcQ";

struct FixedResolver(ResolvedMedia);

impl StreamResolver for FixedResolver {
    fn resolve(&self, _source_url: &str) -> Result<ResolvedMedia, DownloadError> {
        Ok(self.0.clone())
    }
}

/// Writes video bytes followed by audio bytes.
struct ConcatMuxer;

impl Muxer for ConcatMuxer {
    fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        _duration: Option<f64>,
        token: &CancelToken,
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), DownloadError> {
        token.check()?;
        let mut bytes = std::fs::read(video)?;
        on_progress(0.5);
        bytes.extend(std::fs::read(audio)?);
        std::fs::write(output, bytes)?;
        on_progress(1.0);
        Ok(())
    }
}

fn stream(
    id: &str,
    url: String,
    ext: &str,
    video: bool,
    audio: bool,
    height: Option<u32>,
) -> StreamInfo {
    StreamInfo {
        id: id.to_string(),
        url,
        ext: ext.to_string(),
        has_video: video,
        has_audio: audio,
        height,
        filesize: None,
        abr: audio.then_some(128.0),
    }
}

struct Setup {
    coordinator: Arc<Coordinator>,
    limiter: Arc<RateLimiter>,
    pipeline: DownloadPipeline,
    media_dir: tempfile::TempDir,
}

async fn setup(media: ResolvedMedia, max_retries: u32) -> Setup {
    let media_dir = tempdir().unwrap();
    let coordinator = Arc::new(Coordinator::new(
        Ledger::open_memory().await.unwrap(),
        ProgressBroadcaster::new(1024),
        Arc::new(JobControl::new()),
        CoordinatorSettings {
            max_retries,
            ..CoordinatorSettings::default()
        },
    ));
    let limiter = Arc::new(RateLimiter::new(&LimiterConfig {
        disabled: true,
        ..LimiterConfig::default()
    }));
    let pipeline = DownloadPipeline::new(
        Arc::clone(&coordinator),
        Arc::clone(&limiter),
        Arc::new(FixedResolver(media)),
        Arc::new(ConcatMuxer),
        PipelineSettings::new(media_dir.path()),
    );
    Setup {
        coordinator,
        limiter,
        pipeline,
        media_dir,
    }
}

async fn enqueue_and_run(s: &Setup, quality: &str) -> (JobId, JobOutcome) {
    let options = DownloadOptions {
        quality: quality.to_string(),
        ..DownloadOptions::default()
    };
    let id = s
        .coordinator
        .enqueue_download(CONTENT_ID, options, 0, false)
        .await
        .unwrap();
    let token = s.coordinator.start(id, false).await.unwrap().expect("job started");
    let job = s.coordinator.get(id).await.unwrap().unwrap();
    let outcome = s.pipeline.run(&job, token).await;
    (id, outcome)
}

/// Distinct stages in the order they were first reported, plus every progress value.
fn drain_stages(
    rx: &mut tokio::sync::broadcast::Receiver<ProgressEvent>,
    id: JobId,
) -> (Vec<Stage>, Vec<f64>) {
    let mut stages = Vec::new();
    let mut progress = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        if let ProgressEvent::Job(u) = ev {
            if u.job_id != id {
                continue;
            }
            if let Some(stage) = u.stage {
                if stages.last() != Some(&stage) {
                    stages.push(stage);
                }
                progress.push(u.progress);
            }
        }
    }
    (stages, progress)
}

fn assert_no_leftover_workdirs(media_dir: &Path) {
    let partial = media_dir.join(".partial");
    if partial.exists() {
        assert_eq!(std::fs::read_dir(&partial).unwrap().count(), 0);
    }
}

#[tokio::test]
async fn progressive_720p_skips_audio_and_merge() {
    let body: Vec<u8> = (0u8..200).cycle().take(48 * 1024).collect();
    let server = media_server::start(vec![
        ("/v720.mp4", Route::ok(body.clone())),
        ("/v1080.mp4", Route::ok(vec![1u8; 1024])),
        ("/a.m4a", Route::ok(vec![2u8; 512])),
    ]);
    let media = ResolvedMedia {
        content_id: CONTENT_ID.to_string(),
        title: "Progressive clip".to_string(),
        duration_secs: Some(12.0),
        streams: vec![
            stream("22", server.url("/v720.mp4"), "mp4", true, true, Some(720)),
            stream("137", server.url("/v1080.mp4"), "mp4", true, false, Some(1080)),
            stream("140", server.url("/a.m4a"), "m4a", false, true, None),
        ],
        ..ResolvedMedia::default()
    };
    let s = setup(media, 3).await;
    let mut rx = s.coordinator.events().subscribe();

    let (id, outcome) = enqueue_and_run(&s, "720p").await;
    assert_eq!(outcome, JobOutcome::Done);

    let (stages, progress) = drain_stages(&mut rx, id);
    assert_eq!(
        stages,
        vec![Stage::Resolving, Stage::DownloadingVideo, Stage::Finalizing]
    );
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    assert_eq!(server.hits("/v1080.mp4"), 0);
    assert_eq!(server.hits("/a.m4a"), 0);

    let job = s.coordinator.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.title, "Progressive clip");

    let artifact = s
        .coordinator
        .ledger()
        .get_artifact(CONTENT_ID)
        .await
        .unwrap()
        .expect("artifact recorded");
    assert_eq!(artifact.status, "ready");
    assert_eq!(artifact.height, Some(720));
    assert_eq!(artifact.audio_stream_id, None);
    let path = artifact.file_path.expect("artifact path");
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert_eq!(job.result.as_deref(), Some(path.as_str()));
    assert_no_leftover_workdirs(s.media_dir.path());
}

#[tokio::test]
async fn best_quality_runs_all_five_phases_and_stores_merged_file() {
    let video: Vec<u8> = vec![7u8; 40 * 1024];
    let audio: Vec<u8> = vec![9u8; 8 * 1024];
    let server = media_server::start(vec![
        ("/v360.mp4", Route::ok(vec![3u8; 1024])),
        ("/v1080.mp4", Route::ok(video.clone())),
        ("/a.m4a", Route::ok(audio.clone())),
        ("/a.webm", Route::ok(vec![4u8; 256])),
        ("/thumb.jpg", Route::ok(b"jpeg".to_vec())),
    ]);
    let media = ResolvedMedia {
        content_id: CONTENT_ID.to_string(),
        title: "Adaptive clip".to_string(),
        duration_secs: Some(30.0),
        thumbnail_url: Some(server.url("/thumb.jpg")),
        streams: vec![
            stream("18", server.url("/v360.mp4"), "mp4", true, true, Some(360)),
            stream("137", server.url("/v1080.mp4"), "mp4", true, false, Some(1080)),
            stream("140", server.url("/a.m4a"), "m4a", false, true, None),
            stream("251", server.url("/a.webm"), "webm", false, true, None),
        ],
        chapters: vec![
            Chapter {
                title: "Intro".to_string(),
                start_secs: 0.0,
                end_secs: Some(10.0),
            },
            Chapter {
                title: "Main".to_string(),
                start_secs: 10.0,
                end_secs: Some(30.0),
            },
        ],
        ..ResolvedMedia::default()
    };
    let s = setup(media, 3).await;
    let mut rx = s.coordinator.events().subscribe();

    let (id, outcome) = enqueue_and_run(&s, "best").await;
    assert_eq!(outcome, JobOutcome::Done);

    let (stages, progress) = drain_stages(&mut rx, id);
    assert_eq!(
        stages,
        vec![
            Stage::Resolving,
            Stage::DownloadingVideo,
            Stage::DownloadingAudio,
            Stage::Merging,
            Stage::Finalizing,
        ]
    );
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    assert_eq!(server.hits("/v360.mp4"), 0);
    assert_eq!(server.hits("/a.webm"), 0);

    let artifact = s
        .coordinator
        .ledger()
        .get_artifact(CONTENT_ID)
        .await
        .unwrap()
        .expect("artifact recorded");
    assert_eq!(artifact.video_stream_id.as_deref(), Some("137"));
    assert_eq!(artifact.audio_stream_id.as_deref(), Some("140"));
    assert_eq!(artifact.format.as_deref(), Some("mp4"));
    let mut expected = video;
    expected.extend(audio);
    let path = artifact.file_path.expect("artifact path");
    assert_eq!(std::fs::read(&path).unwrap(), expected);
    assert_eq!(artifact.file_size, Some(expected.len() as i64));

    let thumb = artifact.thumbnail_path.expect("thumbnail stored");
    assert_eq!(std::fs::read(thumb).unwrap(), b"jpeg");

    let chapters = s.coordinator.ledger().list_chapters(CONTENT_ID).await.unwrap();
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[1].title, "Main");
    assert_no_leftover_workdirs(s.media_dir.path());
}

#[tokio::test]
async fn throttled_transfer_waits_for_retry_and_backs_off_category() {
    let server = media_server::start(vec![("/v720.mp4", Route::status(429))]);
    let media = ResolvedMedia {
        content_id: CONTENT_ID.to_string(),
        title: "Throttled".to_string(),
        streams: vec![stream("22", server.url("/v720.mp4"), "mp4", true, true, Some(720))],
        ..ResolvedMedia::default()
    };
    let s = setup(media, 3).await;
    let floor = s.limiter.interval("download");

    let (id, outcome) = enqueue_and_run(&s, "720p").await;
    assert_eq!(
        outcome,
        JobOutcome::Retry {
            delay: Duration::from_secs(120)
        }
    );

    let job = s.coordinator.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::RetryWait);
    let payload = job.download_payload().unwrap();
    assert_eq!(payload.retry_count, 1);
    assert!(payload.retry_after.is_some());
    assert!(job.error_message.unwrap().contains("429"));
    assert!(s.limiter.interval("download") > floor);
    assert!(s
        .coordinator
        .ledger()
        .get_artifact(CONTENT_ID)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn exhausted_retries_park_instead_of_erroring() {
    let server = media_server::start(vec![("/v720.mp4", Route::status(503))]);
    let media = ResolvedMedia {
        content_id: CONTENT_ID.to_string(),
        title: "Flaky".to_string(),
        streams: vec![stream("22", server.url("/v720.mp4"), "mp4", true, true, Some(720))],
        ..ResolvedMedia::default()
    };
    let s = setup(media, 0).await;

    let (id, outcome) = enqueue_and_run(&s, "720p").await;
    assert_eq!(outcome, JobOutcome::Parked);

    let job = s.coordinator.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Parked);
    assert!(job.error_message.unwrap().contains("retries exhausted"));
}

#[tokio::test]
async fn cancelled_job_ends_cancelled_without_artifact() {
    let server = media_server::start(vec![("/v720.mp4", Route::ok(vec![0u8; 1024]))]);
    let media = ResolvedMedia {
        content_id: CONTENT_ID.to_string(),
        title: "Cancelled".to_string(),
        streams: vec![stream("22", server.url("/v720.mp4"), "mp4", true, true, Some(720))],
        ..ResolvedMedia::default()
    };
    let s = setup(media, 3).await;
    let id = s
        .coordinator
        .enqueue_download(CONTENT_ID, DownloadOptions::default(), 0, false)
        .await
        .unwrap();
    let token = s.coordinator.start(id, false).await.unwrap().unwrap();
    assert!(s.coordinator.control().request_cancel(id));
    let job = s.coordinator.get(id).await.unwrap().unwrap();

    assert_eq!(s.pipeline.run(&job, token).await, JobOutcome::Cancelled);
    assert_eq!(
        s.coordinator.get(id).await.unwrap().unwrap().status,
        JobStatus::Cancelled
    );
    assert_eq!(server.hits("/v720.mp4"), 0);
    assert!(s
        .coordinator
        .ledger()
        .get_artifact(CONTENT_ID)
        .await
        .unwrap()
        .is_none());
}
