//! Tests for the ledger (in-memory DB).

use proptest::prelude::*;
use serde_json::json;

use super::{
    Artifact, Chapter, DownloadPayload, JobKind, JobPayload, JobStatus, Ledger, Metadata,
    NewJob, PauseState, ARTIFACT_READY,
};

fn download_job(content_id: &str) -> NewJob {
    let payload = DownloadPayload::new(content_id, format!("https://example.com/{content_id}"));
    NewJob::new(JobKind::Download, content_id).with_metadata(payload.to_metadata())
}

async fn status_of(db: &Ledger, id: i64) -> JobStatus {
    db.get_job(id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn insert_and_get_roundtrip() {
    let db = Ledger::open_memory().await.unwrap();
    let id = db
        .insert_job(&download_job("abc").with_priority(5).with_description("queued"))
        .await
        .unwrap();
    let job = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.kind, JobKind::Download);
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.priority, 5);
    assert_eq!(job.content_id(), Some("abc"));
    match job.payload().unwrap() {
        JobPayload::Download(p) => {
            assert_eq!(p.retry_count, 0);
            assert_eq!(p.max_retries, 3);
            assert_eq!(p.options.quality, "best");
        }
        other => panic!("expected download payload, got {other:?}"),
    }
    assert!(db.get_job(id + 100).await.unwrap().is_none());
}

#[tokio::test]
async fn download_metadata_is_validated_on_read() {
    let db = Ledger::open_memory().await.unwrap();
    let mut meta = Metadata::new();
    meta.insert("source_url".into(), json!("https://example.com/x"));
    let id = db
        .insert_job(&NewJob::new(JobKind::Download, "broken").with_metadata(meta))
        .await
        .unwrap();
    let job = db.get_job(id).await.unwrap().unwrap();
    assert!(job.payload().is_err(), "content_id is required");

    let id = db
        .insert_job(&NewJob::new(JobKind::FeedCycle, "feed"))
        .await
        .unwrap();
    let job = db.get_job(id).await.unwrap().unwrap();
    assert!(matches!(job.payload().unwrap(), JobPayload::Generic(_)));
}

#[tokio::test]
async fn complete_is_idempotent_and_done_is_never_left() {
    let db = Ledger::open_memory().await.unwrap();
    let id = db.insert_job(&download_job("a")).await.unwrap();
    assert!(!db.complete_job(id, None).await.unwrap(), "queued cannot complete");
    assert!(db.mark_active(id).await.unwrap());
    assert!(!db.mark_active(id).await.unwrap());
    assert!(db.complete_job(id, Some("ok")).await.unwrap());
    assert!(!db.complete_job(id, Some("again")).await.unwrap());
    assert!(!db.cancel_job(id).await.unwrap());
    assert!(!db
        .requeue_job(id, &JobStatus::ALL)
        .await
        .unwrap());
    let job = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.result.as_deref(), Some("ok"));
    assert_eq!(job.progress, 1.0);
}

#[tokio::test]
async fn next_queued_orders_by_priority_then_age() {
    let db = Ledger::open_memory().await.unwrap();
    let low = db.insert_job(&download_job("low")).await.unwrap();
    let high = db
        .insert_job(&download_job("high").with_priority(10))
        .await
        .unwrap();
    let low2 = db.insert_job(&download_job("low2")).await.unwrap();
    db.insert_job(&NewJob::new(JobKind::Import, "import").with_priority(99))
        .await
        .unwrap();

    let mut order = Vec::new();
    while let Some(job) = db.next_queued(JobKind::Download).await.unwrap() {
        assert!(db.mark_active(job.id).await.unwrap());
        order.push(job.id);
    }
    assert_eq!(order, vec![high, low, low2]);
}

#[tokio::test]
async fn retry_wait_promotes_only_when_due() {
    let db = Ledger::open_memory().await.unwrap();
    let id = db.insert_job(&download_job("r")).await.unwrap();
    db.mark_active(id).await.unwrap();
    assert!(db
        .schedule_retry(id, Some(1), 1_000, "HTTP Error 429: Too Many Requests")
        .await
        .unwrap());
    let job = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::RetryWait);
    let p = job.download_payload().unwrap();
    assert_eq!(p.retry_count, 1);
    assert_eq!(p.retry_after, Some(1_000));

    assert_eq!(db.promote_due_retries(999).await.unwrap(), 0);
    assert_eq!(db.promote_due_retries(1_000).await.unwrap(), 1);
    let job = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    let p = job.download_payload().unwrap();
    assert_eq!(p.retry_count, 1, "promotion keeps the counter");
    assert_eq!(p.retry_after, None);
}

#[tokio::test]
async fn schedule_retry_keeps_count_when_not_given() {
    let db = Ledger::open_memory().await.unwrap();
    let id = db.insert_job(&download_job("k")).await.unwrap();
    db.mark_active(id).await.unwrap();
    db.schedule_retry(id, Some(2), 10, "503").await.unwrap();
    db.promote_due_retries(10).await.unwrap();
    db.mark_active(id).await.unwrap();
    db.schedule_retry(id, None, 20, "manual delay").await.unwrap();
    let p = db.get_job(id).await.unwrap().unwrap().download_payload().unwrap();
    assert_eq!(p.retry_count, 2);
    assert_eq!(p.retry_after, Some(20));
}

#[tokio::test]
async fn delay_job_resets_failed_and_parked_downloads() {
    let db = Ledger::open_memory().await.unwrap();
    let failed = db.insert_job(&download_job("f")).await.unwrap();
    db.mark_active(failed).await.unwrap();
    db.schedule_retry(failed, Some(2), 10, "503").await.unwrap();
    db.promote_due_retries(10).await.unwrap();
    db.mark_active(failed).await.unwrap();
    db.finish_with_error(failed, JobStatus::Error, "boom").await.unwrap();

    let parked = db.insert_job(&download_job("pk")).await.unwrap();
    db.mark_active(parked).await.unwrap();
    db.finish_with_error(parked, JobStatus::Parked, "retries exhausted")
        .await
        .unwrap();

    for id in [failed, parked] {
        assert!(db.delay_job(id, 5_000).await.unwrap());
        let job = db.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::RetryWait);
        assert_eq!(job.error_message, None);
        assert_eq!(job.progress, 0.0);
        let p = job.download_payload().unwrap();
        assert_eq!(p.retry_count, 0);
        assert_eq!(p.retry_after, Some(5_000));
    }
}

#[tokio::test]
async fn delay_job_leaves_active_and_done_alone() {
    let db = Ledger::open_memory().await.unwrap();
    let active = db.insert_job(&download_job("act")).await.unwrap();
    db.mark_active(active).await.unwrap();
    assert!(!db.delay_job(active, 5_000).await.unwrap());
    assert_eq!(status_of(&db, active).await, JobStatus::Active);

    db.complete_job(active, None).await.unwrap();
    assert!(!db.delay_job(active, 5_000).await.unwrap());
    assert_eq!(status_of(&db, active).await, JobStatus::Done);

    let scan = db
        .insert_job(&NewJob::new(JobKind::ChannelScan, "scan"))
        .await
        .unwrap();
    assert!(!db.delay_job(scan, 5_000).await.unwrap(), "downloads only");
}

#[tokio::test]
async fn progress_merges_metadata_and_removes_nulls() {
    let db = Ledger::open_memory().await.unwrap();
    let id = db.insert_job(&download_job("p")).await.unwrap();
    let mut patch = Metadata::new();
    patch.insert("stage".into(), json!("resolving"));
    assert!(!db.update_progress(id, 0.1, None, &patch).await.unwrap(), "only active jobs");

    db.mark_active(id).await.unwrap();
    assert!(db
        .update_progress(id, 0.3, Some("Downloading video"), &patch)
        .await
        .unwrap());
    let mut patch = Metadata::new();
    patch.insert("stage".into(), serde_json::Value::Null);
    patch.insert("bytes_done".into(), json!(42));
    db.update_progress(id, 0.4, None, &patch).await.unwrap();

    let job = db.get_job(id).await.unwrap().unwrap();
    assert!((job.progress - 0.4).abs() < 1e-9);
    assert_eq!(job.description.as_deref(), Some("Downloading video"));
    assert!(job.metadata.get("stage").is_none());
    assert_eq!(job.metadata.get("bytes_done"), Some(&json!(42)));
    assert_eq!(job.content_id(), Some("p"));
}

#[tokio::test]
async fn sweep_interrupted_spares_resumable_kinds() {
    let db = Ledger::open_memory().await.unwrap();
    let dl = db.insert_job(&download_job("d")).await.unwrap();
    let avatar = db
        .insert_job(&NewJob::new(JobKind::AvatarFetch, "avatars"))
        .await
        .unwrap();
    let queued = db.insert_job(&download_job("q")).await.unwrap();
    db.mark_active(dl).await.unwrap();
    db.mark_active(avatar).await.unwrap();

    assert_eq!(db.sweep_interrupted().await.unwrap(), 1);
    let job = db.get_job(dl).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.error_message.as_deref(), Some("interrupted by restart"));
    assert_eq!(status_of(&db, avatar).await, JobStatus::Active);
    assert_eq!(status_of(&db, queued).await, JobStatus::Queued);
}

#[tokio::test]
async fn requeue_all_excludes_parked() {
    let db = Ledger::open_memory().await.unwrap();
    let failed = db.insert_job(&download_job("f")).await.unwrap();
    let parked = db.insert_job(&download_job("p")).await.unwrap();
    for id in [failed, parked] {
        db.mark_active(id).await.unwrap();
    }
    db.finish_with_error(failed, JobStatus::Error, "boom").await.unwrap();
    db.finish_with_error(parked, JobStatus::Parked, "Video unavailable")
        .await
        .unwrap();

    let n = db
        .requeue_all(
            JobKind::Download,
            &[JobStatus::Error, JobStatus::Cancelled, JobStatus::RetryWait],
        )
        .await
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(status_of(&db, failed).await, JobStatus::Queued);
    assert_eq!(status_of(&db, parked).await, JobStatus::Parked);

    assert!(db.requeue_job(parked, &[JobStatus::Parked]).await.unwrap());
    assert_eq!(status_of(&db, parked).await, JobStatus::Queued);
}

#[tokio::test]
async fn error_messages_are_truncated() {
    let db = Ledger::open_memory().await.unwrap();
    let id = db.insert_job(&download_job("t")).await.unwrap();
    db.mark_active(id).await.unwrap();
    let long = "é".repeat(2_000);
    db.finish_with_error(id, JobStatus::Error, &long).await.unwrap();
    let job = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(
        job.error_message.unwrap().chars().count(),
        super::MAX_ERROR_LEN
    );
}

#[tokio::test]
async fn delete_finished_by_age_and_all() {
    let db = Ledger::open_memory().await.unwrap();
    let done = db.insert_job(&download_job("done")).await.unwrap();
    let parked = db.insert_job(&download_job("parked")).await.unwrap();
    let queued = db.insert_job(&download_job("queued")).await.unwrap();
    db.mark_active(done).await.unwrap();
    db.complete_job(done, None).await.unwrap();
    db.mark_active(parked).await.unwrap();
    db.finish_with_error(parked, JobStatus::Parked, "removed").await.unwrap();

    assert_eq!(db.delete_finished(Some(0)).await.unwrap(), 0, "nothing that old");
    assert_eq!(db.delete_finished(Some(i64::MAX)).await.unwrap(), 1);
    assert!(db.get_job(parked).await.unwrap().is_some(), "age sweep keeps parked");
    assert_eq!(db.delete_finished(None).await.unwrap(), 1);
    assert!(db.get_job(queued).await.unwrap().is_some());
}

#[tokio::test]
async fn stats_and_pause_state_persist() {
    let db = Ledger::open_memory().await.unwrap();
    db.insert_job(&download_job("a")).await.unwrap();
    let b = db.insert_job(&download_job("b")).await.unwrap();
    db.mark_active(b).await.unwrap();

    db.save_pause_state(&PauseState {
        paused: true,
        reason: Some("rate_limit".into()),
    })
    .await
    .unwrap();
    let stats = db.job_stats().await.unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.total, 2);
    assert!(stats.paused);
    assert_eq!(stats.pause_reason.as_deref(), Some("rate_limit"));

    db.save_pause_state(&PauseState::default()).await.unwrap();
    assert_eq!(db.load_pause_state().await.unwrap(), PauseState::default());
}

#[tokio::test]
async fn find_open_download_and_blocking_detection() {
    let db = Ledger::open_memory().await.unwrap();
    let id = db.insert_job(&download_job("dup")).await.unwrap();
    assert_eq!(db.find_open_download("dup").await.unwrap(), Some(id));
    assert_eq!(db.find_open_download("other").await.unwrap(), None);

    assert!(!db.has_active_blocking().await.unwrap());
    let feed = db.insert_job(&NewJob::new(JobKind::FeedCycle, "feed")).await.unwrap();
    db.mark_active(feed).await.unwrap();
    assert!(!db.has_active_blocking().await.unwrap());
    let import = db.insert_job(&NewJob::new(JobKind::Import, "import")).await.unwrap();
    db.mark_active(import).await.unwrap();
    assert!(db.has_active_blocking().await.unwrap());
    assert_eq!(db.count_active_except(import).await.unwrap(), 1);
}

#[tokio::test]
async fn artifacts_chapters_roundtrip() {
    let db = Ledger::open_memory().await.unwrap();
    let artifact = Artifact {
        content_id: "abc".into(),
        title: "A video".into(),
        source_url: "https://example.com/abc".into(),
        status: ARTIFACT_READY.into(),
        file_path: Some("/media/abc.mp4".into()),
        file_size: Some(1024),
        format: Some("mp4".into()),
        height: Some(1080),
        duration_secs: Some(12.5),
        thumbnail_path: Some("/media/thumbnails/abc.jpg".into()),
        video_stream_id: Some("137".into()),
        audio_stream_id: Some("140".into()),
    };
    db.upsert_artifact(&artifact).await.unwrap();
    let reupload = Artifact {
        thumbnail_path: None,
        ..artifact.clone()
    };
    db.upsert_artifact(&reupload).await.unwrap();
    assert_eq!(db.get_artifact("abc").await.unwrap(), Some(artifact));

    let chapters = vec![
        Chapter {
            title: "Intro".into(),
            start_secs: 0.0,
            end_secs: Some(5.0),
        },
        Chapter {
            title: "Main".into(),
            start_secs: 5.0,
            end_secs: None,
        },
    ];
    db.replace_chapters("abc", &chapters).await.unwrap();
    db.replace_chapters("abc", &chapters[1..]).await.unwrap();
    assert_eq!(db.list_chapters("abc").await.unwrap(), chapters[1..].to_vec());
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Complete,
    Fail,
    Park,
    Cancel,
    Retry,
    Promote,
    RequeueFailed,
    ResumeParked,
    Delay,
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Start),
        Just(Op::Complete),
        Just(Op::Fail),
        Just(Op::Park),
        Just(Op::Cancel),
        Just(Op::Retry),
        Just(Op::Promote),
        Just(Op::RequeueFailed),
        Just(Op::ResumeParked),
        Just(Op::Delay),
        Just(Op::Sweep),
    ]
}

async fn apply(db: &Ledger, id: i64, op: Op) {
    match op {
        Op::Start => {
            db.mark_active(id).await.unwrap();
        }
        Op::Complete => {
            db.complete_job(id, None).await.unwrap();
        }
        Op::Fail => {
            db.finish_with_error(id, JobStatus::Error, "boom").await.unwrap();
        }
        Op::Park => {
            db.finish_with_error(id, JobStatus::Parked, "private video")
                .await
                .unwrap();
        }
        Op::Cancel => {
            db.cancel_job(id).await.unwrap();
        }
        Op::Retry => {
            db.schedule_retry(id, Some(1), 0, "429").await.unwrap();
        }
        Op::Promote => {
            db.promote_due_retries(i64::MAX).await.unwrap();
        }
        Op::RequeueFailed => {
            db.requeue_job(
                id,
                &[JobStatus::Error, JobStatus::Cancelled, JobStatus::RetryWait],
            )
            .await
            .unwrap();
        }
        Op::ResumeParked => {
            db.requeue_job(id, &[JobStatus::Parked]).await.unwrap();
        }
        Op::Delay => {
            db.delay_job(id, 0).await.unwrap();
        }
        Op::Sweep => {
            db.sweep_interrupted().await.unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn observed_transitions_follow_state_machine(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let db = Ledger::open_memory().await.unwrap();
            let id = db.insert_job(&download_job("prop")).await.unwrap();
            let mut prev = JobStatus::Queued;
            for op in ops {
                apply(&db, id, op).await;
                let cur = status_of(&db, id).await;
                assert!(
                    cur == prev || prev.can_transition_to(cur),
                    "{:?}: {} -> {} is not an edge",
                    op,
                    prev,
                    cur
                );
                prev = cur;
            }
        });
    }
}
