//! `vidq run` – run the download worker until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use vidq_core::config::VidqConfig;
use vidq_core::coordinator::Coordinator;
use vidq_core::limiter::RateLimiter;
use vidq_core::pipeline::{DownloadPipeline, FfmpegMuxer, PipelineSettings, YtDlpResolver};
use vidq_core::progress::ProgressEvent;
use vidq_core::worker::{
    retention_loop, supervise, GlobalCooldown, Heartbeat, QueueWorker, RetentionSettings,
    WatchdogSettings, WorkerSettings,
};

use crate::cli::control_socket;

/// How long running downloads get to settle after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn describe(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::Job(u) => Some(match &u.stage_label {
            Some(label) => format!(
                "  job {:<5} {:>3.0}%  {}",
                u.job_id,
                u.progress * 100.0,
                label
            ),
            None => format!("  job {:<5} {}", u.job_id, u.status),
        }),
        ProgressEvent::QueuePaused { reason } => Some(format!(
            "Queue paused ({})",
            reason.as_deref().unwrap_or("no reason given")
        )),
        ProgressEvent::QueueResumed => Some("Queue resumed".to_string()),
        ProgressEvent::Cooldown { seconds, remaining } if *remaining > 0 => {
            Some(format!("  cooldown {remaining}s of {seconds}s"))
        }
        ProgressEvent::Cooldown { .. } => None,
        ProgressEvent::JobsCleared { count } => Some(format!("Removed {count} finished job(s)")),
    }
}

pub async fn run_worker(
    coordinator: Arc<Coordinator>,
    cfg: &VidqConfig,
    concurrency: Option<usize>,
) -> Result<()> {
    let recovery = coordinator.recover_after_restart().await?;
    if recovery.interrupted > 0 {
        println!("Marked {} interrupted job(s) as failed", recovery.interrupted);
    }
    if recovery.paused {
        println!(
            "Queue is paused ({}); run `vidq resume-queue` to continue",
            recovery.pause_reason.as_deref().unwrap_or("no reason given")
        );
    }

    let limiter = Arc::new(RateLimiter::new(&cfg.limiter));
    let pipeline = Arc::new(DownloadPipeline::new(
        Arc::clone(&coordinator),
        limiter,
        Arc::new(YtDlpResolver::new(&cfg.resolver_path)),
        Arc::new(FfmpegMuxer::new(&cfg.ffmpeg_path)),
        PipelineSettings::from_config(cfg)?,
    ));
    let mut settings = WorkerSettings::from_config(cfg);
    if let Some(n) = concurrency {
        settings.max_concurrent = n.max(1);
    }
    let heartbeat = Heartbeat::new();
    let worker = Arc::new(QueueWorker::new(
        pipeline,
        Arc::new(GlobalCooldown::new(&cfg.cooldown)),
        settings,
        heartbeat.clone(),
    ));

    let socket_path = vidq_core::control::default_control_socket_path().ok();
    let listener = match &socket_path {
        Some(path) => match control_socket::spawn_control_listener(Arc::clone(&coordinator), path)
        {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket bind: {:#}", e);
                None
            }
        },
        None => None,
    };

    let mut events = coordinator.events().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = describe(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "progress printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let retention = tokio::spawn(retention_loop(
        Arc::clone(&coordinator),
        RetentionSettings::from_config(&cfg.retention),
    ));

    let supervised = Arc::clone(&worker);
    let supervisor = tokio::spawn(supervise(
        "download-worker",
        heartbeat,
        WatchdogSettings::from_config(&cfg.worker),
        move || Arc::clone(&supervised).run(),
    ));

    println!(
        "Worker running ({} concurrent). Ctrl-C to stop.",
        settings.max_concurrent
    );
    tokio::signal::ctrl_c().await?;
    println!("Stopping...");

    supervisor.abort();
    retention.abort();
    if let Some(handle) = listener {
        handle.abort();
    }
    let interrupted = coordinator.interrupt_running().await?;
    if !interrupted.is_empty() {
        println!(
            "Interrupted {} running download(s); `vidq retry` requeues them",
            interrupted.len()
        );
    }
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while worker.running() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    if worker.running() > 0 {
        tracing::warn!(running = worker.running(), "shutting down with downloads still running");
    }
    printer.abort();
    if let Some(path) = socket_path {
        let _ = std::fs::remove_file(path);
    }
    Ok(())
}
