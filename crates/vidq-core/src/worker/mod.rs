//! Download queue worker.
//!
//! One loop claims queued download jobs in priority order and hands each to the
//! pipeline on its own task, bounded by a semaphore. The loop holds off while the
//! queue is paused or a blocking job is active, waits out the global cooldown
//! before every claim, and beats a heartbeat the watchdog checks.

mod cooldown;
mod retention;
mod watchdog;

pub use cooldown::{CooldownState, Escalation, GlobalCooldown};
pub use retention::{retention_loop, RetentionSettings};
pub use watchdog::{restart_delay, supervise, Heartbeat, WatchdogSettings};

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

use crate::config::VidqConfig;
use crate::coordinator::Coordinator;
use crate::ledger::{unix_timestamp, Job, JobId, JobKind};
use crate::pipeline::{DownloadPipeline, JobOutcome};
use crate::progress::ProgressEvent;

/// Countdown events are sent at most this often.
const COOLDOWN_TICK: Duration = Duration::from_secs(5);
/// Bounded wait per slot-acquire attempt so the heartbeat keeps moving.
const SLOT_WAIT: Duration = Duration::from_secs(1);
/// Pause reason recorded when the cooldown hits its ceiling.
pub const RATE_LIMIT_PAUSE_REASON: &str = "rate_limit";

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub idle_poll: Duration,
    pub paused_poll: Duration,
    pub error_backoff: Duration,
    pub max_concurrent: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&VidqConfig::default())
    }
}

impl WorkerSettings {
    pub fn from_config(cfg: &VidqConfig) -> Self {
        Self {
            idle_poll: Duration::from_millis(cfg.worker.idle_poll_ms),
            paused_poll: Duration::from_millis(cfg.worker.paused_poll_ms),
            error_backoff: Duration::from_millis(cfg.worker.error_backoff_ms),
            max_concurrent: cfg.max_concurrent_downloads.max(1),
        }
    }
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// Nothing queued.
    Idle,
    /// Paused, blocked, or the candidate went away during the cooldown.
    Waiting,
    Dispatched(JobId),
}

pub struct QueueWorker {
    coordinator: Arc<Coordinator>,
    pipeline: Arc<DownloadPipeline>,
    cooldown: Arc<GlobalCooldown>,
    slots: Arc<Semaphore>,
    settings: WorkerSettings,
    heartbeat: Heartbeat,
}

impl QueueWorker {
    pub fn new(
        pipeline: Arc<DownloadPipeline>,
        cooldown: Arc<GlobalCooldown>,
        settings: WorkerSettings,
        heartbeat: Heartbeat,
    ) -> Self {
        Self {
            coordinator: Arc::clone(pipeline.coordinator()),
            pipeline,
            cooldown,
            slots: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            settings,
            heartbeat,
        }
    }

    pub fn cooldown(&self) -> &Arc<GlobalCooldown> {
        &self.cooldown
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Number of pipeline runs currently holding a slot.
    pub fn running(&self) -> usize {
        self.settings
            .max_concurrent
            .max(1)
            .saturating_sub(self.slots.available_permits())
    }

    /// Main loop. Only returns if the runtime tears it down.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        tracing::info!(
            max_concurrent = self.settings.max_concurrent,
            "download worker started"
        );
        loop {
            self.heartbeat.beat();
            match self.tick().await {
                Ok(Tick::Dispatched(_)) => {}
                Ok(Tick::Idle) => tokio::time::sleep(self.settings.idle_poll).await,
                Ok(Tick::Waiting) => tokio::time::sleep(self.settings.paused_poll).await,
                Err(e) => {
                    tracing::warn!("download worker iteration failed: {:#}", e);
                    tokio::time::sleep(self.settings.error_backoff).await;
                }
            }
        }
    }

    /// True while the worker must not claim: queue paused or a blocking job active.
    async fn held_off(&self) -> Result<bool> {
        let ledger = self.coordinator.ledger();
        if ledger.load_pause_state().await?.paused {
            return Ok(true);
        }
        ledger.has_active_blocking().await
    }

    pub(crate) async fn tick(self: &Arc<Self>) -> Result<Tick> {
        let ledger = self.coordinator.ledger();
        let promoted = ledger.promote_due_retries(unix_timestamp()).await?;
        if promoted > 0 {
            tracing::info!(count = promoted, "retry_wait jobs back in queue");
        }

        if self.held_off().await? {
            return Ok(Tick::Waiting);
        }
        let Some(job) = ledger.next_queued(JobKind::Download).await? else {
            return Ok(Tick::Idle);
        };

        if !self.count_down(&job).await? {
            return Ok(Tick::Waiting);
        }
        if self.held_off().await? {
            tracing::debug!(job_id = job.id, "queue held off after cooldown");
            return Ok(Tick::Waiting);
        }

        let permit = self.acquire_slot().await?;
        // all slots may have been busy for a while; pause and blocking jobs win
        if self.held_off().await? {
            tracing::debug!(job_id = job.id, "queue held off while waiting for a slot");
            return Ok(Tick::Waiting);
        }
        let Some(job) = ledger.next_queued(JobKind::Download).await? else {
            return Ok(Tick::Idle);
        };

        let id = job.id;
        let (started_tx, started_rx) = oneshot::channel();
        let worker = Arc::clone(self);
        tokio::spawn(worker.dispatch(id, permit, started_tx));
        match started_rx.await {
            Ok(Ok(true)) => Ok(Tick::Dispatched(id)),
            Ok(Ok(false)) => Ok(Tick::Waiting),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!("dispatch of job {} ended before start", id)),
        }
    }

    /// Start `id` and run it to completion on this task, reporting the start through
    /// `started`. The row only turns active here so the loop can be torn down at any
    /// await point without stranding it.
    async fn dispatch(
        self: Arc<Self>,
        id: JobId,
        permit: OwnedSemaphorePermit,
        started: oneshot::Sender<Result<bool>>,
    ) {
        let token = match self.coordinator.start(id, false).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                let _ = started.send(Ok(false));
                return;
            }
            Err(e) => {
                let _ = started.send(Err(e));
                return;
            }
        };
        let job = match self.coordinator.ledger().get_job(id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                let _ = self.coordinator.fail(id, "job row vanished after start").await;
                let _ = started.send(Ok(false));
                return;
            }
            Err(e) => {
                if let Err(fail_err) = self.coordinator.fail(id, &format!("{:#}", e)).await {
                    tracing::error!(job_id = id, "failed to settle job: {:#}", fail_err);
                }
                let _ = started.send(Err(e));
                return;
            }
        };

        tracing::info!(job_id = id, title = %job.title, "download dispatched");
        let _ = started.send(Ok(true));
        let outcome = self.pipeline.run(&job, token).await;
        drop(permit);
        self.after_job(id, outcome).await;
    }

    /// Wait out the current cooldown while `job` stays queued.
    /// Returns false if the queue got paused meanwhile.
    async fn count_down(&self, job: &Job) -> Result<bool> {
        let total = self.cooldown.current();
        if total.is_zero() {
            return Ok(true);
        }
        tracing::info!(job_id = job.id, seconds = total.as_secs(), "cooldown before next download");
        self.cooldown.begin_countdown(total);
        let events = self.coordinator.events();
        let deadline = tokio::time::Instant::now() + total;
        let result = loop {
            let remaining =
                deadline.saturating_duration_since(tokio::time::Instant::now());
            events.emit(ProgressEvent::Cooldown {
                seconds: total.as_secs(),
                remaining: remaining.as_secs(),
            });
            if remaining.is_zero() {
                break Ok(true);
            }
            tokio::time::sleep(remaining.min(COOLDOWN_TICK)).await;
            self.heartbeat.beat();
            match self.coordinator.ledger().load_pause_state().await {
                Ok(p) if p.paused => {
                    tracing::info!(job_id = job.id, "queue paused during cooldown");
                    break Ok(false);
                }
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };
        self.cooldown.end_countdown();
        result
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        loop {
            let attempt =
                tokio::time::timeout(SLOT_WAIT, Arc::clone(&self.slots).acquire_owned()).await;
            self.heartbeat.beat();
            match attempt {
                Ok(permit) => {
                    return permit.map_err(|_| anyhow::anyhow!("download slots closed"));
                }
                Err(_) => continue,
            }
        }
    }

    /// Feed the outcome into the global cooldown; pause the queue at its ceiling.
    async fn after_job(&self, id: JobId, outcome: JobOutcome) {
        tracing::info!(job_id = id, status = %outcome.status(), "download finished");
        match outcome {
            JobOutcome::Done => self.cooldown.on_success(),
            JobOutcome::Retry { delay } => {
                tracing::info!(job_id = id, retry_in_secs = delay.as_secs(), "download will retry");
                if self.cooldown.on_retry() == Escalation::PauseQueue {
                    tracing::warn!("cooldown ceiling reached, pausing queue");
                    if let Err(e) = self
                        .coordinator
                        .pause_queue(Some(RATE_LIMIT_PAUSE_REASON))
                        .await
                    {
                        tracing::error!("failed to pause queue: {:#}", e);
                    }
                }
            }
            JobOutcome::Parked | JobOutcome::Failed | JobOutcome::Cancelled => {}
        }
    }
}
