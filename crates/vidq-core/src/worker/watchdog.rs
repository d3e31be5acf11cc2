//! Liveness supervision for long-running loops.
//!
//! The supervised loop beats a `Heartbeat` on every iteration. The watchdog
//! restarts it when the task ends (error, panic or early return) or when the
//! heartbeat goes stale, with exponential backoff between restarts.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::WorkerConfig;

const RESTART_BASE: Duration = Duration::from_secs(5);
const RESTART_MAX: Duration = Duration::from_secs(120);
/// A loop that stayed up this long starts its backoff from scratch.
const HEALTHY_RUN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct Heartbeat(Arc<Mutex<Instant>>);

impl Default for Heartbeat {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beat(&self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn age(&self) -> Duration {
        let last = *self.0.lock().unwrap_or_else(|e| e.into_inner());
        Instant::now().saturating_duration_since(last)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogSettings {
    pub interval: Duration,
    pub stale_after: Duration,
}

impl WatchdogSettings {
    pub fn from_config(cfg: &WorkerConfig) -> Self {
        let interval = Duration::from_secs(cfg.watchdog_interval_secs.max(1));
        Self {
            interval,
            stale_after: interval * 10,
        }
    }
}

/// Delay before restart number `n` (1-based): 5s doubling, capped at 2 minutes.
pub fn restart_delay(n: u32) -> Duration {
    let exp = n.saturating_sub(1).min(16);
    RESTART_BASE.saturating_mul(1 << exp).min(RESTART_MAX)
}

/// Run `make_loop()` forever, restarting it when it dies or stops beating.
pub async fn supervise<F, Fut>(
    name: &'static str,
    heartbeat: Heartbeat,
    settings: WatchdogSettings,
    mut make_loop: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut restarts = 0u32;
    loop {
        heartbeat.beat();
        let started = Instant::now();
        let mut handle = tokio::spawn(make_loop());
        loop {
            tokio::select! {
                res = &mut handle => {
                    match res {
                        Ok(Ok(())) => tracing::warn!(task = name, "loop exited"),
                        Ok(Err(e)) => tracing::error!(task = name, "loop failed: {:#}", e),
                        Err(e) if e.is_panic() => tracing::error!(task = name, "loop panicked"),
                        Err(_) => tracing::warn!(task = name, "loop aborted"),
                    }
                    break;
                }
                _ = tokio::time::sleep(settings.interval) => {
                    let age = heartbeat.age();
                    if age > settings.stale_after {
                        tracing::error!(task = name, stale_secs = age.as_secs(), "loop stalled, restarting");
                        handle.abort();
                        break;
                    }
                }
            }
        }

        if started.elapsed() >= HEALTHY_RUN {
            restarts = 0;
        }
        restarts = restarts.saturating_add(1);
        let delay = restart_delay(restarts);
        tracing::warn!(task = name, restarts, delay_secs = delay.as_secs(), "restarting loop");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn restart_backoff_doubles_and_caps() {
        let secs: Vec<u64> = (1..=7).map(|n| restart_delay(n).as_secs()).collect();
        assert_eq!(secs, vec![5, 10, 20, 40, 80, 120, 120]);
        assert_eq!(restart_delay(100), RESTART_MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_loop_is_restarted() {
        let starts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&starts);
        let hb = Heartbeat::new();
        let settings = WatchdogSettings {
            interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(60),
        };
        let sup = tokio::spawn(supervise("test", hb, settings, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("boom {}", n);
                }
                std::future::pending::<()>().await;
                Ok::<(), anyhow::Error>(())
            }
        }));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 3);
        sup.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stale_heartbeat_triggers_restart() {
        let starts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&starts);
        let hb = Heartbeat::new();
        let settings = WatchdogSettings {
            interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(3),
        };
        let sup = tokio::spawn(supervise("test", hb, settings, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                std::future::pending::<()>().await;
                Ok::<(), anyhow::Error>(())
            }
        }));
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(starts.load(Ordering::SeqCst) >= 2);
        sup.abort();
    }
}
