//! Global inter-job cooldown.
//!
//! The worker waits `current` before starting each download. Every retried
//! (throttled or temporary) failure doubles it; reaching the ceiling asks for a
//! queue pause and resets it to base. A successful download relaxes it to base.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CooldownConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Raised(Duration),
    /// Ceiling reached: the queue must be paused until an operator resumes it.
    PauseQueue,
}

/// Snapshot for status output and cooldown events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CooldownState {
    pub cooldown_secs: u64,
    pub base_secs: u64,
    pub remaining_secs: u64,
    pub active: bool,
}

struct Inner {
    current: Duration,
    until: Option<Instant>,
}

pub struct GlobalCooldown {
    base: Duration,
    max: Duration,
    inner: Mutex<Inner>,
}

impl Default for GlobalCooldown {
    fn default() -> Self {
        Self::new(&CooldownConfig::default())
    }
}

impl GlobalCooldown {
    pub fn new(cfg: &CooldownConfig) -> Self {
        let base = Duration::from_secs(cfg.base_secs);
        Self {
            base,
            max: Duration::from_secs(cfg.max_secs).max(base),
            inner: Mutex::new(Inner {
                current: base,
                until: None,
            }),
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait applied before the next job starts.
    pub fn current(&self) -> Duration {
        self.inner().current
    }

    pub fn on_success(&self) {
        let mut inner = self.inner();
        if inner.current > self.base {
            tracing::info!(
                from_secs = inner.current.as_secs(),
                to_secs = self.base.as_secs(),
                "download ok, cooldown relaxed"
            );
        }
        inner.current = self.base;
    }

    pub fn on_retry(&self) -> Escalation {
        let mut inner = self.inner();
        let doubled = if inner.current.is_zero() {
            Duration::from_secs(1)
        } else {
            inner.current.saturating_mul(2)
        };
        let next = doubled.min(self.max);
        tracing::warn!(
            from_secs = inner.current.as_secs(),
            to_secs = next.as_secs(),
            "retryable failure, cooldown raised"
        );
        if next >= self.max {
            inner.current = self.base;
            Escalation::PauseQueue
        } else {
            inner.current = next;
            Escalation::Raised(next)
        }
    }

    pub(crate) fn begin_countdown(&self, total: Duration) {
        self.inner().until = Some(Instant::now() + total);
    }

    pub(crate) fn end_countdown(&self) {
        self.inner().until = None;
    }

    pub fn snapshot(&self) -> CooldownState {
        let inner = self.inner();
        let remaining = inner
            .until
            .map(|u| u.saturating_duration_since(Instant::now()))
            .unwrap_or_default();
        CooldownState {
            cooldown_secs: inner.current.as_secs(),
            base_secs: self.base.as_secs(),
            remaining_secs: remaining.as_secs(),
            active: inner.until.is_some(),
        }
    }
}
