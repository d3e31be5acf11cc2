//! Per-category adaptive rate limiter.
//!
//! Each category (resolve, thumbnail, feed, ...) has a floor interval between
//! requests. A throttle-classified error doubles the interval up to a ceiling;
//! a success resets it. Unrelated errors only update statistics. State is
//! process-local and shared by every pipeline run in this process.

mod entry;

pub use entry::{CategoryEntry, CategoryStats};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::LimiterConfig;
use crate::retry::is_throttle_signal;

struct LimiterState {
    entries: HashMap<String, CategoryEntry>,
    defaults: HashMap<String, Duration>,
    default_interval: Duration,
    max_backoff: Duration,
    health_window: Duration,
    disabled: bool,
}

impl LimiterState {
    fn floor_for(&self, category: &str) -> Duration {
        self.defaults
            .get(category)
            .copied()
            .unwrap_or(self.default_interval)
    }

    fn entry_mut(&mut self, category: &str) -> &mut CategoryEntry {
        let floor = self.floor_for(category);
        self.entries
            .entry(category.to_string())
            .or_insert_with(|| CategoryEntry::new(floor))
    }
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(if s.is_finite() { s.max(0.0) } else { 0.0 })
}

pub struct RateLimiter {
    state: Mutex<LimiterState>,
    /// One async gate per category so concurrent acquirers are spaced out, not released together.
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&LimiterConfig::default())
    }
}

impl RateLimiter {
    pub fn new(cfg: &LimiterConfig) -> Self {
        let defaults = cfg
            .intervals
            .iter()
            .map(|(k, v)| (k.clone(), secs(*v)))
            .collect();
        Self {
            state: Mutex::new(LimiterState {
                entries: HashMap::new(),
                defaults,
                default_interval: secs(cfg.default_interval_secs),
                max_backoff: secs(cfg.max_backoff_secs),
                health_window: Duration::from_secs(cfg.health_window_secs),
                disabled: cfg.disabled,
            }),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn gate(&self, category: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(gates.entry(category.to_string()).or_default())
    }

    /// Wait until `category`'s interval has elapsed since its last request, then record a new one.
    pub async fn acquire(&self, category: &str) {
        if self.is_disabled() {
            return;
        }
        let gate = self.gate(category);
        let _pacing = gate.lock().await;

        let wait = self.state().entry_mut(category).wait_from(Instant::now());
        if !wait.is_zero() {
            tracing::debug!(category, wait_ms = wait.as_millis() as u64, "rate limiter pacing");
            tokio::time::sleep(wait).await;
        }

        let mut st = self.state();
        let entry = st.entry_mut(category);
        entry.last_request = Some(Instant::now());
        entry.requests = entry.requests.saturating_add(1);
    }

    /// Reset `category` to its floor interval.
    pub fn success(&self, category: &str) {
        let mut st = self.state();
        let entry = st.entry_mut(category);
        if entry.in_backoff() {
            tracing::info!(category, "rate limiter recovered");
        }
        entry.current_interval = entry.default_interval;
        entry.consecutive_blocks = 0;
        entry.successes = entry.successes.saturating_add(1);
    }

    /// Record a failure. Escalates only when `message` is a throttle signal; returns whether it did.
    pub fn error(&self, category: &str, message: &str) -> bool {
        let throttled = is_throttle_signal(message);
        let mut st = self.state();
        let max_backoff = st.max_backoff;
        let entry = st.entry_mut(category);
        entry.errors = entry.errors.saturating_add(1);
        if !throttled {
            return false;
        }
        entry.blocks = entry.blocks.saturating_add(1);
        entry.consecutive_blocks = entry.consecutive_blocks.saturating_add(1);
        entry.last_block_at = Some(Instant::now());
        entry.current_interval = entry.current_interval.saturating_mul(2).min(max_backoff);
        tracing::warn!(
            category,
            interval_secs = entry.current_interval.as_secs_f64(),
            consecutive = entry.consecutive_blocks,
            "throttle signal, backing off"
        );
        true
    }

    /// Manual override: reset one category (or all) to defaults.
    pub fn reset(&self, category: Option<&str>) {
        let mut st = self.state();
        let reset_entry = |e: &mut CategoryEntry| {
            e.current_interval = e.default_interval;
            e.consecutive_blocks = 0;
            e.last_block_at = None;
        };
        match category {
            Some(c) => reset_entry(st.entry_mut(c)),
            None => st.entries.values_mut().for_each(reset_entry),
        }
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.state().disabled = disabled;
    }

    pub fn is_disabled(&self) -> bool {
        self.state().disabled
    }

    /// Current interval for `category` (its floor if never used).
    pub fn interval(&self, category: &str) -> Duration {
        let st = self.state();
        st.entries
            .get(category)
            .map(|e| e.current_interval)
            .unwrap_or_else(|| st.floor_for(category))
    }

    /// True if no category saw a confirmed block within the health window.
    pub fn is_healthy(&self) -> bool {
        let st = self.state();
        let now = Instant::now();
        !st.entries.values().any(|e| {
            e.last_block_at
                .is_some_and(|t| now.saturating_duration_since(t) < st.health_window)
        })
    }

    /// Per-category statistics, sorted by category.
    pub fn stats(&self) -> Vec<CategoryStats> {
        let st = self.state();
        let now = Instant::now();
        let mut out: Vec<CategoryStats> = st
            .entries
            .iter()
            .map(|(k, e)| CategoryStats::from_entry(k, e, now))
            .collect();
        out.sort_by(|a, b| a.category.cmp(&b.category));
        out
    }
}

#[cfg(test)]
mod tests;
