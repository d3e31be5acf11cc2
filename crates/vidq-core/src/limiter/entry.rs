//! Per-category pacing state and statistics.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CategoryEntry {
    /// Floor interval; success resets to this.
    pub default_interval: Duration,
    pub current_interval: Duration,
    /// Consecutive throttle errors since the last success.
    pub consecutive_blocks: u32,
    pub last_request: Option<Instant>,
    pub last_block_at: Option<Instant>,
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub blocks: u64,
}

impl CategoryEntry {
    pub(super) fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            current_interval: default_interval,
            consecutive_blocks: 0,
            last_request: None,
            last_block_at: None,
            requests: 0,
            successes: 0,
            errors: 0,
            blocks: 0,
        }
    }

    /// Time until the next request may go out.
    pub(super) fn wait_from(&self, now: Instant) -> Duration {
        match self.last_request {
            Some(last) => (last + self.current_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub(super) fn in_backoff(&self) -> bool {
        self.current_interval > self.default_interval
    }
}

/// Snapshot of one category for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub category: String,
    pub interval_secs: f64,
    pub default_secs: f64,
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub blocks: u64,
    pub in_backoff: bool,
    pub last_block_secs_ago: Option<f64>,
}

impl CategoryStats {
    pub(super) fn from_entry(category: &str, e: &CategoryEntry, now: Instant) -> Self {
        Self {
            category: category.to_string(),
            interval_secs: e.current_interval.as_secs_f64(),
            default_secs: e.default_interval.as_secs_f64(),
            requests: e.requests,
            successes: e.successes,
            errors: e.errors,
            blocks: e.blocks,
            in_backoff: e.in_backoff(),
            last_block_secs_ago: e
                .last_block_at
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
        }
    }
}
