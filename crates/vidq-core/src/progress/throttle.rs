//! Minimum-interval gate for byte-progress notifications.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct EmitThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl EmitThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// True if at least `min_interval` passed since the last emission (or none happened yet).
    /// Records `now` as the last emission when returning true.
    pub fn ready_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }
}
