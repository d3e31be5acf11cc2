//! Periodic deletion of old finished job rows.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RetentionConfig;
use crate::coordinator::Coordinator;

#[derive(Debug, Clone, Copy)]
pub struct RetentionSettings {
    pub max_age: Duration,
    pub every: Duration,
}

impl RetentionSettings {
    pub fn from_config(cfg: &RetentionConfig) -> Self {
        Self {
            max_age: Duration::from_secs(cfg.max_age_hours.saturating_mul(3600)),
            every: Duration::from_secs(cfg.sweep_interval_secs.max(1)),
        }
    }
}

/// Sweep now and then every `settings.every`. Never returns.
pub async fn retention_loop(coordinator: Arc<Coordinator>, settings: RetentionSettings) {
    let mut ticker = tokio::time::interval(settings.every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = coordinator.sweep_older_than(settings.max_age).await {
            tracing::warn!("retention sweep failed: {:#}", e);
        }
    }
}
