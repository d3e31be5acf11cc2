use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::RateLimiter;
use crate::config::LimiterConfig;

fn limiter(base: f64, max: f64) -> RateLimiter {
    let mut cfg = LimiterConfig {
        max_backoff_secs: max,
        ..LimiterConfig::default()
    };
    cfg.intervals.insert("resolve".into(), base);
    RateLimiter::new(&cfg)
}

#[test]
fn throttle_errors_double_interval_up_to_cap() {
    let l = limiter(5.0, 120.0);
    let mut seen = vec![l.interval("resolve")];
    for _ in 0..2 {
        assert!(l.error("resolve", "HTTP Error 429: Too Many Requests"));
        seen.push(l.interval("resolve"));
    }
    assert_eq!(
        seen,
        vec![
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(20)
        ]
    );

    for _ in 0..10 {
        l.error("resolve", "rate limit exceeded");
    }
    assert_eq!(l.interval("resolve"), Duration::from_secs(120));
}

#[test]
fn fourth_escalation_is_capped() {
    let l = limiter(40.0, 120.0);
    let mut seen = vec![l.interval("resolve")];
    for _ in 0..3 {
        l.error("resolve", "429");
        seen.push(l.interval("resolve"));
    }
    assert_eq!(
        seen,
        vec![
            Duration::from_secs(40),
            Duration::from_secs(80),
            Duration::from_secs(120),
            Duration::from_secs(120)
        ]
    );
}

#[test]
fn success_resets_and_unrelated_errors_do_not_escalate() {
    let l = limiter(5.0, 120.0);
    l.error("resolve", "HTTP Error 403: Forbidden");
    assert_eq!(l.interval("resolve"), Duration::from_secs(10));

    assert!(!l.error("resolve", "Video unavailable"));
    assert!(!l.error("resolve", "Connection reset by peer"));
    assert_eq!(l.interval("resolve"), Duration::from_secs(10));

    l.success("resolve");
    assert_eq!(l.interval("resolve"), Duration::from_secs(5));

    let stats = l.stats();
    let s = stats.iter().find(|s| s.category == "resolve").unwrap();
    assert_eq!(s.errors, 3);
    assert_eq!(s.blocks, 1);
    assert_eq!(s.successes, 1);
    assert!(!s.in_backoff);
}

#[test]
fn unknown_category_uses_default_interval() {
    let l = RateLimiter::default();
    assert_eq!(l.interval("something_new"), Duration::from_secs(1));
    assert_eq!(l.interval("thumbnail"), Duration::from_secs(1));
    assert_eq!(l.interval("resolve"), Duration::from_secs(5));
}

#[test]
fn health_and_reset() {
    let l = limiter(5.0, 120.0);
    assert!(l.is_healthy());
    l.error("resolve", "too many requests");
    assert!(!l.is_healthy());
    l.reset(None);
    assert!(l.is_healthy());
    assert_eq!(l.interval("resolve"), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn acquire_spaces_requests_by_interval() {
    let l = limiter(5.0, 120.0);
    let start = Instant::now();
    l.acquire("resolve").await;
    assert!(start.elapsed() < Duration::from_millis(1), "first request is immediate");
    l.acquire("resolve").await;
    assert!(start.elapsed() >= Duration::from_secs(5));
    l.error("resolve", "429");
    let before = Instant::now();
    l.acquire("resolve").await;
    assert!(before.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn concurrent_acquirers_are_serialized() {
    let l = Arc::new(limiter(2.0, 120.0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..3 {
        let l = Arc::clone(&l);
        handles.push(tokio::spawn(async move {
            l.acquire("resolve").await;
            Instant::now()
        }));
    }
    let mut times = Vec::new();
    for h in handles {
        times.push(h.await.unwrap().duration_since(start));
    }
    times.sort();
    assert!(times[1] >= Duration::from_secs(2));
    assert!(times[2] >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn disabled_limiter_does_not_wait() {
    let l = limiter(30.0, 120.0);
    l.set_disabled(true);
    let start = Instant::now();
    for _ in 0..3 {
        l.acquire("resolve").await;
    }
    assert!(start.elapsed() < Duration::from_secs(1));
}
