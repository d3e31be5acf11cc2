//! `vidq status` and `vidq stats`.

use anyhow::Result;
use vidq_core::coordinator::Coordinator;
use vidq_core::ledger::{Job, JobKind};

fn print_jobs(jobs: &[Job]) {
    println!(
        "{:<6} {:<12} {:<11} {:>5}  {}",
        "ID", "KIND", "STATUS", "PCT", "TITLE"
    );
    for j in jobs {
        let detail = j
            .error_message
            .as_deref()
            .or(j.description.as_deref())
            .map(|d| format!("  [{d}]"))
            .unwrap_or_default();
        println!(
            "{:<6} {:<12} {:<11} {:>4.0}%  {}{}",
            j.id,
            j.kind.as_str(),
            j.status.as_str(),
            j.progress * 100.0,
            j.title,
            detail
        );
    }
}

pub async fn run_status(c: &Coordinator, limit: i64, all: bool) -> Result<()> {
    let pause = c.pause_state().await?;
    if pause.paused {
        println!(
            "Queue is paused ({})",
            pause.reason.as_deref().unwrap_or("no reason given")
        );
    }
    let active = c.list_active(limit).await?;
    if !active.is_empty() {
        println!("Active:");
        print_jobs(&active);
        println!();
    }
    let kind = (!all).then_some(JobKind::Download);
    let recent = c.list_recent(limit, kind).await?;
    if recent.is_empty() {
        println!("No jobs in the ledger.");
    } else {
        println!("Recent:");
        print_jobs(&recent);
    }
    Ok(())
}

pub async fn run_stats(c: &Coordinator) -> Result<()> {
    let s = c.stats().await?;
    println!("queued      {}", s.queued);
    println!("active      {}", s.active);
    println!("retry_wait  {}", s.retry_wait);
    println!("done        {}", s.done);
    println!("error       {}", s.error);
    println!("parked      {}", s.parked);
    println!("cancelled   {}", s.cancelled);
    println!("total       {}", s.total);
    match (s.paused, s.pause_reason) {
        (true, Some(reason)) => println!("queue       paused ({reason})"),
        (true, None) => println!("queue       paused"),
        (false, _) => println!("queue       running"),
    }
    Ok(())
}
