//! Queue administration: pause/resume, requeue and cleanup.

use anyhow::Result;
use vidq_core::coordinator::Coordinator;

use crate::cli::control_socket::{self, Request};

/// Pause and resume go through a running worker when there is one, so its listeners see them.
pub async fn run_pause_queue(c: &Coordinator, reason: Option<&str>) -> Result<()> {
    let req = Request::Pause(reason.map(str::to_string));
    match control_socket::forward(&req).await {
        Some(reply) if reply == "paused" => {}
        _ => c.pause_queue(reason).await?,
    }
    println!("Queue paused");
    Ok(())
}

pub async fn run_resume_queue(c: &Coordinator) -> Result<()> {
    match control_socket::forward(&Request::Resume).await {
        Some(reply) if reply == "resumed" => {}
        _ => c.resume_queue().await?,
    }
    println!("Queue resumed");
    Ok(())
}

pub async fn run_retry(c: &Coordinator, id: i64) -> Result<()> {
    if c.retry(id).await? {
        println!("Requeued job {id}");
    } else {
        println!("Job {id} is not failed, cancelled or waiting (parked jobs need resume-parked)");
    }
    Ok(())
}

pub async fn run_retry_all(c: &Coordinator) -> Result<()> {
    let n = c.retry_all_failed().await?;
    println!("Requeued {n} job(s)");
    Ok(())
}

pub async fn run_resume_parked(c: &Coordinator, id: i64) -> Result<()> {
    if c.resume_parked(id).await? {
        println!("Resumed parked job {id}");
    } else {
        println!("Job {id} is not parked");
    }
    Ok(())
}

pub async fn run_cleanup(c: &Coordinator) -> Result<()> {
    let n = c.cleanup_finished().await?;
    println!("Removed {n} finished job(s)");
    Ok(())
}
