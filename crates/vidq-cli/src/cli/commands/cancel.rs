//! `vidq cancel <id>` – cancel a job. With `vidq run` active the request goes through its
//! control socket so an in-flight download stops too.

use anyhow::{bail, Result};
use vidq_core::coordinator::Coordinator;

use crate::cli::control_socket::{self, Request};

pub async fn run_cancel(c: &Coordinator, id: i64) -> Result<()> {
    let changed = match control_socket::forward(&Request::Cancel(id)).await {
        Some(reply) if reply.starts_with("cancelled ") => true,
        Some(reply) if reply.starts_with("not-cancellable ") => false,
        Some(reply) => bail!("worker refused cancel: {reply}"),
        None => c.cancel(id).await?,
    };
    if changed {
        println!("Cancelled job {id}");
    } else {
        println!("Job {id} is not queued, waiting or active");
    }
    Ok(())
}
