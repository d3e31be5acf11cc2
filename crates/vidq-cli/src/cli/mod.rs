//! CLI for the vidq video library.

mod commands;
mod control_socket;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use vidq_core::config::{self, VidqConfig};
use vidq_core::control::JobControl;
use vidq_core::coordinator::{Coordinator, CoordinatorSettings};
use vidq_core::ledger::Ledger;
use vidq_core::progress::ProgressBroadcaster;

use commands::{
    run_add, run_cancel, run_cleanup, run_pause_queue, run_resume_parked, run_resume_queue,
    run_retry, run_retry_all, run_stats, run_status, run_worker, AddArgs,
};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "vidq")]
#[command(about = "vidq: personal video library downloader", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a download for a video URL or bare id.
    Add {
        /// Watch URL, short link or 11-character id.
        reference: String,
        /// "best", "2160p", "1440p", "1080p", "720p", "480p" or "360p" (default from config).
        #[arg(long)]
        quality: Option<String>,
        /// Container extension (default from config).
        #[arg(long)]
        format: Option<String>,
        /// Download the audio stream only.
        #[arg(long)]
        audio_only: bool,
        /// Higher runs first.
        #[arg(long, default_value = "0")]
        priority: i64,
        /// Queue even if the video is already in the library.
        #[arg(long)]
        force: bool,
    },

    /// Run the download worker until Ctrl-C.
    Run {
        /// Override `max_concurrent_downloads` from the config.
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
    },

    /// Show active and recent jobs.
    Status {
        /// Number of recent jobs to list.
        #[arg(long, default_value = "20")]
        limit: i64,
        /// Include every job kind, not only downloads.
        #[arg(long)]
        all: bool,
    },

    /// Show job counts per status and the queue pause flag.
    Stats,

    /// Cancel a queued, waiting or running job.
    Cancel {
        /// Job identifier.
        id: i64,
    },

    /// Stop the worker from starting new downloads.
    PauseQueue {
        /// Shown in status output.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Let the worker start downloads again.
    ResumeQueue,

    /// Requeue a failed, cancelled or waiting job.
    Retry {
        /// Job identifier.
        id: i64,
    },

    /// Requeue every failed download. Parked jobs are left alone.
    RetryAll,

    /// Requeue a parked job.
    ResumeParked {
        /// Job identifier.
        id: i64,
    },

    /// Delete finished jobs from the ledger.
    Cleanup,
}

/// Open the ledger and wrap it in a coordinator configured from `cfg`.
pub(crate) async fn open_coordinator(cfg: &VidqConfig) -> Result<Arc<Coordinator>> {
    let ledger = Ledger::open_default().await?;
    Ok(Arc::new(Coordinator::new(
        ledger,
        ProgressBroadcaster::default(),
        Arc::new(JobControl::new()),
        CoordinatorSettings::from_config(cfg),
    )))
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let coordinator = open_coordinator(&cfg).await?;
        let c = coordinator.as_ref();

        match cli.command {
            CliCommand::Add {
                reference,
                quality,
                format,
                audio_only,
                priority,
                force,
            } => {
                let args = AddArgs {
                    quality,
                    format,
                    audio_only,
                    priority,
                    force,
                };
                run_add(c, &cfg, &reference, args).await?
            }
            CliCommand::Run { concurrency } => {
                run_worker(Arc::clone(&coordinator), &cfg, concurrency).await?
            }
            CliCommand::Status { limit, all } => run_status(c, limit, all).await?,
            CliCommand::Stats => run_stats(c).await?,
            CliCommand::Cancel { id } => run_cancel(c, id).await?,
            CliCommand::PauseQueue { reason } => run_pause_queue(c, reason.as_deref()).await?,
            CliCommand::ResumeQueue => run_resume_queue(c).await?,
            CliCommand::Retry { id } => run_retry(c, id).await?,
            CliCommand::RetryAll => run_retry_all(c).await?,
            CliCommand::ResumeParked { id } => run_resume_parked(c, id).await?,
            CliCommand::Cleanup => run_cleanup(c).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
