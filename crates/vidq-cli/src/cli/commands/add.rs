//! `vidq add <reference>` – queue a download.

use anyhow::Result;
use vidq_core::config::VidqConfig;
use vidq_core::coordinator::Coordinator;
use vidq_core::ledger::DownloadOptions;

#[derive(Debug, Default)]
pub struct AddArgs {
    pub quality: Option<String>,
    pub format: Option<String>,
    pub audio_only: bool,
    pub priority: i64,
    pub force: bool,
}

pub async fn run_add(
    c: &Coordinator,
    cfg: &VidqConfig,
    reference: &str,
    args: AddArgs,
) -> Result<()> {
    let mut options = DownloadOptions::from_config(cfg);
    if let Some(q) = args.quality {
        options.quality = q;
    }
    if let Some(f) = args.format {
        options.format = f;
    }
    options.audio_only = args.audio_only;

    let id = c
        .enqueue_download(reference, options, args.priority, args.force)
        .await?;
    println!("Queued job {id} for {reference}");
    Ok(())
}
