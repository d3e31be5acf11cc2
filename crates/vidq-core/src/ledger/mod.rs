//! Persistent job ledger (SQLite via sqlx).
//!
//! Stores every job with its state-machine status, the queue pause flag, and the
//! library artifacts produced by finished downloads.

mod artifacts;
mod db;
mod jobs;
mod settings;
mod types;

pub use artifacts::{Artifact, Chapter, SubtitleFile, ARTIFACT_READY};
pub use db::Ledger;
pub(crate) use db::unix_timestamp;
pub use jobs::{MAX_ERROR_LEN, MAX_RETRY_NOTE_LEN};
pub use types::*;

#[cfg(test)]
mod tests;
