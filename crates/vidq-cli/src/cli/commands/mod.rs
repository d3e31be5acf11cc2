//! CLI command handlers, one file per command group.

mod add;
mod cancel;
mod queue;
mod run;
mod status;

pub use add::{run_add, AddArgs};
pub use cancel::run_cancel;
pub use queue::{
    run_cleanup, run_pause_queue, run_resume_parked, run_resume_queue, run_retry, run_retry_all,
};
pub use run::run_worker;
pub use status::{run_stats, run_status};
