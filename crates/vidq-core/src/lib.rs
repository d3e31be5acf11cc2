pub mod config;
pub mod logging;

pub mod content_ref;
pub mod control;
pub mod coordinator;
pub mod ledger;
pub mod limiter;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod worker;
