//! Local Durability
//!
//! - **RunLog**: append-only CSV record of every executed run
//! - **ProcessLock**: single-daemon guard next to the run log

pub mod lockfile;
pub mod run_log;

pub use lockfile::ProcessLock;
pub use run_log::{ResultSink, RunLog, RunLogError};
