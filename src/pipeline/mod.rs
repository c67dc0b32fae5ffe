//! Relay Pipeline Module
//!
//! ```text
//! Scheduler ──► RelayPipeline::run_slot
//!                 1. MeasurementProvider (HTTP probe, retries, external fallback)
//!                 2. SubmissionEngine    (ranked mapping search, skipped if measure-only)
//!                 3. RunLog              (one row, whatever happened above)
//! ```

mod builder;
mod relay;

pub use builder::{build_pipeline, lock_dir, start_daemon, RunOptions, StartupError};
pub use relay::RelayPipeline;
