//! speed-relay: scheduled connectivity measurement for school lines
//!
//! Measures a line's throughput and latency at fixed daily times and relays
//! each reading to the directorate's web form, keeping a local CSV record of
//! every run.
//!
//! ## Architecture
//!
//! - **Measurement**: in-process HTTP probe with retries, external speed test fallback
//! - **Submission**: ranked search over field-mapping hypotheses until the form accepts
//! - **Storage**: append-only CSV run log, single-daemon lock
//! - **Scheduler**: fixed daily slots with catch-up after host sleep

pub mod config;
pub mod measurement;
pub mod pipeline;
pub mod scheduler;
pub mod storage;
pub mod submission;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, RelayConfig};

// Re-export commonly used types
pub use types::{
    Measurement, Provider, RunOutcome, RunRecord, ScheduleSlot, Sector, ServiceType,
    SiteConfig, SiteIdentity, ValidationError,
};

// Re-export the wiring entry points
pub use pipeline::{build_pipeline, RelayPipeline, RunOptions, StartupError};
pub use scheduler::{DailyScheduler, SystemClock};
