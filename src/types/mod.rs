//! Shared data structures for the measurement relay
//!
//! - Measurement: one throughput/latency reading
//! - SiteIdentity: validated school line identity (closed form enumerations)
//! - ScheduleSlot: a fixed daily firing instant
//! - RunRecord / RunOutcome: what gets appended to the run log

mod measurement;
mod run;
mod schedule;
mod site;

pub use measurement::*;
pub use run::*;
pub use schedule::*;
pub use site::*;
