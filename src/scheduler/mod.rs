//! Daily Scheduler
//!
//! Fires a fixed set of daily wall-clock slots, catching up on any that were
//! missed while the host was asleep, and never firing a slot twice on the
//! same calendar day. Execution is strictly sequential: a slot runs to
//! completion before the next evaluation.

pub mod clock;
pub mod daily;

pub use clock::{Clock, SystemClock};
pub use daily::{Cycle, DailyRunState, DailyScheduler, SlotRunner};
