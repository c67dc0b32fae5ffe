//! Daily schedule slot

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// A fixed, recurring daily wall-clock instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    /// Unique label, recorded with every run ("07:00", "morning", ...)
    pub label: String,
    /// Hour of day, 0-23
    pub hour: u32,
    /// Minute of hour, 0-59
    pub minute: u32,
}

impl ScheduleSlot {
    pub fn new(label: impl Into<String>, hour: u32, minute: u32) -> Self {
        Self {
            label: label.into(),
            hour,
            minute,
        }
    }

    /// Wall-clock time of this slot, `None` when hour/minute are out of range.
    pub fn time_of_day(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
    }
}

impl std::fmt::Display for ScheduleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:02}:{:02})", self.label, self.hour, self.minute)
    }
}
