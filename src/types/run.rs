//! Run records written to the local run log

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::{Measurement, SiteIdentity};

/// Timestamp format used in the run log and in form notes.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How a scheduled run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The form accepted a submission (HTTP 200 or 302)
    Success { status: u16 },
    /// Every mapping/hidden combination was tried and none was accepted.
    /// `status` is the last HTTP status seen, `None` if no response arrived.
    Failure { status: Option<u16> },
    /// No measurement could be produced; nothing was submitted
    MeasurementFailed,
    /// Measure-only mode
    NotSubmitted,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Success { .. } => write!(f, "SUCCESS"),
            RunOutcome::Failure { status: Some(code) } => write!(f, "FAIL({})", code),
            RunOutcome::Failure { status: None } => write!(f, "FAIL(no-response)"),
            RunOutcome::MeasurementFailed => write!(f, "FAIL(measurement)"),
            RunOutcome::NotSubmitted => write!(f, "NOT_SUBMITTED"),
        }
    }
}

/// One executed run. Appended once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Local>,
    pub measurement: Option<Measurement>,
    pub school_code: String,
    pub sector: String,
    pub school_name: String,
    pub provider: String,
    pub line_number: String,
    pub service_type: String,
    pub device_name: String,
    pub schedule_label: String,
    pub outcome: RunOutcome,
    pub mapping_used: Option<String>,
    pub hidden_used: Option<String>,
}

impl RunRecord {
    /// Start a record for `site`; measurement and submission details are
    /// filled in with the builder methods below.
    pub fn new(
        timestamp: DateTime<Local>,
        site: &SiteIdentity,
        schedule_label: &str,
        outcome: RunOutcome,
    ) -> Self {
        Self {
            timestamp,
            measurement: None,
            school_code: site.school_code.clone(),
            sector: site.sector.label().to_string(),
            school_name: site.school_name.clone(),
            provider: site.provider.label().to_string(),
            line_number: site.line_number.clone(),
            service_type: site.service_type.label().to_string(),
            device_name: site.device_name.clone(),
            schedule_label: schedule_label.to_string(),
            outcome,
            mapping_used: None,
            hidden_used: None,
        }
    }

    pub fn with_measurement(mut self, measurement: Measurement) -> Self {
        self.measurement = Some(measurement);
        self
    }

    pub fn with_combination(mut self, mapping: Option<String>, hidden: Option<String>) -> Self {
        self.mapping_used = mapping;
        self.hidden_used = hidden;
        self
    }

    /// Column values in run-log order (see `RunLog::HEADER`).
    pub fn columns(&self) -> Vec<String> {
        let (download, upload, ping, server, ip) = match &self.measurement {
            Some(m) => (
                m.download_mbps().to_string(),
                m.upload_mbps().to_string(),
                m.ping_ms().to_string(),
                m.server_host().to_string(),
                m.client_ip().to_string(),
            ),
            None => Default::default(),
        };

        vec![
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            download,
            upload,
            ping,
            server,
            ip,
            self.device_name.clone(),
            self.school_code.clone(),
            self.sector.clone(),
            self.school_name.clone(),
            self.provider.clone(),
            self.line_number.clone(),
            self.service_type.clone(),
            self.schedule_label.clone(),
            self.outcome.to_string(),
            self.mapping_used.clone().unwrap_or_default(),
            self.hidden_used.clone().unwrap_or_default(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Provider, Sector, ServiceType};

    fn site() -> SiteIdentity {
        SiteIdentity {
            school_code: "1561".to_string(),
            sector: Sector::Seeb,
            school_name: "School".to_string(),
            provider: Provider::Omantel,
            line_number: "24424428".to_string(),
            service_type: ServiceType::Fiber,
            device_name: "PC".to_string(),
        }
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(RunOutcome::Success { status: 200 }.to_string(), "SUCCESS");
        assert_eq!(RunOutcome::Failure { status: Some(400) }.to_string(), "FAIL(400)");
        assert_eq!(RunOutcome::Failure { status: None }.to_string(), "FAIL(no-response)");
        assert_eq!(RunOutcome::MeasurementFailed.to_string(), "FAIL(measurement)");
    }

    #[test]
    fn test_columns_without_measurement_are_blank() {
        let record = RunRecord::new(Local::now(), &site(), "07:00", RunOutcome::MeasurementFailed);
        let cols = record.columns();
        assert_eq!(cols.len(), 17);
        assert!(cols[1..6].iter().all(String::is_empty));
        assert_eq!(cols[8], "السيب");
        assert_eq!(cols[13], "07:00");
        assert_eq!(cols[14], "FAIL(measurement)");
    }

    #[test]
    fn test_columns_with_measurement_and_combination() {
        let m = Measurement::new(45.2, 10.1, 18.4, "srv", "1.2.3.4", Local::now());
        let record = RunRecord::new(Local::now(), &site(), "13:30", RunOutcome::Success { status: 200 })
            .with_measurement(m)
            .with_combination(Some("speed-notes-swapped".into()), Some("without-fbzx".into()));
        let cols = record.columns();
        assert_eq!(cols[1], "45.2");
        assert_eq!(cols[3], "18.4");
        assert_eq!(cols[15], "speed-notes-swapped");
        assert_eq!(cols[16], "without-fbzx");
    }
}
