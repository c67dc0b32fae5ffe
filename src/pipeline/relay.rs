//! Relay pipeline: what happens when a slot fires.
//!
//! ```text
//! measure ──► submit (unless measure-only) ──► append one RunRecord
//!    │                                              ▲
//!    └── failure ───────────────────────────────────┘
//! ```
//!
//! Every error becomes an outcome in the record; nothing here can stop the
//! scheduler.

use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::measurement::MeasurementProvider;
use crate::scheduler::SlotRunner;
use crate::storage::ResultSink;
use crate::submission::{SubmissionEngine, SubmissionError};
use crate::types::{RunOutcome, RunRecord, ScheduleSlot, SiteIdentity};

pub struct RelayPipeline {
    site: SiteIdentity,
    provider: Arc<dyn MeasurementProvider>,
    /// `None` in measure-only mode
    engine: Option<SubmissionEngine>,
    sink: Arc<dyn ResultSink>,
    probe_timeout: Duration,
}

impl RelayPipeline {
    pub fn new(
        site: SiteIdentity,
        provider: Arc<dyn MeasurementProvider>,
        engine: Option<SubmissionEngine>,
        sink: Arc<dyn ResultSink>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            site,
            provider,
            engine,
            sink,
            probe_timeout,
        }
    }

    pub fn site(&self) -> &SiteIdentity {
        &self.site
    }

    /// Execute one run for `label` and return the record that was appended.
    pub async fn run_once(&self, label: &str) -> RunRecord {
        info!(label, school = %self.site.school_code, "Starting run");

        let measurement = match self.provider.measure(self.probe_timeout).await {
            Ok(m) => m,
            Err(e) => {
                error!(label, error = %e, "Measurement failed, nothing submitted");
                let record = RunRecord::new(Local::now(), &self.site, label, RunOutcome::MeasurementFailed);
                self.record(&record);
                return record;
            }
        };

        info!(
            label,
            download_mbps = measurement.download_mbps(),
            upload_mbps = measurement.upload_mbps(),
            ping_ms = measurement.ping_ms(),
            server = measurement.server_host(),
            "Measured"
        );

        let record = RunRecord::new(measurement.taken_at(), &self.site, label, RunOutcome::NotSubmitted)
            .with_measurement(measurement.clone());

        let record = match &self.engine {
            None => {
                info!(label, "Measure-only mode, submission skipped");
                record
            }
            Some(engine) => match engine.submit(&measurement, &self.site).await {
                Ok(accepted) => {
                    info!(
                        label,
                        status = accepted.status,
                        mapping = %accepted.mapping,
                        hidden = %accepted.hidden,
                        "Submitted"
                    );
                    RunRecord {
                        outcome: RunOutcome::Success {
                            status: accepted.status,
                        },
                        ..record
                    }
                    .with_combination(Some(accepted.mapping), Some(accepted.hidden))
                }
                Err(SubmissionError::Mismatch {
                    attempts,
                    last_status,
                    excerpt,
                }) => {
                    warn!(label, attempts, last_status = ?last_status, excerpt = %excerpt, "Submission failed");
                    RunRecord {
                        outcome: RunOutcome::Failure { status: last_status },
                        ..record
                    }
                }
            },
        };

        self.record(&record);
        record
    }

    fn record(&self, record: &RunRecord) {
        if let Err(e) = self.sink.append(record) {
            error!(error = %e, label = %record.schedule_label, "Failed to append run record");
        }
    }
}

#[async_trait]
impl SlotRunner for RelayPipeline {
    async fn run_slot(&self, slot: &ScheduleSlot) {
        let record = self.run_once(&slot.label).await;
        info!(slot = %slot, outcome = %record.outcome, "Run finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormConfig;
    use crate::measurement::testing::{reading, ScriptedProvider};
    use crate::measurement::MeasurementError;
    use crate::storage::RunLogError;
    use crate::submission::{FormResponse, FormTransport, TransportError};
    use crate::types::{Provider, Sector, ServiceType};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<RunRecord>>,
    }

    impl ResultSink for MemorySink {
        fn append(&self, record: &RunRecord) -> Result<(), RunLogError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl ResultSink for FailingSink {
        fn append(&self, _record: &RunRecord) -> Result<(), RunLogError> {
            Err(RunLogError::Io {
                path: "speed_log.csv".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
    }

    /// Accepts only the n-th POST (1-based).
    struct AcceptNth {
        n: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FormTransport for AcceptNth {
        async fn post_form(&self, _fields: &[(String, String)]) -> Result<FormResponse, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let status = if call == self.n { 200 } else { 400 };
            Ok(FormResponse {
                status,
                body: String::new(),
            })
        }
    }

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

    fn engine(accept: u32) -> (SubmissionEngine, Arc<AcceptNth>) {
        let transport = Arc::new(AcceptNth {
            n: accept,
            calls: AtomicU32::new(0),
        });
        (SubmissionEngine::from_config(&FormConfig::default(), transport.clone()), transport)
    }

    fn pipeline(
        results: Vec<Result<crate::types::Measurement, MeasurementError>>,
        engine: Option<SubmissionEngine>,
        sink: Arc<dyn ResultSink>,
    ) -> RelayPipeline {
        RelayPipeline::new(
            site(),
            Arc::new(ScriptedProvider::new("probe", results)),
            engine,
            sink,
            Duration::from_secs(120),
        )
    }

    #[tokio::test]
    async fn test_success_records_combination() {
        let sink = Arc::new(MemorySink::default());
        let (engine, transport) = engine(3);
        let p = pipeline(vec![Ok(reading(45.2))], Some(engine), sink.clone());

        let record = p.run_once("07:00").await;
        assert_eq!(record.outcome, RunOutcome::Success { status: 200 });
        assert_eq!(record.mapping_used.as_deref(), Some("speed-notes-swapped"));
        assert_eq!(record.hidden_used.as_deref(), Some("without-fbzx"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1, "exactly one row per run");
        assert_eq!(records[0].measurement.as_ref().unwrap().download_mbps(), 45.2);
    }

    #[tokio::test]
    async fn test_measurement_failure_recorded_without_submitting() {
        let sink = Arc::new(MemorySink::default());
        let (engine, transport) = engine(1);
        let p = pipeline(
            vec![Err(MeasurementError::Fatal("no probe".into()))],
            Some(engine),
            sink.clone(),
        );

        let record = p.run_once("13:30").await;
        assert_eq!(record.outcome, RunOutcome::MeasurementFailed);
        assert!(record.measurement.is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mismatch_recorded_as_failure() {
        let sink = Arc::new(MemorySink::default());
        let (engine, _) = engine(99);
        let p = pipeline(vec![Ok(reading(10.0))], Some(engine), sink.clone());

        let record = p.run_once("07:00").await;
        assert_eq!(record.outcome, RunOutcome::Failure { status: Some(400) });
        assert!(record.mapping_used.is_none());
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_measure_only_mode() {
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(vec![Ok(reading(10.0))], None, sink.clone());
        assert_eq!(p.run_once("manual").await.outcome, RunOutcome::NotSubmitted);
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_panic() {
        let p = pipeline(vec![Ok(reading(10.0))], None, Arc::new(FailingSink));
        let slot = ScheduleSlot::new("07:00", 7, 0);
        p.run_slot(&slot).await;
    }
}
