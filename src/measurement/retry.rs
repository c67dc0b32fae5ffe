//! Retry policy for a single measurement strategy.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{measure_bounded, MeasurementError, MeasurementProvider};
use crate::config::RetryConfig;
use crate::types::Measurement;

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Rejected configuration fetch: attempt `n` waits `n × backoff_unit`
    pub backoff_unit: Duration,
    /// Any other transient failure waits this long
    pub short_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_unit: Duration, short_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
            short_backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.backoff_unit_secs),
            Duration::from_secs(config.short_backoff_secs),
        )
    }

    /// Wait before the attempt following failed `attempt` (1-based).
    /// `None` means stop: the error is fatal or the budget is spent.
    pub fn delay_after(&self, attempt: u32, err: &MeasurementError) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        match err {
            MeasurementError::Rejected { .. } => Some(self.backoff_unit * attempt),
            MeasurementError::Transient(_) | MeasurementError::Timeout(_) => Some(self.short_backoff),
            MeasurementError::Fatal(_) => None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Applies a `RetryPolicy` around one provider.
pub struct RetryingProvider {
    inner: Arc<dyn MeasurementProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn MeasurementProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl MeasurementProvider for RetryingProvider {
    async fn measure(&self, timeout: Duration) -> Result<Measurement, MeasurementError> {
        let mut attempt = 1;
        loop {
            match measure_bounded(self.inner.as_ref(), timeout).await {
                Ok(m) => {
                    info!(
                        provider = self.inner.name(),
                        attempt,
                        download_mbps = m.download_mbps(),
                        upload_mbps = m.upload_mbps(),
                        ping_ms = m.ping_ms(),
                        "Measurement complete"
                    );
                    return Ok(m);
                }
                Err(e) => match self.policy.delay_after(attempt, &e) {
                    Some(delay) => {
                        warn!(
                            provider = self.inner.name(),
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            error = %e,
                            retry_in_secs = delay.as_secs(),
                            "Measurement attempt failed"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        warn!(provider = self.inner.name(), attempt, error = %e, "Measurement failed");
                        return Err(e);
                    }
                },
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{reading, ScriptedProvider};
    use super::*;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(20), Duration::from_secs(5))
    }

    #[test]
    fn test_delay_schedule() {
        let p = policy();
        let rejected = MeasurementError::Rejected { status: 403 };
        assert_eq!(p.delay_after(1, &rejected), Some(Duration::from_secs(20)));
        assert_eq!(p.delay_after(2, &rejected), Some(Duration::from_secs(40)));
        assert_eq!(p.delay_after(3, &rejected), None);

        let transient = MeasurementError::Transient("reset".into());
        assert_eq!(p.delay_after(1, &transient), Some(Duration::from_secs(5)));
        assert_eq!(p.delay_after(2, &MeasurementError::Timeout(Duration::from_secs(1))), Some(Duration::from_secs(5)));
        assert_eq!(p.delay_after(1, &MeasurementError::Fatal("x".into())), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_backoff_is_linear() {
        let inner = Arc::new(ScriptedProvider::new(
            "probe",
            vec![
                Err(MeasurementError::Rejected { status: 429 }),
                Err(MeasurementError::Rejected { status: 429 }),
                Ok(reading(30.0)),
            ],
        ));
        let provider = RetryingProvider::new(inner.clone(), policy());

        let started = Instant::now();
        let m = provider.measure(Duration::from_secs(120)).await.unwrap();
        assert_eq!(m.download_mbps(), 30.0);
        assert_eq!(inner.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_error_without_trailing_wait() {
        let inner = Arc::new(ScriptedProvider::new(
            "probe",
            vec![
                Err(MeasurementError::Transient("a".into())),
                Err(MeasurementError::Transient("b".into())),
                Err(MeasurementError::Transient("c".into())),
            ],
        ));
        let provider = RetryingProvider::new(inner.clone(), policy());

        let started = Instant::now();
        let err = provider.measure(Duration::from_secs(120)).await.unwrap_err();
        assert_eq!(err, MeasurementError::Transient("c".into()));
        assert_eq!(inner.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_is_not_retried() {
        let inner = Arc::new(ScriptedProvider::new(
            "probe",
            vec![Err(MeasurementError::Fatal("tls".into())), Ok(reading(1.0))],
        ));
        let provider = RetryingProvider::new(inner.clone(), policy());
        assert!(provider.measure(Duration::from_secs(120)).await.is_err());
        assert_eq!(inner.calls(), 1);
    }
}
