//! Measurement Providers - producing one throughput/latency reading
//!
//! ## Strategies
//!
//! - **HttpProbe**: in-process probe against https speed endpoints
//! - **RetryingProvider**: retry policy around a single strategy
//! - **ExternalProbe**: external speed test binary with JSON output
//! - **FallbackProvider**: primary (with retries) then fallback
//!
//! A failed measurement is never re-attempted here beyond the retry policy;
//! the next chance is the next scheduled slot.

pub mod external;
pub mod http_probe;
pub mod retry;

pub use external::{ExternalProbe, ProbeReport};
pub use http_probe::HttpProbe;
pub use retry::{RetryPolicy, RetryingProvider};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::types::Measurement;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeasurementError {
    /// The probe service refused to hand out its configuration
    /// (rate-limit / forbidden class response)
    #[error("probe configuration rejected (HTTP {status})")]
    Rejected { status: u16 },

    #[error("probe failed: {0}")]
    Transient(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Fatal(String),
}

impl MeasurementError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, MeasurementError::Fatal(_))
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Capability: produce a `Measurement` or fail.
#[async_trait]
pub trait MeasurementProvider: Send + Sync {
    /// Take one measurement. `timeout` bounds a single attempt.
    async fn measure(&self, timeout: Duration) -> Result<Measurement, MeasurementError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Run `provider` with `timeout` enforced from outside.
pub async fn measure_bounded(
    provider: &dyn MeasurementProvider,
    timeout: Duration,
) -> Result<Measurement, MeasurementError> {
    match tokio::time::timeout(timeout, provider.measure(timeout)).await {
        Ok(result) => result,
        Err(_) => Err(MeasurementError::Timeout(timeout)),
    }
}

// ============================================================================
// Fallback Composition
// ============================================================================

/// Primary strategy first; the fallback runs only once the primary has
/// returned an error (i.e. after its own retries are exhausted).
pub struct FallbackProvider {
    primary: Arc<dyn MeasurementProvider>,
    fallback: Option<Arc<dyn MeasurementProvider>>,
    fallback_timeout: Duration,
}

impl FallbackProvider {
    pub fn new(
        primary: Arc<dyn MeasurementProvider>,
        fallback: Option<Arc<dyn MeasurementProvider>>,
        fallback_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            fallback_timeout,
        }
    }
}

#[async_trait]
impl MeasurementProvider for FallbackProvider {
    async fn measure(&self, timeout: Duration) -> Result<Measurement, MeasurementError> {
        let primary_err = match self.primary.measure(timeout).await {
            Ok(m) => return Ok(m),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };

        warn!(
            primary = self.primary.name(),
            fallback = fallback.name(),
            error = %primary_err,
            "Primary measurement exhausted, trying fallback"
        );

        match measure_bounded(fallback.as_ref(), self.fallback_timeout).await {
            Ok(m) => {
                info!(provider = fallback.name(), "Fallback measurement succeeded");
                Ok(m)
            }
            Err(e) => Err(MeasurementError::Fatal(format!(
                "{} failed ({}); {} failed ({})",
                self.primary.name(),
                primary_err,
                fallback.name(),
                e
            ))),
        }
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
