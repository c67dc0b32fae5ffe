//! Startup wiring from a loaded `RelayConfig`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::relay::RelayPipeline;
use crate::config::RelayConfig;
use crate::measurement::{
    ExternalProbe, FallbackProvider, HttpProbe, MeasurementError, MeasurementProvider, RetryPolicy,
    RetryingProvider,
};
use crate::storage::{ProcessLock, RunLog, RunLogError};
use crate::submission::{ReqwestTransport, SubmissionEngine, TransportError};
use crate::types::{SiteIdentity, ValidationError};

/// Runtime switches that do not live in the config file.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// `false` = measure and record only
    pub submit: bool,
    /// Overrides `form.note`
    pub note: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            submit: true,
            note: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid site identity: {0}")]
    Validation(#[from] ValidationError),
    #[error("cannot build measurement probe: {0}")]
    Probe(#[from] MeasurementError),
    #[error("cannot build form transport: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    RunLog(#[from] RunLogError),
    #[error("{0:#}")]
    Lock(anyhow::Error),
}

/// Validate the site identity, then wire providers, engine and run log.
///
/// Identity validation runs before anything touching the network or the
/// filesystem is created, so a bad identity never produces a log row.
pub fn build_pipeline(config: &RelayConfig, options: RunOptions) -> Result<RelayPipeline, StartupError> {
    let site = SiteIdentity::try_from(&config.site)?;
    info!(
        school = %site.school_code,
        sector = %site.sector,
        provider = %site.provider,
        service = %site.service_type,
        device = %site.device_name,
        "Site identity validated"
    );

    let provider = build_provider(config)?;

    let engine = if options.submit {
        let transport = ReqwestTransport::new(&config.form)?;
        info!(action_url = %transport.action_url(), "Form submission enabled");
        let engine = SubmissionEngine::from_config(&config.form, Arc::new(transport));
        Some(match options.note {
            Some(note) => engine.with_note(Some(note)),
            None => engine,
        })
    } else {
        info!("Form submission disabled (measure-only)");
        None
    };

    let sink = RunLog::open(&config.storage.run_log)?;

    Ok(RelayPipeline::new(
        site,
        provider,
        engine,
        Arc::new(sink),
        Duration::from_secs(config.measurement.probe.timeout_secs),
    ))
}

/// Daemon startup: build the pipeline, then take the single-daemon lock
/// next to the run log.
pub fn start_daemon(
    config: &RelayConfig,
    options: RunOptions,
) -> Result<(RelayPipeline, ProcessLock), StartupError> {
    let pipeline = build_pipeline(config, options)?;
    let lock = ProcessLock::acquire(lock_dir(&config.storage.run_log)).map_err(StartupError::Lock)?;
    Ok((pipeline, lock))
}

/// The lock lives next to the run log.
pub fn lock_dir(run_log: &Path) -> PathBuf {
    match run_log.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn build_provider(config: &RelayConfig) -> Result<Arc<dyn MeasurementProvider>, StartupError> {
    let m = &config.measurement;
    let primary = RetryingProvider::new(
        Arc::new(HttpProbe::new(&m.probe)?),
        RetryPolicy::from_config(&m.retry),
    );

    let fallback: Option<Arc<dyn MeasurementProvider>> = if m.external.enabled {
        Some(Arc::new(ExternalProbe::from_config(&m.external)))
    } else {
        None
    };

    Ok(Arc::new(FallbackProvider::new(
        Arc::new(primary),
        fallback,
        Duration::from_secs(m.external.timeout_secs),
    )))
}
