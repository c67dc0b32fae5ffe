//! External speed test binary (fallback strategy).
//!
//! Two JSON shapes are understood:
//!
//! - **Nested** (`"type": "result"`): typed sub-objects, bandwidth in bytes/s
//! - **Flat**: top-level `download`/`upload`/`ping`/`server`/`client`,
//!   bandwidth in bits/s
//!
//! Both are normalised with the same conversion to Mbps.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{MeasurementError, MeasurementProvider};
use crate::config::ExternalProbeConfig;
use crate::types::{bits_per_sec_to_mbps, bytes_per_sec_to_mbps, Measurement};

// ============================================================================
// Report Schemas
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NestedReport {
    pub download: NestedBandwidth,
    pub upload: NestedBandwidth,
    pub ping: NestedPing,
    #[serde(default)]
    pub server: Option<NestedServer>,
    #[serde(default)]
    pub interface: Option<NestedInterface>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NestedBandwidth {
    /// Bytes per second
    pub bandwidth: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NestedPing {
    pub latency: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NestedServer {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NestedInterface {
    #[serde(default, rename = "externalIp")]
    pub external_ip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlatReport {
    /// Bits per second
    pub download: f64,
    /// Bits per second
    pub upload: f64,
    pub ping: f64,
    #[serde(default)]
    pub server: Option<FlatServer>,
    #[serde(default)]
    pub client: Option<FlatClient>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlatServer {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub sponsor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlatClient {
    #[serde(default)]
    pub ip: Option<String>,
}

/// Parsed output of the external binary, discriminated by schema.
#[derive(Debug, Clone)]
pub enum ProbeReport {
    Nested(NestedReport),
    Flat(FlatReport),
}

impl ProbeReport {
    /// Parse stdout. Tools that print progress lines before the result are
    /// handled by falling back to the last line that parses.
    pub fn parse(stdout: &str) -> Result<Self, MeasurementError> {
        if let Ok(report) = Self::parse_document(stdout.trim()) {
            return Ok(report);
        }
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .filter(|l| l.starts_with('{'))
            .find_map(|l| Self::parse_document(l).ok())
            .ok_or_else(|| {
                MeasurementError::Fatal("external probe output matches no known schema".to_string())
            })
    }

    fn parse_document(doc: &str) -> Result<Self, MeasurementError> {
        let value: serde_json::Value = serde_json::from_str(doc)
            .map_err(|e| MeasurementError::Fatal(format!("external probe output is not JSON: {e}")))?;

        let schema_err = |e: serde_json::Error| MeasurementError::Fatal(format!("external probe schema: {e}"));
        if value.get("type").and_then(|t| t.as_str()) == Some("result") {
            serde_json::from_value(value).map(ProbeReport::Nested).map_err(schema_err)
        } else if ["download", "upload", "ping"].iter().all(|k| value.get(k).is_some_and(|v| v.is_number())) {
            serde_json::from_value(value).map(ProbeReport::Flat).map_err(schema_err)
        } else {
            Err(MeasurementError::Fatal("external probe output matches no known schema".to_string()))
        }
    }

    pub fn into_measurement(self, taken_at: DateTime<Local>) -> Measurement {
        match self {
            ProbeReport::Nested(r) => {
                let server = r
                    .server
                    .and_then(|s| s.host.or(s.name))
                    .unwrap_or_default();
                let ip = r.interface.and_then(|i| i.external_ip).unwrap_or_default();
                Measurement::new(
                    bytes_per_sec_to_mbps(r.download.bandwidth),
                    bytes_per_sec_to_mbps(r.upload.bandwidth),
                    r.ping.latency,
                    server,
                    ip,
                    taken_at,
                )
            }
            ProbeReport::Flat(r) => {
                let server = r
                    .server
                    .and_then(|s| s.host.or(s.sponsor))
                    .unwrap_or_default();
                let ip = r.client.and_then(|c| c.ip).unwrap_or_default();
                Measurement::new(
                    bits_per_sec_to_mbps(r.download),
                    bits_per_sec_to_mbps(r.upload),
                    r.ping,
                    server,
                    ip,
                    taken_at,
                )
            }
        }
    }
}

// ============================================================================
// External Probe
// ============================================================================

pub struct ExternalProbe {
    candidates: Vec<String>,
    args: Vec<String>,
}

impl ExternalProbe {
    pub fn new(candidates: Vec<String>, args: Vec<String>) -> Self {
        Self { candidates, args }
    }

    pub fn from_config(config: &ExternalProbeConfig) -> Self {
        Self::new(config.candidates.clone(), config.args.clone())
    }

    /// Candidate binaries that resolve on PATH (or as given paths), in order.
    fn resolve(&self) -> Vec<PathBuf> {
        self.candidates
            .iter()
            .filter_map(|name| match which::which(name) {
                Ok(path) => Some(path),
                Err(_) => {
                    debug!(candidate = %name, "External probe candidate not found");
                    None
                }
            })
            .collect()
    }

    async fn run(&self, binary: &PathBuf) -> Result<Measurement, MeasurementError> {
        let output = Command::new(binary)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MeasurementError::Fatal(format!("failed to spawn '{}': {}", binary.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MeasurementError::Fatal(format!(
                "'{}' exited with {}: {}",
                binary.display(),
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(ProbeReport::parse(&stdout)?.into_measurement(Local::now()))
    }
}

#[async_trait]
impl MeasurementProvider for ExternalProbe {
    async fn measure(&self, timeout: Duration) -> Result<Measurement, MeasurementError> {
        let binaries = self.resolve();
        if binaries.is_empty() {
            return Err(MeasurementError::Fatal(format!(
                "no external speed test binary found (tried {})",
                self.candidates.join(", ")
            )));
        }

        let mut last_err = None;
        for binary in &binaries {
            info!(binary = %binary.display(), "Running external speed test");
            let result = tokio::time::timeout(timeout, self.run(binary))
                .await
                .unwrap_or(Err(MeasurementError::Timeout(timeout)));
            match result {
                Ok(m) => return Ok(m),
                Err(e) => {
                    warn!(binary = %binary.display(), error = %e, "External speed test failed");
                    last_err = Some(e);
                }
            }
        }

        Err(MeasurementError::Fatal(match last_err {
            Some(e) => e.to_string(),
            None => "external speed test produced no result".to_string(),
        }))
    }

    fn name(&self) -> &str {
        "external"
    }
}
