//! In-process HTTP speed probe.
//!
//! One attempt runs four legs against the configured endpoints:
//! metadata (client IP and serving location), latency (best of N empty
//! GETs), download (streamed GET) and upload (POST of random bytes).

use async_trait::async_trait;
use chrono::Local;
use rand::RngCore;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{MeasurementError, MeasurementProvider};
use crate::config::ProbeConfig;
use crate::types::{bits_per_sec_to_mbps, Measurement, BITS_PER_BYTE};

/// Statuses meaning the probe service refused us rather than failed.
const REJECTED_STATUSES: [u16; 3] = [403, 429, 503];

/// Fields of the key=value metadata document that the probe uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeMeta {
    pub ip: Option<String>,
    pub colo: Option<String>,
}

impl ProbeMeta {
    pub fn parse(body: &str) -> Self {
        let mut meta = Self::default();
        for line in body.lines() {
            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "ip" => meta.ip = Some(value.trim().to_string()),
                    "colo" => meta.colo = Some(value.trim().to_string()),
                    _ => {}
                }
            }
        }
        meta
    }
}

pub struct HttpProbe {
    http: reqwest::Client,
    config: ProbeConfig,
}

impl HttpProbe {
    /// Build a probe that refuses plain-http endpoints.
    pub fn new(config: &ProbeConfig) -> Result<Self, MeasurementError> {
        let http = reqwest::Client::builder()
            .https_only(true)
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| MeasurementError::Fatal(format!("cannot build probe client: {e}")))?;
        Ok(Self::with_client(http, config.clone()))
    }

    /// Use a caller-supplied client.
    pub fn with_client(http: reqwest::Client, config: ProbeConfig) -> Self {
        Self { http, config }
    }

    async fn fetch_meta(&self) -> Result<(ProbeMeta, String), MeasurementError> {
        let resp = self.http.get(&self.config.meta_url).send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        if REJECTED_STATUSES.contains(&status) {
            return Err(MeasurementError::Rejected { status });
        }
        if !resp.status().is_success() {
            return Err(MeasurementError::Transient(format!("metadata returned HTTP {status}")));
        }
        let host = resp.url().host_str().unwrap_or("unknown").to_string();
        let body = resp.text().await.map_err(classify)?;
        Ok((ProbeMeta::parse(&body), host))
    }

    async fn latency_ms(&self) -> Result<f64, MeasurementError> {
        let mut best: Option<Duration> = None;
        for _ in 0..self.config.latency_samples.max(1) {
            let started = Instant::now();
            let resp = self.http.get(&self.config.latency_url).send().await.map_err(classify)?;
            let elapsed = started.elapsed();
            check_status(&resp, "latency")?;
            // drain so the connection is reused for the next sample
            let _ = resp.bytes().await;
            best = Some(best.map_or(elapsed, |b| b.min(elapsed)));
        }
        Ok(best.unwrap_or_default().as_secs_f64() * 1000.0)
    }

    async fn download_mbps(&self) -> Result<f64, MeasurementError> {
        let started = Instant::now();
        let mut resp = self.http.get(&self.config.download_url).send().await.map_err(classify)?;
        check_status(&resp, "download")?;
        let mut bytes: u64 = 0;
        while let Some(chunk) = resp.chunk().await.map_err(classify)? {
            bytes += chunk.len() as u64;
        }
        Ok(throughput_mbps(bytes, started.elapsed()))
    }

    async fn upload_mbps(&self) -> Result<f64, MeasurementError> {
        let mut payload = vec![0u8; self.config.upload_bytes];
        rand::thread_rng().fill_bytes(&mut payload);
        let bytes = payload.len() as u64;

        let started = Instant::now();
        let resp = self
            .http
            .post(&self.config.upload_url)
            .body(payload)
            .send()
            .await
            .map_err(classify)?;
        check_status(&resp, "upload")?;
        let elapsed = started.elapsed();
        let _ = resp.bytes().await;
        Ok(throughput_mbps(bytes, elapsed))
    }
}

#[async_trait]
impl MeasurementProvider for HttpProbe {
    async fn measure(&self, timeout: Duration) -> Result<Measurement, MeasurementError> {
        let run = async {
            let (meta, host) = self.fetch_meta().await?;
            let ping = self.latency_ms().await?;
            let download = self.download_mbps().await?;
            let upload = self.upload_mbps().await?;
            debug!(download, upload, ping, colo = ?meta.colo, "HTTP probe legs complete");

            let server = match meta.colo {
                Some(colo) => format!("{host} ({colo})"),
                None => host,
            };
            Ok(Measurement::new(
                download,
                upload,
                ping,
                server,
                meta.ip.unwrap_or_default(),
                Local::now(),
            ))
        };

        tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| MeasurementError::Timeout(timeout))?
    }

    fn name(&self) -> &str {
        "http-probe"
    }
}

fn classify(e: reqwest::Error) -> MeasurementError {
    if e.is_builder() {
        MeasurementError::Fatal(format!("invalid probe request: {e}"))
    } else {
        MeasurementError::Transient(e.to_string())
    }
}

fn check_status(resp: &reqwest::Response, leg: &str) -> Result<(), MeasurementError> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(MeasurementError::Transient(format!(
            "{leg} returned HTTP {}",
            resp.status().as_u16()
        )))
    }
}

/// Megabits per second for `bytes` moved in `elapsed`.
pub fn throughput_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bits_per_sec_to_mbps(bytes as f64 * BITS_PER_BYTE / secs)
}
