//! Speed measurement types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Bits in one megabit (decimal, as reported by speed test tools).
pub const BITS_PER_MEGABIT: f64 = 1_000_000.0;

/// Bits in one byte.
pub const BITS_PER_BYTE: f64 = 8.0;

/// One completed throughput/latency measurement.
///
/// Immutable once produced: all fields are read through accessors and the
/// only way in is [`Measurement::new`], which enforces the non-negative
/// invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMeasurement")]
pub struct Measurement {
    download_mbps: f64,
    upload_mbps: f64,
    ping_ms: f64,
    server_host: String,
    client_ip: String,
    taken_at: DateTime<Local>,
}

impl Measurement {
    /// Build a measurement, rounding to two decimals.
    ///
    /// Negative or non-finite readings are clamped to 0.
    pub fn new(
        download_mbps: f64,
        upload_mbps: f64,
        ping_ms: f64,
        server_host: impl Into<String>,
        client_ip: impl Into<String>,
        taken_at: DateTime<Local>,
    ) -> Self {
        Self {
            download_mbps: round2(download_mbps),
            upload_mbps: round2(upload_mbps),
            ping_ms: round2(ping_ms),
            server_host: non_empty_or_unknown(server_host.into()),
            client_ip: non_empty_or_unknown(client_ip.into()),
            taken_at,
        }
    }

    pub fn download_mbps(&self) -> f64 {
        self.download_mbps
    }

    pub fn upload_mbps(&self) -> f64 {
        self.upload_mbps
    }

    pub fn ping_ms(&self) -> f64 {
        self.ping_ms
    }

    pub fn server_host(&self) -> &str {
        &self.server_host
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn taken_at(&self) -> DateTime<Local> {
        self.taken_at
    }
}

/// Wire form of [`Measurement`]; deserialized values go through
/// [`Measurement::new`] like every other reading.
#[derive(Deserialize)]
struct RawMeasurement {
    download_mbps: f64,
    upload_mbps: f64,
    ping_ms: f64,
    server_host: String,
    client_ip: String,
    taken_at: DateTime<Local>,
}

impl From<RawMeasurement> for Measurement {
    fn from(raw: RawMeasurement) -> Self {
        Measurement::new(
            raw.download_mbps,
            raw.upload_mbps,
            raw.ping_ms,
            raw.server_host,
            raw.client_ip,
            raw.taken_at,
        )
    }
}

/// Convert a bits-per-second reading to megabits per second.
pub fn bits_per_sec_to_mbps(bits_per_sec: f64) -> f64 {
    bits_per_sec / BITS_PER_MEGABIT
}

/// Convert a bytes-per-second reading to megabits per second.
pub fn bytes_per_sec_to_mbps(bytes_per_sec: f64) -> f64 {
    bits_per_sec_to_mbps(bytes_per_sec * BITS_PER_BYTE)
}

fn round2(value: f64) -> f64 {
    if !value.is_finite() || value < 0.0 {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}

fn non_empty_or_unknown(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_to_two_decimals() {
        let m = Measurement::new(45.2049, 10.106, 18.4, "host", "1.2.3.4", Local::now());
        assert_eq!(m.download_mbps(), 45.2);
        assert_eq!(m.upload_mbps(), 10.11);
        assert_eq!(m.ping_ms(), 18.4);
    }

    #[test]
    fn test_negative_and_nan_clamped() {
        let m = Measurement::new(-3.0, f64::NAN, f64::INFINITY, "", "  ", Local::now());
        assert_eq!(m.download_mbps(), 0.0);
        assert_eq!(m.upload_mbps(), 0.0);
        assert_eq!(m.ping_ms(), 0.0);
        assert_eq!(m.server_host(), "unknown");
        assert_eq!(m.client_ip(), "unknown");
    }

    #[test]
    fn test_deserialized_readings_are_clamped() {
        let json = r#"{
            "download_mbps": -12.5,
            "upload_mbps": 3.456,
            "ping_ms": 18.4,
            "server_host": "",
            "client_ip": "5.36.10.20",
            "taken_at": "2025-03-02T07:00:05+04:00"
        }"#;
        let m: Measurement = serde_json::from_str(json).unwrap();
        assert_eq!(m.download_mbps(), 0.0);
        assert_eq!(m.upload_mbps(), 3.46);
        assert_eq!(m.server_host(), "unknown");

        let back: Measurement = serde_json::from_str(&serde_json::to_string(&m).unwrap()).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_unit_conversions_agree() {
        // 12.5 MB/s and 100 Mbit/s are the same rate
        assert_eq!(bytes_per_sec_to_mbps(12_500_000.0), 100.0);
        assert_eq!(bits_per_sec_to_mbps(100_000_000.0), 100.0);
    }
}
