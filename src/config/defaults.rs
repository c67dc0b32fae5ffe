//! System-wide default constants.
//!
//! Centralises magic numbers used by the relay.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Scheduler
// ============================================================================

/// Longest single sleep before the remaining time is recomputed (seconds).
///
/// Bounds how long clock adjustments or a host suspend can go unnoticed.
pub const SLEEP_CHUNK_SECS: u64 = 300;

/// Pause after a wake cycle that fired at least one slot (seconds).
pub const CATCH_UP_PAUSE_SECS: u64 = 30;

// ============================================================================
// Measurement
// ============================================================================

/// Attempts made by the in-process probe before falling back.
pub const PROBE_MAX_ATTEMPTS: u32 = 3;

/// Backoff unit after a rejected probe configuration fetch (seconds).
/// Attempt `n` waits `n × unit`.
pub const PROBE_BACKOFF_UNIT_SECS: u64 = 20;

/// Fixed backoff after any other probe failure (seconds).
pub const PROBE_SHORT_BACKOFF_SECS: u64 = 5;

/// Upper bound on one in-process probe attempt (seconds).
pub const PROBE_TIMEOUT_SECS: u64 = 120;

/// Upper bound on one external probe invocation (seconds).
pub const EXTERNAL_PROBE_TIMEOUT_SECS: u64 = 180;

/// Small requests timed to estimate latency.
pub const PROBE_LATENCY_SAMPLES: u32 = 5;

/// Payload size for the upload leg (bytes). 10 MB.
pub const PROBE_UPLOAD_BYTES: usize = 10_000_000;

pub const PROBE_META_URL: &str = "https://speed.cloudflare.com/cdn-cgi/trace";
pub const PROBE_LATENCY_URL: &str = "https://speed.cloudflare.com/__down?bytes=0";
pub const PROBE_DOWNLOAD_URL: &str = "https://speed.cloudflare.com/__down?bytes=25000000";
pub const PROBE_UPLOAD_URL: &str = "https://speed.cloudflare.com/__up";

// ============================================================================
// Submission
// ============================================================================

/// Timeout for a single form POST (seconds).
pub const FORM_HTTP_TIMEOUT_SECS: u64 = 30;

/// POSTs per mapping/hidden combination before moving to the next one.
pub const FORM_ATTEMPTS_PER_COMBINATION: u32 = 1;

/// Backoff unit between repeated POSTs of one combination (seconds).
pub const FORM_RETRY_BACKOFF_SECS: u64 = 2;

/// Characters of the response body kept for logging and the run log.
pub const RESPONSE_EXCERPT_CHARS: usize = 500;

/// Generic desktop browser user agent sent with form submissions.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Official Muscat directorate form.
pub const FORM_ACTION_URL: &str = "https://docs.google.com/forms/u/2/d/e/1FAIpQLSfoYtl3gmt9FYa7g39v4az1OOtrkYHDcfAX6M-vhI6J-hX50A/formResponse";

// ============================================================================
// Storage
// ============================================================================

/// Default run log location, relative to the working directory.
pub const RUN_LOG_PATH: &str = "logs/speed_log.csv";

/// Default config file searched in the working directory.
pub const CONFIG_FILE_NAME: &str = "relay_config.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SPEED_RELAY_CONFIG";
