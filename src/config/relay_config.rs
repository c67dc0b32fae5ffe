//! Relay Configuration - site identity, schedule, form wiring and probe tuning
//!
//! Every section implements `Default` with the values of the official-form
//! deployment, so a config file only needs to carry what differs (normally
//! just `[site]`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::submission::{FieldMapping, HiddenParameterSet};
use crate::types::{ScheduleSlot, SiteConfig};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration, loaded once at startup and never mutated afterwards.
///
/// Load with `RelayConfig::load()` which searches:
/// 1. `$SPEED_RELAY_CONFIG` env var
/// 2. `./relay_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// School / line identity (raw; validated into `SiteIdentity` at startup)
    #[serde(default)]
    pub site: SiteConfig,

    /// Fixed daily firing instants
    #[serde(default = "default_schedule")]
    pub schedule: Vec<ScheduleSlot>,

    /// Remote form wiring and submission tuning
    #[serde(default)]
    pub form: FormConfig,

    /// Probe endpoints, retry policy and external fallback
    #[serde(default)]
    pub measurement: MeasurementConfig,

    /// Local durability
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            schedule: default_schedule(),
            form: FormConfig::default(),
            measurement: MeasurementConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

fn default_schedule() -> Vec<ScheduleSlot> {
    vec![ScheduleSlot::new("07:00", 7, 0), ScheduleSlot::new("13:30", 13, 30)]
}

impl RelayConfig {
    /// Load configuration using the standard search order:
    /// 1. `$SPEED_RELAY_CONFIG` environment variable
    /// 2. `./relay_config.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// A file that exists but fails to load is an error: the relay must not
    /// silently run with an identity other than the one configured.
    pub fn load() -> Result<Self, ConfigError> {
        // 1. Check env var
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            let config = Self::load_from_file(&p)?;
            info!(path = %p.display(), school = %config.site.school_code, "Loaded relay config from {}", defaults::CONFIG_ENV_VAR);
            return Ok(config);
        }

        // 2. Check ./relay_config.toml
        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!(school = %config.site.school_code, "Loaded relay config from ./{}", defaults::CONFIG_FILE_NAME);
            return Ok(config);
        }

        // 3. Defaults
        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        // Two-pass: check for unknown keys first (warnings only)
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate structural invariants.
    ///
    /// Site identity enumerations are checked separately when the
    /// `SiteIdentity` is built, so the failure is reported as a
    /// `ValidationError` naming the allowed values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_schedule(&mut errors);
        self.validate_form(&mut errors);
        self.validate_measurement(&mut errors);

        if self.storage.run_log.as_os_str().is_empty() {
            errors.push("storage.run_log must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        if self.schedule.is_empty() {
            errors.push("schedule must contain at least one slot".to_string());
        }
        let mut labels = HashSet::new();
        for slot in &self.schedule {
            if slot.label.trim().is_empty() {
                errors.push("schedule slot label must not be empty".to_string());
            } else if !labels.insert(slot.label.as_str()) {
                errors.push(format!("schedule label '{}' is used more than once", slot.label));
            }
            if slot.hour > 23 {
                errors.push(format!("schedule '{}': hour {} must be 0-23", slot.label, slot.hour));
            }
            if slot.minute > 59 {
                errors.push(format!(
                    "schedule '{}': minute {} must be 0-59",
                    slot.label, slot.minute
                ));
            }
        }
    }

    fn validate_form(&self, errors: &mut Vec<String>) {
        let f = &self.form;
        check_url(&f.action_url, "form.action_url", false, errors);
        if let Some(ref referer) = f.referer_url {
            check_url(referer, "form.referer_url", false, errors);
        }
        if f.timeout_secs == 0 {
            errors.push("form.timeout_secs must be > 0".to_string());
        }
        if f.attempts_per_combination == 0 {
            errors.push("form.attempts_per_combination must be > 0".to_string());
        }

        let static_ids = f.fields.ids();
        for (name, id) in &static_ids {
            if id.trim().is_empty() {
                errors.push(format!("form.fields.{name} must not be empty"));
            }
        }

        if f.mappings.is_empty() {
            errors.push("form.mappings must contain at least one mapping".to_string());
        }
        let mut labels = HashSet::new();
        for mapping in &f.mappings {
            if !labels.insert(mapping.label.as_str()) {
                errors.push(format!("form.mappings label '{}' is used more than once", mapping.label));
            }
            let ids = mapping.target_ids();
            let mut seen = HashSet::new();
            for id in ids {
                if id.trim().is_empty() {
                    errors.push(format!("form.mappings '{}': field ids must not be empty", mapping.label));
                } else if !seen.insert(id) {
                    errors.push(format!(
                        "form.mappings '{}': field id '{}' is mapped twice",
                        mapping.label, id
                    ));
                }
                if static_ids.iter().any(|(_, s)| *s == id) {
                    errors.push(format!(
                        "form.mappings '{}': field id '{}' collides with a fixed field",
                        mapping.label, id
                    ));
                }
            }
        }

        let mut hidden_labels = HashSet::new();
        for set in &f.hidden_candidates {
            if !hidden_labels.insert(set.label.as_str()) {
                errors.push(format!(
                    "form.hidden_candidates label '{}' is used more than once",
                    set.label
                ));
            }
        }
    }

    fn validate_measurement(&self, errors: &mut Vec<String>) {
        let m = &self.measurement;
        let p = &m.probe;
        for (url, name) in [
            (&p.meta_url, "measurement.probe.meta_url"),
            (&p.latency_url, "measurement.probe.latency_url"),
            (&p.download_url, "measurement.probe.download_url"),
            (&p.upload_url, "measurement.probe.upload_url"),
        ] {
            check_url(url, name, true, errors);
        }
        if p.timeout_secs == 0 {
            errors.push("measurement.probe.timeout_secs must be > 0".to_string());
        }
        if p.latency_samples == 0 {
            errors.push("measurement.probe.latency_samples must be > 0".to_string());
        }
        if m.retry.max_attempts == 0 {
            errors.push("measurement.retry.max_attempts must be > 0".to_string());
        }
        if m.external.enabled && m.external.candidates.is_empty() {
            errors.push("measurement.external.candidates must not be empty when enabled".to_string());
        }
        if m.external.timeout_secs == 0 {
            errors.push("measurement.external.timeout_secs must be > 0".to_string());
        }
    }
}

fn check_url(url: &str, name: &str, https_only: bool, errors: &mut Vec<String>) {
    let ok = if https_only {
        url.starts_with("https://")
    } else {
        url.starts_with("https://") || url.starts_with("http://")
    };
    if !ok {
        let expected = if https_only { "https://" } else { "http(s)://" };
        errors.push(format!("{name} must start with {expected} (got '{url}')"));
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Form
// ============================================================================

/// Remote form wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormConfig {
    /// POST target (`.../formResponse`)
    #[serde(default = "default_action_url")]
    pub action_url: String,

    /// Referer header; defaults to the `viewform` variant of `action_url`
    #[serde(default)]
    pub referer_url: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for one POST (seconds)
    #[serde(default = "default_form_timeout")]
    pub timeout_secs: u64,

    /// POSTs per mapping/hidden combination before moving on
    #[serde(default = "default_attempts_per_combination")]
    pub attempts_per_combination: u32,

    /// Linear backoff unit between repeated POSTs of one combination (seconds)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Operator note appended to the notes field
    #[serde(default)]
    pub note: Option<String>,

    /// Field ids that are known for certain
    #[serde(default)]
    pub fields: StaticFieldIds,

    /// Ranked hypotheses for the four free-text field ids, most likely first
    #[serde(default = "default_mappings")]
    pub mappings: Vec<FieldMapping>,

    /// Hidden parameters sent with every submission
    #[serde(default = "default_hidden_always")]
    pub hidden_always: BTreeMap<String, String>,

    /// Ranked extra hidden parameter sets tried per mapping
    #[serde(default = "default_hidden_candidates")]
    pub hidden_candidates: Vec<HiddenParameterSet>,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            action_url: default_action_url(),
            referer_url: None,
            user_agent: default_user_agent(),
            timeout_secs: default_form_timeout(),
            attempts_per_combination: default_attempts_per_combination(),
            retry_backoff_secs: default_retry_backoff(),
            note: None,
            fields: StaticFieldIds::default(),
            mappings: default_mappings(),
            hidden_always: default_hidden_always(),
            hidden_candidates: default_hidden_candidates(),
        }
    }
}

impl FormConfig {
    /// Human-facing variant of the form, sent as `Referer`.
    pub fn referer(&self) -> String {
        self.referer_url
            .clone()
            .unwrap_or_else(|| self.action_url.replace("formResponse", "viewform"))
    }
}

fn default_action_url() -> String {
    defaults::FORM_ACTION_URL.to_string()
}
fn default_user_agent() -> String {
    defaults::BROWSER_USER_AGENT.to_string()
}
fn default_form_timeout() -> u64 {
    defaults::FORM_HTTP_TIMEOUT_SECS
}
fn default_attempts_per_combination() -> u32 {
    defaults::FORM_ATTEMPTS_PER_COMBINATION
}
fn default_retry_backoff() -> u64 {
    defaults::FORM_RETRY_BACKOFF_SECS
}

fn default_mappings() -> Vec<FieldMapping> {
    const A: &str = "entry.560537791";
    const B: &str = "entry.1862560773";
    const C: &str = "entry.181224386";
    const D: &str = "entry.556952249";
    vec![
        FieldMapping::new("document-order", A, B, C, D),
        FieldMapping::new("speed-notes-swapped", A, B, D, C),
        FieldMapping::new("name-line-swapped", B, A, C, D),
    ]
}

fn default_hidden_always() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("fvv".to_string(), "1".to_string()),
        ("pageHistory".to_string(), "0".to_string()),
    ])
}

fn default_hidden_candidates() -> Vec<HiddenParameterSet> {
    vec![
        HiddenParameterSet::new("without-fbzx", BTreeMap::new()),
        HiddenParameterSet::new(
            "with-fbzx",
            BTreeMap::from([("fbzx".to_string(), "8122308104194036559".to_string())]),
        ),
    ]
}

/// Field ids that are not subject to mapping uncertainty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticFieldIds {
    pub school_code: String,
    pub sector: String,
    pub provider: String,
    pub service_type: String,
}

impl Default for StaticFieldIds {
    fn default() -> Self {
        Self {
            school_code: "entry.899161738".to_string(),
            sector: "entry.1313908626".to_string(),
            provider: "entry.927675658".to_string(),
            service_type: "entry.66731299".to_string(),
        }
    }
}

impl StaticFieldIds {
    /// (config key, field id) pairs.
    pub fn ids(&self) -> [(&'static str, &str); 4] {
        [
            ("school_code", self.school_code.as_str()),
            ("sector", self.sector.as_str()),
            ("provider", self.provider.as_str()),
            ("service_type", self.service_type.as_str()),
        ]
    }
}

// ============================================================================
// Measurement
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeasurementConfig {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub external: ExternalProbeConfig,
}

/// In-process probe endpoints (https only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Key=value metadata document (client IP, serving location)
    #[serde(default = "default_meta_url")]
    pub meta_url: String,
    #[serde(default = "default_latency_url")]
    pub latency_url: String,
    #[serde(default = "default_download_url")]
    pub download_url: String,
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    #[serde(default = "default_latency_samples")]
    pub latency_samples: u32,
    #[serde(default = "default_upload_bytes")]
    pub upload_bytes: usize,
    /// Upper bound on one probe attempt (seconds)
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            meta_url: default_meta_url(),
            latency_url: default_latency_url(),
            download_url: default_download_url(),
            upload_url: default_upload_url(),
            latency_samples: default_latency_samples(),
            upload_bytes: default_upload_bytes(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_meta_url() -> String {
    defaults::PROBE_META_URL.to_string()
}
fn default_latency_url() -> String {
    defaults::PROBE_LATENCY_URL.to_string()
}
fn default_download_url() -> String {
    defaults::PROBE_DOWNLOAD_URL.to_string()
}
fn default_upload_url() -> String {
    defaults::PROBE_UPLOAD_URL.to_string()
}
fn default_latency_samples() -> u32 {
    defaults::PROBE_LATENCY_SAMPLES
}
fn default_upload_bytes() -> usize {
    defaults::PROBE_UPLOAD_BYTES
}
fn default_probe_timeout() -> u64 {
    defaults::PROBE_TIMEOUT_SECS
}

/// Retry policy for the in-process probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Rejected configuration fetch: wait `attempt × backoff_unit_secs`
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_secs: u64,
    /// Any other failure: fixed wait
    #[serde(default = "default_short_backoff")]
    pub short_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_unit_secs: default_backoff_unit(),
            short_backoff_secs: default_short_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    defaults::PROBE_MAX_ATTEMPTS
}
fn default_backoff_unit() -> u64 {
    defaults::PROBE_BACKOFF_UNIT_SECS
}
fn default_short_backoff() -> u64 {
    defaults::PROBE_SHORT_BACKOFF_SECS
}

/// External speed test binary used as fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalProbeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Binary names tried in order
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
    /// Arguments requesting JSON output
    #[serde(default = "default_external_args")]
    pub args: Vec<String>,
    #[serde(default = "default_external_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExternalProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            candidates: default_candidates(),
            args: default_external_args(),
            timeout_secs: default_external_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_candidates() -> Vec<String> {
    vec![
        "speedtest".to_string(),
        "speedtest.exe".to_string(),
        "speedtest-cli".to_string(),
    ]
}
fn default_external_args() -> Vec<String> {
    vec!["--json".to_string()]
}
fn default_external_timeout() -> u64 {
    defaults::EXTERNAL_PROBE_TIMEOUT_SECS
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// CSV run log (its directory also holds the process lock)
    #[serde(default = "default_run_log")]
    pub run_log: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            run_log: default_run_log(),
        }
    }
}

fn default_run_log() -> PathBuf {
    PathBuf::from(defaults::RUN_LOG_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.schedule.len(), 2);
        assert_eq!(config.form.mappings.len(), 3);
        assert_eq!(config.form.hidden_candidates.len(), 2);
    }

    #[test]
    fn test_referer_derived_from_action_url() {
        let form = FormConfig::default();
        assert!(form.referer().ends_with("/viewform"));
        assert!(!form.referer().contains("formResponse"));
    }

    #[test]
    fn test_duplicate_schedule_label_rejected() {
        let mut config = RelayConfig::default();
        config.schedule.push(ScheduleSlot::new("07:00", 19, 0));
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("used more than once")));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_slot_rejected() {
        let mut config = RelayConfig::default();
        config.schedule = vec![ScheduleSlot::new("late", 24, 75)];
        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_mapping_with_repeated_id_rejected() {
        let mut config = RelayConfig::default();
        config.form.mappings = vec![FieldMapping::new("bad", "entry.1", "entry.1", "entry.2", "entry.3")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mapping_colliding_with_static_field_rejected() {
        let mut config = RelayConfig::default();
        config.form.mappings = vec![FieldMapping::new(
            "bad",
            "entry.899161738",
            "entry.2",
            "entry.3",
            "entry.4",
        )];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_plain_http_probe_rejected() {
        let mut config = RelayConfig::default();
        config.measurement.probe.download_url = "http://example.com/down".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
[site]
school_code = "1561"
sector = "السيب"

[[schedule]]
label = "morning"
hour = 8
minute = 15
"#;
        let config = RelayConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.site.school_code, "1561");
        assert_eq!(config.schedule, vec![ScheduleSlot::new("morning", 8, 15)]);
        assert_eq!(config.form.mappings.len(), 3);
        assert_eq!(config.measurement.retry.max_attempts, 3);
        assert_eq!(
            config.form.attempts_per_combination,
            defaults::FORM_ATTEMPTS_PER_COMBINATION
        );
        assert_eq!(config.form.retry_backoff_secs, defaults::FORM_RETRY_BACKOFF_SECS);
    }

    #[test]
    fn test_partial_form_fields_keep_other_ids() {
        let toml_str = r#"
[form.fields]
sector = "entry.42"
"#;
        let config = RelayConfig::from_toml_str(toml_str).unwrap();
        let fields = &config.form.fields;
        assert_eq!(fields.sector, "entry.42");
        assert_eq!(fields.school_code, StaticFieldIds::default().school_code);
        assert_eq!(fields.provider, StaticFieldIds::default().provider);
        assert_eq!(fields.service_type, StaticFieldIds::default().service_type);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = RelayConfig::default();
        let text = config.to_toml().unwrap();
        let back = RelayConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.form.mappings, config.form.mappings);
        assert_eq!(back.schedule, config.schedule);
    }
}
