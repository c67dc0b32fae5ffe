//! Config Validation Tests
//!
//! Exercise loading, typo detection and structural validation of
//! `relay_config.toml` independently from the rest of the relay.

use std::fs;

use speed_relay::config::validation::{known_config_keys, suggest_correction, validate_unknown_keys};
use speed_relay::config::{ConfigError, RelayConfig};
use speed_relay::types::{Provider, Sector, ServiceType, SiteIdentity};

const FULL_CONFIG: &str = r#"
[site]
school_code = "1561"
sector = "السيب"
school_name = "مدرسة ابو القاسم الزهراوي"
provider = "عمانتل"
line_number = "24424428"
service_type = "فايبر"
device_name = "LAB-PC-01"

[[schedule]]
label = "07:00"
hour = 7
minute = 0

[[schedule]]
label = "13:30"
hour = 13
minute = 30

[form]
attempts_per_combination = 2
note = "weekly check"

[[form.mappings]]
label = "document-order"
name = "entry.560537791"
line_number = "entry.1862560773"
speed_text = "entry.181224386"
notes = "entry.556952249"

[form.hidden_always]
fvv = "1"
pageHistory = "0"

[[form.hidden_candidates]]
label = "without-fbzx"

[[form.hidden_candidates]]
label = "with-fbzx"
params = { fbzx = "8122308104194036559" }

[measurement.retry]
max_attempts = 3
backoff_unit_secs = 20
short_backoff_secs = 5

[measurement.external]
candidates = ["speedtest"]
timeout_secs = 180

[storage]
run_log = "logs/speed_log.csv"
"#;

// ============================================================================
// Loading
// ============================================================================

#[test]
fn full_config_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay_config.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    let config = RelayConfig::load_from_file(&path).unwrap();
    assert_eq!(config.schedule.len(), 2);
    assert_eq!(config.form.mappings.len(), 1);
    assert_eq!(config.form.hidden_candidates[1].params["fbzx"], "8122308104194036559");
    assert_eq!(config.form.attempts_per_combination, 2);
    assert_eq!(config.form.note.as_deref(), Some("weekly check"));

    let site = SiteIdentity::try_from(&config.site).unwrap();
    assert_eq!(site.sector, Sector::Seeb);
    assert_eq!(site.provider, Provider::Omantel);
    assert_eq!(site.service_type, ServiceType::Fiber);
}

#[test]
fn full_config_produces_zero_warnings() {
    let warnings = validate_unknown_keys(FULL_CONFIG);
    assert!(warnings.is_empty(), "Expected 0 warnings, got: {:?}", warnings);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RelayConfig::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_, _)));
}

#[test]
fn parse_error_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[site\nschool_code = 1").unwrap();

    let err = RelayConfig::load_from_file(&path).unwrap_err();
    match &err {
        ConfigError::Parse(p, _) => assert_eq!(p, &path),
        other => panic!("expected parse error, got {other}"),
    }
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn wrong_value_type_is_parse_error() {
    let err = RelayConfig::from_toml_str("[[schedule]]\nlabel = \"a\"\nhour = \"seven\"\nminute = 0\n")
        .unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_, _)));
}

// ============================================================================
// Structural Validation
// ============================================================================

#[test]
fn validation_collects_every_problem() {
    let toml_str = r#"
[[schedule]]
label = "morning"
hour = 31
minute = 0

[[schedule]]
label = "morning"
hour = 7
minute = 99

[form]
timeout_secs = 0
mappings = []
"#;
    match RelayConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("hour 31")));
            assert!(errors.iter().any(|e| e.contains("minute 99")));
            assert!(errors.iter().any(|e| e.contains("used more than once")));
            assert!(errors.iter().any(|e| e.contains("form.timeout_secs")));
            assert!(errors.iter().any(|e| e.contains("at least one mapping")));
        }
        other => panic!("expected validation error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn validation_error_display_lists_items() {
    let err = ConfigError::Validation(vec!["first".to_string(), "second".to_string()]);
    let text = err.to_string();
    assert!(text.starts_with("Config validation failed:"));
    assert!(text.contains("  - first"));
    assert!(text.contains("  - second"));
}

#[test]
fn empty_schedule_rejected() {
    let mut config = RelayConfig::default();
    config.schedule.clear();
    assert!(config.validate().is_err());
}

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_retry_section_warns_with_suggestion() {
    let toml_str = r#"
[measurement.retry]
max_atempts = 5
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("measurement.retry.max_attempts")
    );
    assert!(warnings[0].to_string().contains("did you mean"));
}

#[test]
fn typo_inside_schedule_entry_warns() {
    let toml_str = r#"
[[schedule]]
label = "07:00"
hour = 7
minuet = 0
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "schedule.minuet");
    assert_eq!(warnings[0].suggestion.as_deref(), Some("schedule.minute"));
}

#[test]
fn unknown_keys_do_not_block_loading() {
    let config = RelayConfig::from_toml_str("[storage]\nrun_log = \"x.csv\"\nrotate = true\n").unwrap();
    assert_eq!(config.storage.run_log.to_string_lossy(), "x.csv");
}

#[test]
fn known_keys_cover_all_sections() {
    let known = known_config_keys();
    for section in ["site", "schedule", "form", "measurement", "storage"] {
        assert!(known.contains(section), "missing section {section}");
    }
    assert!(known.contains("form.mappings.speed_text"));
    assert!(known.contains("measurement.external.candidates"));
    assert!(suggest_correction("site.sectr", &known).as_deref() == Some("site.sector"));
}
