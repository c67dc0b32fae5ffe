//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for RelayConfig.
///
/// Entries of an array of tables share their array's path (`schedule.hour`
/// for every `[[schedule]]` entry). Must be kept in step with
/// relay_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [site]
        "site",
        "site.school_code",
        "site.sector",
        "site.school_name",
        "site.provider",
        "site.line_number",
        "site.service_type",
        "site.device_name",
        // [[schedule]]
        "schedule",
        "schedule.label",
        "schedule.hour",
        "schedule.minute",
        // [form]
        "form",
        "form.action_url",
        "form.referer_url",
        "form.user_agent",
        "form.timeout_secs",
        "form.attempts_per_combination",
        "form.retry_backoff_secs",
        "form.note",
        "form.fields",
        "form.fields.school_code",
        "form.fields.sector",
        "form.fields.provider",
        "form.fields.service_type",
        "form.mappings",
        "form.mappings.label",
        "form.mappings.name",
        "form.mappings.line_number",
        "form.mappings.speed_text",
        "form.mappings.notes",
        "form.hidden_always",
        "form.hidden_candidates",
        "form.hidden_candidates.label",
        "form.hidden_candidates.params",
        // [measurement.probe]
        "measurement",
        "measurement.probe",
        "measurement.probe.meta_url",
        "measurement.probe.latency_url",
        "measurement.probe.download_url",
        "measurement.probe.upload_url",
        "measurement.probe.latency_samples",
        "measurement.probe.upload_bytes",
        "measurement.probe.timeout_secs",
        // [measurement.retry]
        "measurement.retry",
        "measurement.retry.max_attempts",
        "measurement.retry.backoff_unit_secs",
        "measurement.retry.short_backoff_secs",
        // [measurement.external]
        "measurement.external",
        "measurement.external.enabled",
        "measurement.external.candidates",
        "measurement.external.args",
        "measurement.external.timeout_secs",
        // [storage]
        "storage",
        "storage.run_log",
    ];
    keys.iter().copied().collect()
}

/// Tables whose keys are arbitrary form parameter names.
const FREE_FORM_TABLES: &[&str] = &["form.hidden_always", "form.hidden_candidates.params"];

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`. Tables listed in `FREE_FORM_TABLES` are reported
/// but not descended into.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if FREE_FORM_TABLES.contains(&path.as_str()) {
                continue;
            }
            match v {
                toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
                toml::Value::Array(items) => {
                    for item in items.iter().filter(|i| i.is_table()) {
                        for nested in walk_toml_keys(item, &path) {
                            if !keys.contains(&nested) {
                                keys.push(nested);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("schol_code", "school_code"), 1);
    }

    #[test]
    fn test_levenshtein_counts_chars_not_bytes() {
        assert_eq!(levenshtein("مسقط", "مسقط"), 0);
        assert_eq!(levenshtein("مسقط", "مسق"), 1);
    }

    #[test]
    fn test_walk_toml_keys_array_of_tables() {
        let toml: toml::Value = r#"
            [[schedule]]
            label = "a"
            hour = 7

            [[schedule]]
            label = "b"
            hour = 13
        "#
        .parse()
        .unwrap();
        let mut keys = walk_toml_keys(&toml, "");
        keys.sort();
        assert_eq!(keys, vec!["schedule", "schedule.hour", "schedule.label"]);
    }

    #[test]
    fn test_hidden_parameter_tables_are_free_form() {
        let toml_str = r#"
[form.hidden_always]
fvv = "1"
pageHistory = "0"
draftResponse = "[]"

[[form.hidden_candidates]]
label = "with-fbzx"
params = { fbzx = "8122308104194036559" }
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {:?}", warnings);
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[site]
schol_code = "1561"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "site.schol_code");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("site.school_code"));
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[site]
school_code = "1561"
sector = "seeb"

[[schedule]]
label = "07:00"
hour = 7
minute = 0

[measurement.retry]
max_attempts = 5

[storage]
run_log = "logs/run.csv"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {:?}", warnings);
    }

    #[test]
    fn test_unknown_section_produces_warning() {
        let toml_str = r#"
[measurement.typo_section]
some_field = 42
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.iter().any(|w| w.field.contains("typo_section")));
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }
}
