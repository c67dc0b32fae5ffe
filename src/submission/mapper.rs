//! Ranked field-mapping hypotheses and payload construction.
//!
//! The remote form's four free-text field ids are only partially known. Each
//! [`FieldMapping`] is one guess at which id receives which value; the
//! [`SubmissionMapper`] holds the guesses in rank order together with the
//! hidden parameter variants and turns a (mapping, hidden set) pair into a
//! concrete key→value payload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{FormConfig, StaticFieldIds};
use crate::types::{Measurement, SiteIdentity, TIMESTAMP_FORMAT};

// ============================================================================
// Hypotheses
// ============================================================================

/// One hypothesis about which opaque field id carries which free-text value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Recorded in the run log when this mapping is accepted
    pub label: String,
    /// Field id receiving the school name
    pub name: String,
    /// Field id receiving the line number
    pub line_number: String,
    /// Field id receiving the "<download> Mbps" text
    pub speed_text: String,
    /// Field id receiving the detailed notes
    pub notes: String,
}

impl FieldMapping {
    pub fn new(
        label: impl Into<String>,
        name: impl Into<String>,
        line_number: impl Into<String>,
        speed_text: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            name: name.into(),
            line_number: line_number.into(),
            speed_text: speed_text.into(),
            notes: notes.into(),
        }
    }

    /// The four target ids in logical-field order.
    pub fn target_ids(&self) -> [&str; 4] {
        [
            self.name.as_str(),
            self.line_number.as_str(),
            self.speed_text.as_str(),
            self.notes.as_str(),
        ]
    }
}

/// Auxiliary parameters (anti-forgery / paging tokens) tried per mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenParameterSet {
    pub label: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl HiddenParameterSet {
    pub fn new(label: impl Into<String>, params: BTreeMap<String, String>) -> Self {
        Self {
            label: label.into(),
            params,
        }
    }

    /// The set used when no candidates are configured.
    pub fn empty() -> Self {
        Self::new("none", BTreeMap::new())
    }
}

// ============================================================================
// Free-text values
// ============================================================================

/// The four free-text values, before they are assigned to field ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormTexts {
    pub name: String,
    pub line_number: String,
    pub speed_text: String,
    pub notes: String,
}

impl FormTexts {
    /// Render the texts submitted for `measurement` at `site`.
    pub fn render(measurement: &Measurement, site: &SiteIdentity, note: Option<&str>) -> Self {
        let mut notes = format!(
            "تنزيل: {} Mbps | رفع: {} Mbps | Ping: {} ms | السيرفر: {} | IP: {} | الجهاز: {} | التاريخ/الوقت: {}",
            measurement.download_mbps(),
            measurement.upload_mbps(),
            measurement.ping_ms(),
            measurement.server_host(),
            measurement.client_ip(),
            site.device_name,
            measurement.taken_at().format(TIMESTAMP_FORMAT),
        );
        if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
            notes.push_str(" | ملاحظة: ");
            notes.push_str(note);
        }

        Self {
            name: site.school_name.clone(),
            line_number: site.line_number.clone(),
            speed_text: format!("{} Mbps", measurement.download_mbps()),
            notes,
        }
    }
}

// ============================================================================
// Mapper
// ============================================================================

/// Ranked search space for one submission.
#[derive(Debug, Clone)]
pub struct SubmissionMapper {
    static_ids: StaticFieldIds,
    mappings: Vec<FieldMapping>,
    hidden_always: BTreeMap<String, String>,
    hidden_candidates: Vec<HiddenParameterSet>,
}

impl SubmissionMapper {
    /// An empty candidate list behaves as a single empty hidden set.
    pub fn new(
        static_ids: StaticFieldIds,
        mappings: Vec<FieldMapping>,
        hidden_always: BTreeMap<String, String>,
        mut hidden_candidates: Vec<HiddenParameterSet>,
    ) -> Self {
        if hidden_candidates.is_empty() {
            hidden_candidates.push(HiddenParameterSet::empty());
        }
        Self {
            static_ids,
            mappings,
            hidden_always,
            hidden_candidates,
        }
    }

    pub fn from_config(form: &FormConfig) -> Self {
        Self::new(
            form.fields.clone(),
            form.mappings.clone(),
            form.hidden_always.clone(),
            form.hidden_candidates.clone(),
        )
    }

    pub fn mappings(&self) -> &[FieldMapping] {
        &self.mappings
    }

    pub fn hidden_candidates(&self) -> &[HiddenParameterSet] {
        &self.hidden_candidates
    }

    /// Every (mapping, hidden set) pair, mappings outermost, in rank order.
    pub fn combinations(&self) -> impl Iterator<Item = (&FieldMapping, &HiddenParameterSet)> {
        self.mappings
            .iter()
            .flat_map(move |m| self.hidden_candidates.iter().map(move |h| (m, h)))
    }

    /// Build the key→value body for one combination.
    ///
    /// Order: enumeration-constrained identity fields, mapped free texts,
    /// always-sent hidden params, then the candidate hidden set.
    pub fn payload(
        &self,
        site: &SiteIdentity,
        texts: &FormTexts,
        mapping: &FieldMapping,
        hidden: &HiddenParameterSet,
    ) -> Vec<(String, String)> {
        let ids = &self.static_ids;
        let mut fields = vec![
            (ids.school_code.clone(), site.school_code.clone()),
            (ids.sector.clone(), site.sector.label().to_string()),
            (ids.provider.clone(), site.provider.label().to_string()),
            (ids.service_type.clone(), site.service_type.label().to_string()),
            (mapping.name.clone(), texts.name.clone()),
            (mapping.line_number.clone(), texts.line_number.clone()),
            (mapping.speed_text.clone(), texts.speed_text.clone()),
            (mapping.notes.clone(), texts.notes.clone()),
        ];
        fields.extend(self.hidden_always.iter().map(|(k, v)| (k.clone(), v.clone())));
        fields.extend(hidden.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        fields
    }
}
