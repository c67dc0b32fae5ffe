//! Submission engine: ranked search over mapping × hidden-set combinations.
//!
//! Tries every combination in rank order, mappings outermost, and stops at
//! the first one the endpoint acknowledges with 200 or 302. Transport
//! failures count as a non-matching attempt; they never abort the search.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::mapper::{FormTexts, SubmissionMapper};
use super::transport::FormTransport;
use crate::config::{defaults, FormConfig};
use crate::types::{Measurement, SiteIdentity};

/// Statuses treated as an accepted submission.
pub const ACCEPTED_STATUSES: [u16; 2] = [200, 302];

/// The combination the endpoint accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub status: u16,
    pub excerpt: String,
    pub mapping: String,
    pub hidden: String,
    /// POSTs made, including the accepted one
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    /// No combination was accepted. `last_status` is `None` when the last
    /// attempt got no HTTP response at all.
    #[error("no mapping accepted after {attempts} attempts (last status: {})", status_text(.last_status))]
    Mismatch {
        attempts: u32,
        last_status: Option<u16>,
        excerpt: String,
    },
}

fn status_text(status: &Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// Truncate a response body to at most `max_chars` characters.
pub fn excerpt(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

pub struct SubmissionEngine {
    mapper: SubmissionMapper,
    transport: Arc<dyn FormTransport>,
    attempts_per_combination: u32,
    retry_backoff: Duration,
    note: Option<String>,
}

impl SubmissionEngine {
    pub fn new(mapper: SubmissionMapper, transport: Arc<dyn FormTransport>) -> Self {
        Self {
            mapper,
            transport,
            attempts_per_combination: defaults::FORM_ATTEMPTS_PER_COMBINATION,
            retry_backoff: Duration::from_secs(defaults::FORM_RETRY_BACKOFF_SECS),
            note: None,
        }
    }

    pub fn from_config(form: &FormConfig, transport: Arc<dyn FormTransport>) -> Self {
        Self::new(SubmissionMapper::from_config(form), transport)
            .with_attempts_per_combination(form.attempts_per_combination)
            .with_retry_backoff(Duration::from_secs(form.retry_backoff_secs))
            .with_note(form.note.clone())
    }

    pub fn with_attempts_per_combination(mut self, attempts: u32) -> Self {
        self.attempts_per_combination = attempts.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Operator note appended to the notes text.
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn mapper(&self) -> &SubmissionMapper {
        &self.mapper
    }

    /// Submit `measurement` for `site`, searching the ranked combinations.
    pub async fn submit(
        &self,
        measurement: &Measurement,
        site: &SiteIdentity,
    ) -> Result<Acceptance, SubmissionError> {
        let texts = FormTexts::render(measurement, site, self.note.as_deref());

        let mut attempts = 0u32;
        let mut last_status = None;
        let mut last_excerpt = String::new();

        for (mapping, hidden) in self.mapper.combinations() {
            let fields = self.mapper.payload(site, &texts, mapping, hidden);

            for attempt in 1..=self.attempts_per_combination {
                attempts += 1;
                debug!(mapping = %mapping.label, hidden = %hidden.label, attempt, "Posting form");

                match self.transport.post_form(&fields).await {
                    Ok(resp) => {
                        let body = excerpt(&resp.body, defaults::RESPONSE_EXCERPT_CHARS);
                        if ACCEPTED_STATUSES.contains(&resp.status) {
                            info!(
                                mapping = %mapping.label,
                                hidden = %hidden.label,
                                status = resp.status,
                                attempts,
                                "Form submission accepted"
                            );
                            return Ok(Acceptance {
                                status: resp.status,
                                excerpt: body,
                                mapping: mapping.label.clone(),
                                hidden: hidden.label.clone(),
                                attempts,
                            });
                        }
                        warn!(
                            mapping = %mapping.label,
                            hidden = %hidden.label,
                            status = resp.status,
                            attempt,
                            "Form submission not accepted"
                        );
                        last_status = Some(resp.status);
                        last_excerpt = body;
                    }
                    Err(e) => {
                        warn!(
                            mapping = %mapping.label,
                            hidden = %hidden.label,
                            attempt,
                            error = %e,
                            "Form submission transport failure"
                        );
                        last_status = None;
                        last_excerpt = e.to_string();
                    }
                }

                if attempt < self.attempts_per_combination {
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
            }
        }

        warn!(attempts, last_status = ?last_status, "No mapping/hidden combination accepted");
        Err(SubmissionError::Mismatch {
            attempts,
            last_status,
            excerpt: last_excerpt,
        })
    }
}
