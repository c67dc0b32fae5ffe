//! Form transport: one URL-encoded POST per attempt.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, REFERER};
use std::time::Duration;
use tracing::warn;

use crate::config::FormConfig;

/// Transport errors. Caught per attempt by the engine.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
}

/// Status and body of one form POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormResponse {
    pub status: u16,
    pub body: String,
}

/// Trait abstracting how a payload reaches the form endpoint.
#[async_trait]
pub trait FormTransport: Send + Sync {
    /// POST `fields` URL-encoded. Any HTTP status is an `Ok`; only failures
    /// to obtain a response are errors.
    async fn post_form(&self, fields: &[(String, String)]) -> Result<FormResponse, TransportError>;
}

// ============================================================================
// reqwest transport
// ============================================================================

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Sends submissions with browser-like headers. Redirects are not followed
/// so that a 302 acknowledgement is observed as such.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    action_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(form: &FormConfig) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(form.timeout_secs);

        let mut headers = HeaderMap::new();
        headers.insert(
            REFERER,
            HeaderValue::from_str(&form.referer()).map_err(|_| TransportError::InvalidHeader("Referer"))?,
        );

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(form.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            action_url: form.action_url.clone(),
            timeout,
        })
    }

    pub fn action_url(&self) -> &str {
        &self.action_url
    }
}

#[async_trait]
impl FormTransport for ReqwestTransport {
    async fn post_form(&self, fields: &[(String, String)]) -> Result<FormResponse, TransportError> {
        let mut request = self.http.post(&self.action_url).form(fields).build()?;
        // form() sets a bare content type; the endpoint expects the charset
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));

        let resp = self
            .http
            .execute(request)
            .await
            .map_err(|e| self.classify(e))?;

        // the status alone decides acceptance
        let status = resp.status().as_u16();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(status, error = %e, "Form response body unreadable, keeping status");
                String::new()
            }
        };
        Ok(FormResponse { status, body })
    }
}

impl ReqwestTransport {
    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Http(e)
        }
    }
}
