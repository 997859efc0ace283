//! HTTP access to the simulation portal.
//!
//! All network traffic goes through the [`PortalBackend`] trait so the
//! polling machinery and both binaries can run against a scripted backend in
//! tests. [`HttpPortal`] is the real implementation.

use async_trait::async_trait;
use reqwest::header;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::protocol::{
    field_error_map, ErrorEnvelope, FieldErrors, HistoryPage, SimulationKind, SimulationRequest,
    SubmitReceipt, TaskId, TaskStatusReport,
};

/// Anti-forgery header required on every submission.
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Authorization scheme for portal API keys.
pub const API_KEY_SCHEME: &str = "Api-Key";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_SNIPPET_CHARS: usize = 160;

/// Everything that can go wrong talking to the portal.
#[derive(Debug, Error)]
pub enum PortalError {
    /// Connection, timeout or body-read failure.
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body was not the JSON shape the portal documents.
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Submission was accepted but the response carried no task id.
    #[error("no task id in submission response")]
    MissingTaskId,

    /// The portal rejected the input with per-field messages.
    #[error("Invalid input provided.")]
    Validation(FieldErrors),

    /// Any other rejection; `detail` is the best description the body gave.
    #[error("{detail}")]
    Rejected { status: u16, detail: String },
}

/// Portal operations needed by the rest of the crate.
#[async_trait]
pub trait PortalBackend: Send + Sync {
    /// Submits `request` to the canonical endpoint for `kind`.
    async fn submit(
        &self,
        kind: SimulationKind,
        request: &SimulationRequest,
    ) -> Result<TaskId, PortalError> {
        self.submit_to(kind.endpoint_path(), request).await
    }

    /// Submits `request` to an explicit endpoint path.
    async fn submit_to(
        &self,
        endpoint: &str,
        request: &SimulationRequest,
    ) -> Result<TaskId, PortalError>;

    /// Fetches the current status of one task.
    async fn task_status(&self, task_id: &str) -> Result<TaskStatusReport, PortalError>;

    /// Fetches one page of the run history (`None` = first page).
    async fn history(&self, page: Option<u32>) -> Result<HistoryPage, PortalError>;
}

/// Real portal backend over HTTP.
pub struct HttpPortal {
    http: Client,
    base_url: String,
    csrf_token: Option<String>,
    api_key: Option<String>,
}

impl HttpPortal {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PortalError> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            csrf_token: None,
            api_key: None,
        })
    }

    pub fn from_config(config: &PortalConfig) -> Result<Self, PortalError> {
        let mut portal = Self::new(config.base_url.clone())?;
        portal.csrf_token = config.csrf_token.clone();
        portal.api_key = config.api_key.clone();
        Ok(portal)
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PortalError> {
        let url = self.url(path);
        debug!("GET {url}");
        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("{API_KEY_SCHEME} {key}"));
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("GET {url} rejected with HTTP {status}");
            return Err(classify_rejection(status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl PortalBackend for HttpPortal {
    async fn submit_to(
        &self,
        endpoint: &str,
        request: &SimulationRequest,
    ) -> Result<TaskId, PortalError> {
        let url = self.url(endpoint);
        info!("POST {url}");
        let mut builder = self.http.post(&url).json(request);
        if let Some(token) = &self.csrf_token {
            builder = builder.header(CSRF_HEADER, token);
        }
        if let Some(key) = &self.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("{API_KEY_SCHEME} {key}"));
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("POST {url} rejected with HTTP {status}");
            return Err(classify_rejection(status.as_u16(), &body));
        }
        parse_submit_body(&body)
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatusReport, PortalError> {
        self.fetch_json(&format!("/tasks/status/{task_id}/")).await
    }

    async fn history(&self, page: Option<u32>) -> Result<HistoryPage, PortalError> {
        let path = match page {
            Some(number) => format!("/simulations/history/?page={number}"),
            None => "/simulations/history/".to_string(),
        };
        self.fetch_json(&path).await
    }
}

/// Turns a 2xx submission body into a task id.
fn parse_submit_body(body: &str) -> Result<TaskId, PortalError> {
    let receipt: SubmitReceipt = serde_json::from_str(body)?;
    match receipt.task_id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(PortalError::MissingTaskId),
    }
}

/// Classifies a non-2xx response body into the right [`PortalError`].
fn classify_rejection(status: u16, body: &str) -> PortalError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            if let Some(fields) = envelope.field_errors() {
                return PortalError::Validation(fields);
            }
            // Pre-envelope portal revisions sent the field map as the body.
            if envelope.details.is_none() {
                if let Some(fields) = bare_field_errors(body) {
                    return PortalError::Validation(fields);
                }
            }
            PortalError::Rejected {
                status,
                detail: envelope.detail_text(),
            }
        }
        Err(_) => PortalError::Rejected {
            status,
            detail: body_snippet(status, body),
        },
    }
}

/// Pre-envelope portal revisions sent the field map as the whole body;
/// [`field_error_map`] is strict enough to keep anything else out.
fn bare_field_errors(body: &str) -> Option<FieldErrors> {
    let value: Value = serde_json::from_str(body).ok()?;
    field_error_map(&value)
}

fn body_snippet(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {status}");
    }
    let mut snippet: String = trimmed.chars().take(BODY_SNIPPET_CHARS).collect();
    if trimmed.chars().count() > BODY_SNIPPET_CHARS {
        snippet.push_str("...");
    }
    format!("HTTP {status}: {snippet}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_body_yields_task_id() {
        let body = r#"{"message": "Simulation task started.", "task_id": "abc123"}"#;
        assert_eq!(parse_submit_body(body).expect("task id"), "abc123");
    }

    #[test]
    fn submit_body_without_task_id_is_an_unknown_error() {
        for body in [r#"{}"#, r#"{"message": "started"}"#, r#"{"task_id": ""}"#] {
            match parse_submit_body(body) {
                Err(PortalError::MissingTaskId) => {}
                other => panic!("expected MissingTaskId for {body}, got {:?}", other),
            }
        }
    }

    #[test]
    fn submit_body_that_is_not_json_is_a_decode_error() {
        match parse_submit_body("<html>gateway timeout</html>") {
            Err(PortalError::Decode(_)) => {}
            other => panic!("expected Decode, got {:?}", other),
        }
    }

    #[test]
    fn envelope_field_errors_classify_as_validation() {
        let body = r#"{
            "success": false,
            "code": "validation_error",
            "message": "Invalid input provided.",
            "details": {"speed_percentage": ["must be between 0 and 99"]}
        }"#;
        match classify_rejection(400, body) {
            PortalError::Validation(fields) => {
                assert_eq!(
                    fields["speed_percentage"],
                    vec!["must be between 0 and 99"]
                );
            }
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn bare_field_map_classifies_as_validation() {
        let body = r#"{"planet_id": ["This field is required."]}"#;
        match classify_rejection(400, body) {
            PortalError::Validation(fields) => {
                assert_eq!(fields["planet_id"], vec!["This field is required."]);
            }
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn envelope_metadata_is_not_validation() {
        let body = r#"{"success": false, "code": "not_found", "message": "Not found.", "details": "No star with id 99."}"#;
        match classify_rejection(404, body) {
            PortalError::Rejected { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "No star with id 99.");
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn wrapped_permission_body_is_a_rejection_not_validation() {
        let body = r#"{
            "success": false,
            "code": "permission_error",
            "message": "You do not have permission to perform this action.",
            "details": {"detail": "You do not have permission to perform this action."}
        }"#;
        match classify_rejection(403, body) {
            PortalError::Rejected { status, detail } => {
                assert_eq!(status, 403);
                assert_eq!(detail, "You do not have permission to perform this action.");
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn legacy_error_key_is_surfaced() {
        match classify_rejection(429, r#"{"error": "Rate limit exceeded"}"#) {
            PortalError::Rejected { detail, .. } => assert_eq!(detail, "Rate limit exceeded"),
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn non_json_rejection_keeps_a_body_snippet() {
        match classify_rejection(502, "<html>bad gateway</html>") {
            PortalError::Rejected { status, detail } => {
                assert_eq!(status, 502);
                assert!(detail.starts_with("HTTP 502:"), "detail was {detail}");
                assert!(detail.contains("bad gateway"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn empty_rejection_body_reports_the_status() {
        match classify_rejection(500, "") {
            PortalError::Rejected { detail, .. } => assert_eq!(detail, "HTTP 500"),
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn long_rejection_bodies_are_truncated() {
        let body = "x".repeat(500);
        match classify_rejection(500, &body) {
            PortalError::Rejected { detail, .. } => {
                assert!(detail.ends_with("..."), "detail was {detail}");
                assert!(detail.len() < 200);
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn base_url_joining_avoids_double_slashes() {
        let portal = HttpPortal::new("http://127.0.0.1:8000/").expect("build portal");
        assert_eq!(
            portal.url("/simulations/history/"),
            "http://127.0.0.1:8000/simulations/history/"
        );
        assert_eq!(
            portal.url("tasks/status/abc/"),
            "http://127.0.0.1:8000/tasks/status/abc/"
        );
    }

    #[test]
    fn builders_attach_credentials() {
        let portal = HttpPortal::new("http://127.0.0.1:8000")
            .expect("build portal")
            .with_csrf_token("tok")
            .with_api_key("key");
        assert_eq!(portal.csrf_token.as_deref(), Some("tok"));
        assert_eq!(portal.api_key.as_deref(), Some("key"));
    }
}
