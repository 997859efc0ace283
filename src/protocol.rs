//! Wire shapes shared with the simulation portal.
//!
//! Everything here mirrors what the portal actually sends: submission
//! receipts, task status payloads, paginated history pages and the error
//! envelope. Parsing is deliberately tolerant: unknown task states and
//! unknown simulation types are carried through as data instead of being
//! rejected, so a portal upgrade never strands the client mid-poll.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque task identifier handed out by the portal on submission.
pub type TaskId = String;

/// Per-field validation messages, keyed by the submitted field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Detail text used when a failed task carries no usable description.
pub const UNKNOWN_ERROR_DETAIL: &str = "Unknown error";

/// Server-side page size of the run history endpoint.
pub const HISTORY_PAGE_SIZE: u64 = 25;

// ═══════════════════════════════════════════════════════════════════════════
// Simulation kinds
// ═══════════════════════════════════════════════════════════════════════════

/// The simulation types the portal can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimulationKind {
    TravelTime,
    SeasonalTemps,
    TidalLocking,
    StarLifetime,
}

impl SimulationKind {
    pub fn all() -> &'static [SimulationKind] {
        &[
            SimulationKind::TravelTime,
            SimulationKind::SeasonalTemps,
            SimulationKind::TidalLocking,
            SimulationKind::StarLifetime,
        ]
    }

    /// Canonical tag as stored in run history records.
    pub fn wire_tag(self) -> &'static str {
        match self {
            SimulationKind::TravelTime => "TRAVEL_TIME",
            SimulationKind::SeasonalTemps => "SEASONAL_TEMPS",
            SimulationKind::TidalLocking => "TIDAL_LOCKING",
            SimulationKind::StarLifetime => "STAR_LIFETIME",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SimulationKind::TravelTime => "Travel Time",
            SimulationKind::SeasonalTemps => "Seasonal Temperatures",
            SimulationKind::TidalLocking => "Tidal Locking",
            SimulationKind::StarLifetime => "Star Lifetime",
        }
    }

    /// Short name used by the dashboard and CLI commands.
    pub fn command(self) -> &'static str {
        match self {
            SimulationKind::TravelTime => "travel",
            SimulationKind::SeasonalTemps => "season",
            SimulationKind::TidalLocking => "tidal",
            SimulationKind::StarLifetime => "lifetime",
        }
    }

    /// Submission endpoint for this kind, relative to the portal base URL.
    pub fn endpoint_path(self) -> &'static str {
        match self {
            SimulationKind::TravelTime => "/simulations/travel-time/",
            SimulationKind::SeasonalTemps => "/simulations/seasonal-temps/",
            SimulationKind::TidalLocking => "/simulations/tidal-locking/",
            SimulationKind::StarLifetime => "/simulations/star-lifetime/",
        }
    }

    /// Parses a history tag. Accepts the short command-style aliases and the
    /// older `STELLAR_LIFETIME` tag still present in early run records.
    pub fn parse_tag(tag: &str) -> Option<SimulationKind> {
        match tag {
            "TRAVEL_TIME" | "travel" => Some(SimulationKind::TravelTime),
            "SEASONAL_TEMPS" | "season" => Some(SimulationKind::SeasonalTemps),
            "TIDAL_LOCKING" | "tidal" => Some(SimulationKind::TidalLocking),
            "STAR_LIFETIME" | "STELLAR_LIFETIME" | "lifetime" => {
                Some(SimulationKind::StarLifetime)
            }
            _ => None,
        }
    }
}

impl fmt::Display for SimulationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Task state
// ═══════════════════════════════════════════════════════════════════════════

/// Task state as reported by the status endpoint.
///
/// Only `SUCCESS` and `FAILURE` are terminal. Anything the portal invents
/// later (`STARTED`, `RETRY`, ...) lands in `Other` and keeps polling alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskState {
    Pending,
    Success,
    Failure,
    Other(String),
}

impl TaskState {
    pub fn as_str(&self) -> &str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Other(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

impl From<String> for TaskState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "PENDING" => TaskState::Pending,
            "SUCCESS" => TaskState::Success,
            "FAILURE" => TaskState::Failure,
            _ => TaskState::Other(raw),
        }
    }
}

impl From<TaskState> for String {
    fn from(state: TaskState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Requests and receipts
// ═══════════════════════════════════════════════════════════════════════════

/// Form fields for a simulation submission, serialized as a flat JSON object.
///
/// Values stay as the raw strings the user typed; validation is the portal's
/// job, and its per-field messages are echoed back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SimulationRequest {
    fields: BTreeMap<String, String>,
}

impl SimulationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Body of a successful submission response.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReceipt {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Body of the task status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatusReport {
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: TaskState,
    /// Simulation payload on `SUCCESS`, failure description on `FAILURE`,
    /// usually `null` while pending.
    #[serde(default)]
    pub result: Option<Value>,
}

impl TaskStatusReport {
    pub fn failure_detail(&self) -> String {
        failure_detail(self.result.as_ref())
    }
}

/// Extracts a human-readable description from a failed task's result.
///
/// Checks `error` then `message`, then the task runner's exception shape
/// (`exc_message` as a string or list of strings). Falls back to
/// [`UNKNOWN_ERROR_DETAIL`] when nothing usable is present.
pub fn failure_detail(result: Option<&Value>) -> String {
    match result {
        Some(Value::String(text)) if !text.is_empty() => text.clone(),
        Some(Value::Object(map)) => {
            for key in ["error", "message"] {
                if let Some(text) = map.get(key).and_then(value_text) {
                    return text;
                }
            }
            if let Some(text) = map.get("exc_message").and_then(exc_message_text) {
                return text;
            }
            UNKNOWN_ERROR_DETAIL.to_string()
        }
        _ => UNKNOWN_ERROR_DETAIL.to_string(),
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::String(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn exc_message_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Array(items) if !items.is_empty() => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Run history
// ═══════════════════════════════════════════════════════════════════════════

/// One page of the paginated run history.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    pub count: u64,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub results: Vec<RunRecord>,
}

impl HistoryPage {
    /// True while any visible run has not reached a terminal state.
    pub fn has_pending(&self) -> bool {
        self.results.iter().any(|run| !run.status.is_terminal())
    }

    pub fn total_pages(&self) -> u64 {
        self.count.div_ceil(HISTORY_PAGE_SIZE)
    }
}

/// One submitted simulation run as listed by the history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRecord {
    #[serde(default)]
    pub task_id: Option<String>,
    pub simulation_type: String,
    pub status: TaskState,
    #[serde(default)]
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// `None` when the record carries a tag this client does not know.
    pub fn kind(&self) -> Option<SimulationKind> {
        SimulationKind::parse_tag(&self.simulation_type)
    }

    pub fn failure_detail(&self) -> String {
        failure_detail(self.result.as_ref())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Error envelope
// ═══════════════════════════════════════════════════════════════════════════

/// Uniform error body sent by the portal on non-2xx responses.
///
/// `details` is either a plain string or a map of field name to message
/// list. Permission, authentication and throttle errors wrap the framework's
/// `{"detail": "..."}` body whole instead; that is a rejection description,
/// not validation output. Older portal revisions used a bare `error` string;
/// keep reading it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

impl ErrorEnvelope {
    /// Per-field validation messages, when `details` carries them.
    pub fn field_errors(&self) -> Option<FieldErrors> {
        self.details.as_ref().and_then(field_error_map)
    }

    /// Best single-line description of the rejection.
    ///
    /// A wrapped `details.detail` string wins over the top-level fields;
    /// throttle responses carry the specific message only there.
    pub fn detail_text(&self) -> String {
        match &self.details {
            Some(Value::String(text)) if !text.is_empty() => return text.clone(),
            Some(Value::Object(map)) => {
                if let Some(text) = map.get("detail").and_then(Value::as_str) {
                    if !text.is_empty() {
                        return text.to_string();
                    }
                }
            }
            _ => {}
        }
        for candidate in [&self.error, &self.message, &self.code] {
            if let Some(text) = candidate {
                if !text.is_empty() {
                    return text.clone();
                }
            }
        }
        UNKNOWN_ERROR_DETAIL.to_string()
    }
}

/// Reads a JSON object as a field-to-messages map.
///
/// Validation output always maps field names to message lists. Anything
/// else, including wrapped `{"detail": "..."}` bodies and envelope
/// metadata, returns `None` so it is reported as a plain rejection.
pub fn field_error_map(value: &Value) -> Option<FieldErrors> {
    let object = value.as_object()?;
    if object.is_empty() {
        return None;
    }
    let mut fields = FieldErrors::new();
    for (name, messages) in object {
        let list: Vec<String> = match messages {
            Value::Array(items) if !items.is_empty() => {
                items.iter().filter_map(value_text).collect()
            }
            _ => return None,
        };
        if list.is_empty() {
            return None;
        }
        fields.insert(name.clone(), list);
    }
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_state_round_trips_known_and_unknown_values() {
        assert_eq!(TaskState::from("PENDING".to_string()), TaskState::Pending);
        assert_eq!(TaskState::from("SUCCESS".to_string()), TaskState::Success);
        assert_eq!(TaskState::from("FAILURE".to_string()), TaskState::Failure);
        assert_eq!(
            TaskState::from("STARTED".to_string()),
            TaskState::Other("STARTED".to_string())
        );
        assert_eq!(TaskState::Other("RETRY".to_string()).as_str(), "RETRY");
    }

    #[test]
    fn only_success_and_failure_are_terminal() {
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Failure.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Other("STARTED".to_string()).is_terminal());
    }

    #[test]
    fn simulation_kind_parses_canonical_and_alias_tags() {
        for kind in SimulationKind::all() {
            assert_eq!(SimulationKind::parse_tag(kind.wire_tag()), Some(*kind));
            assert_eq!(SimulationKind::parse_tag(kind.command()), Some(*kind));
        }
        assert_eq!(
            SimulationKind::parse_tag("travel"),
            Some(SimulationKind::TravelTime)
        );
        assert_eq!(
            SimulationKind::parse_tag("STELLAR_LIFETIME"),
            Some(SimulationKind::StarLifetime)
        );
        assert_eq!(SimulationKind::parse_tag("WORMHOLE"), None);
    }

    #[test]
    fn endpoint_paths_cover_all_kinds() {
        for kind in SimulationKind::all() {
            let path = kind.endpoint_path();
            assert!(path.starts_with("/simulations/"), "bad path {path}");
            assert!(path.ends_with('/'), "bad path {path}");
        }
    }

    #[test]
    fn simulation_request_serializes_as_flat_object() {
        let request = SimulationRequest::new()
            .field("star_system_id", "7")
            .field("speed_percentage", "150");
        let encoded = serde_json::to_value(&request).expect("encode request");
        assert_eq!(
            encoded,
            json!({"star_system_id": "7", "speed_percentage": "150"})
        );
        assert_eq!(request.get("speed_percentage"), Some("150"));
        assert_eq!(request.len(), 2);
    }

    #[test]
    fn status_report_deserializes_pending_payload() {
        let report: TaskStatusReport =
            serde_json::from_value(json!({"task_id": "abc123", "status": "PENDING", "result": null}))
                .expect("decode report");
        assert_eq!(report.task_id.as_deref(), Some("abc123"));
        assert_eq!(report.status, TaskState::Pending);
        assert!(report.result.is_none() || report.result == Some(Value::Null));
    }

    #[test]
    fn failure_detail_prefers_error_then_message() {
        assert_eq!(
            failure_detail(Some(&json!({"error": "invalid orbit"}))),
            "invalid orbit"
        );
        assert_eq!(
            failure_detail(Some(&json!({"message": "engine offline"}))),
            "engine offline"
        );
        assert_eq!(
            failure_detail(Some(&json!({"error": "boom", "message": "ignored"}))),
            "boom"
        );
    }

    #[test]
    fn failure_detail_reads_task_runner_exception_shape() {
        let result = json!({
            "exc_type": "SimulationError",
            "exc_message": ["planet has no host star"],
            "exc_module": "portal.tasks"
        });
        assert_eq!(failure_detail(Some(&result)), "planet has no host star");
    }

    #[test]
    fn failure_detail_falls_back_to_unknown_error() {
        assert_eq!(failure_detail(None), UNKNOWN_ERROR_DETAIL);
        assert_eq!(failure_detail(Some(&Value::Null)), UNKNOWN_ERROR_DETAIL);
        assert_eq!(failure_detail(Some(&json!({}))), UNKNOWN_ERROR_DETAIL);
        assert_eq!(
            failure_detail(Some(&json!({"error": null}))),
            UNKNOWN_ERROR_DETAIL
        );
    }

    #[test]
    fn history_page_detects_pending_runs() {
        let page: HistoryPage = serde_json::from_value(json!({
            "count": 2,
            "previous": null,
            "next": null,
            "results": [
                {
                    "task_id": "a",
                    "simulation_type": "TRAVEL_TIME",
                    "status": "SUCCESS",
                    "result": {"star_system_name": "Kepler-22", "travel_time_years": 1200.5},
                    "created_at": "2024-01-15T12:30:45Z"
                },
                {
                    "task_id": "b",
                    "simulation_type": "TIDAL_LOCKING",
                    "status": "PENDING",
                    "result": null,
                    "created_at": "2024-01-15T12:31:00Z"
                }
            ]
        }))
        .expect("decode page");
        assert!(page.has_pending());
        assert_eq!(page.results[0].kind(), Some(SimulationKind::TravelTime));
    }

    #[test]
    fn empty_history_page_has_nothing_pending() {
        let page: HistoryPage =
            serde_json::from_value(json!({"count": 0, "previous": null, "next": null, "results": []}))
                .expect("decode page");
        assert!(!page.has_pending());
        assert_eq!(page.total_pages(), 0);
    }

    #[test]
    fn history_paging_rounds_up() {
        let page = |count: u64| HistoryPage {
            count,
            previous: None,
            next: None,
            results: Vec::new(),
        };
        assert_eq!(page(1).total_pages(), 1);
        assert_eq!(page(25).total_pages(), 1);
        assert_eq!(page(26).total_pages(), 2);
    }

    #[test]
    fn envelope_extracts_field_errors() {
        let envelope: ErrorEnvelope = serde_json::from_value(json!({
            "success": false,
            "code": "validation_error",
            "message": "Invalid input provided.",
            "details": {"speed_percentage": ["must be between 0 and 99"]}
        }))
        .expect("decode envelope");
        let fields = envelope.field_errors().expect("field errors present");
        assert_eq!(
            fields.get("speed_percentage"),
            Some(&vec!["must be between 0 and 99".to_string()])
        );
    }

    #[test]
    fn envelope_detail_text_prefers_string_details() {
        let envelope: ErrorEnvelope = serde_json::from_value(json!({
            "success": false,
            "code": "not_found",
            "message": "Not found.",
            "details": "No star with id 99."
        }))
        .expect("decode envelope");
        assert!(envelope.field_errors().is_none());
        assert_eq!(envelope.detail_text(), "No star with id 99.");
    }

    #[test]
    fn envelope_reads_wrapped_detail_before_top_level_fields() {
        let denied: ErrorEnvelope = serde_json::from_value(json!({
            "success": false,
            "code": "permission_error",
            "message": "You do not have permission to perform this action.",
            "details": {"detail": "You do not have permission to perform this action."}
        }))
        .expect("decode envelope");
        assert!(denied.field_errors().is_none());
        assert_eq!(
            denied.detail_text(),
            "You do not have permission to perform this action."
        );

        // Throttle responses put the wait time only inside details.detail.
        let throttled: ErrorEnvelope = serde_json::from_value(json!({
            "success": false,
            "code": "generic_error",
            "message": "An error occurred.",
            "details": {"detail": "Request was throttled. Expected available in 30 seconds."}
        }))
        .expect("decode envelope");
        assert_eq!(
            throttled.detail_text(),
            "Request was throttled. Expected available in 30 seconds."
        );
    }

    #[test]
    fn envelope_falls_back_through_error_and_message() {
        let legacy: ErrorEnvelope =
            serde_json::from_value(json!({"error": "Rate limit exceeded"})).expect("decode");
        assert_eq!(legacy.detail_text(), "Rate limit exceeded");

        let bare: ErrorEnvelope = serde_json::from_value(json!({})).expect("decode");
        assert_eq!(bare.detail_text(), UNKNOWN_ERROR_DETAIL);
    }

    #[test]
    fn field_error_map_requires_message_lists() {
        assert!(field_error_map(&json!({})).is_none());
        assert!(field_error_map(&json!("just text")).is_none());
        assert!(field_error_map(&json!({"speed_percentage": 42})).is_none());
        assert!(field_error_map(&json!({"speed_percentage": []})).is_none());

        // A wrapped rejection body is not a validation map.
        let wrapped = json!({"detail": "You do not have permission to perform this action."});
        assert!(field_error_map(&wrapped).is_none());

        let listed = json!({"planet_id": ["This field is required."]});
        let fields = field_error_map(&listed).expect("message list accepted");
        assert_eq!(fields["planet_id"], vec!["This field is required."]);

        // One stray string value disqualifies the whole map.
        let mixed = json!({"planet_id": ["required"], "detail": "nope"});
        assert!(field_error_map(&mixed).is_none());
    }
}
