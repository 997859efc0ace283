//! Plain-text rendering of portal responses and poll updates.
//!
//! Every function here is pure: wire data in, display string out. The
//! dashboard and the CLI print the same strings, and the tests pin the
//! phrases users grep their terminal history for.

use std::fmt;

use serde_json::Value;

use crate::client::PortalError;
use crate::poll::{PollTarget, PollUpdate};
use crate::protocol::{
    FieldErrors, HistoryPage, RunRecord, SimulationKind, TaskState, UNKNOWN_ERROR_DETAIL,
};
use crate::results::{
    SeasonalTempsResult, SimulationOutcome, StarLifetimeResult, TidalLockingResult,
    TravelTimeResult,
};

/// Shown instead of the history table when no runs exist.
pub const EMPTY_HISTORY_MESSAGE: &str = "No simulation history found.";

// ═══════════════════════════════════════════════════════════════════════════
// Status lines
// ═══════════════════════════════════════════════════════════════════════════

pub fn started_line(task_id: &str) -> String {
    format!("Task started! ID: {task_id}. Checking status...")
}

pub fn pending_line(task_id: &str, state: &TaskState) -> String {
    format!("Task ID: {task_id} | Status: {state}...")
}

pub fn task_failed_line(detail: &str) -> String {
    format!("Task Failed: {detail}")
}

pub fn request_failed_line(error: impl fmt::Display) -> String {
    format!("Request failed: {error}")
}

pub fn status_check_failed_line(error: impl fmt::Display) -> String {
    format!("Failed to check status: {error}")
}

pub fn history_failed_line(error: impl fmt::Display) -> String {
    format!("Failed to load history: {error}")
}

// ═══════════════════════════════════════════════════════════════════════════
// Validation errors
// ═══════════════════════════════════════════════════════════════════════════

/// `speed_percentage` -> `Speed percentage`.
pub fn humanize_field(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}

/// One line per field: `Speed percentage: must be between 0 and 99`.
/// Multiple messages for a field are joined with `; `.
pub fn render_field_errors(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(field, messages)| format!("{}: {}", humanize_field(field), messages.join("; ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Display string for a failed submission.
pub fn render_submit_error(error: &PortalError) -> String {
    match error {
        PortalError::Validation(fields) => render_field_errors(fields),
        PortalError::MissingTaskId => format!("Error: {UNKNOWN_ERROR_DETAIL}"),
        PortalError::Rejected { detail, .. } => format!("Error: {detail}"),
        PortalError::Transport(inner) => request_failed_line(inner),
        PortalError::Decode(inner) => request_failed_line(inner),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Simulation results
// ═══════════════════════════════════════════════════════════════════════════

/// Renders a successful task's result payload.
///
/// A payload carrying an `error` field renders as an error no matter what
/// simulation type claimed it; otherwise the kind picks the renderer, and
/// anything unrecognized falls back to a generic message with the raw JSON.
pub fn render_outcome(kind: Option<SimulationKind>, result: &Value) -> String {
    if let Some(error) = inline_error(result) {
        let mut out = format!("Error: {error}");
        if let Some(detail) = result.get("detail").and_then(Value::as_str) {
            out.push('\n');
            out.push_str(detail);
        }
        return out;
    }
    match SimulationOutcome::parse(kind, result) {
        SimulationOutcome::TravelTime(result) => render_travel_time(&result),
        SimulationOutcome::SeasonalTemps(result) => render_seasonal_temps(&result),
        SimulationOutcome::TidalLocking(result) => render_tidal_locking(&result),
        SimulationOutcome::StarLifetime(result) => render_star_lifetime(&result),
        SimulationOutcome::Unrecognized { raw, .. } => render_unrecognized(&raw),
    }
}

fn inline_error(result: &Value) -> Option<String> {
    let map = result.as_object()?;
    match map.get("error")? {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn render_travel_time(result: &TravelTimeResult) -> String {
    format!(
        "Status: SUCCESS\nDestination: {}\nTravel time: {} years",
        result.star_system_name, result.travel_time_years
    )
}

fn render_seasonal_temps(result: &SeasonalTempsResult) -> String {
    format!(
        "Status: SUCCESS\nPlanet: {}\nPeriastron temperature: {} K\nApoastron temperature: {} K\nSeasonal difference: {} K",
        result.planet_name,
        result.periastron_temp_k,
        result.apoastron_temp_k,
        result.seasonal_temp_difference_k
    )
}

fn render_tidal_locking(result: &TidalLockingResult) -> String {
    format!(
        "Status: SUCCESS\nPlanet: {}\nHost star: {} (age {} years)\nTidally locked: {}\nLocking timescale: {} years\n{}",
        result.planet_name,
        result.star_name,
        result.star_age_years,
        if result.is_locked { "yes" } else { "no" },
        result.locking_timescale_years,
        result.conclusion
    )
}

fn render_star_lifetime(result: &StarLifetimeResult) -> String {
    format!(
        "Status: SUCCESS\nStar: {} ({} solar masses)\nAge: {} Gyr\nEstimated total lifetime: {} Gyr\nEstimated remaining: {} Gyr\nLifespan complete: {}%\n{}",
        result.star_name,
        result.star_mass_solar,
        result.star_age_gyr,
        result.estimated_total_lifetime_gyr,
        result.estimated_remaining_lifetime_gyr,
        result.percent_lifespan_complete,
        result.conclusion
    )
}

fn render_unrecognized(raw: &Value) -> String {
    let mut out = String::from("Task finished: unknown result type.");
    if !raw.is_null() {
        out.push_str("\nRaw result: ");
        out.push_str(&raw.to_string());
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// Run history
// ═══════════════════════════════════════════════════════════════════════════

/// Renders a history page as a fixed-width table.
pub fn render_history_table(page: &HistoryPage) -> String {
    if page.results.is_empty() {
        return EMPTY_HISTORY_MESSAGE.to_string();
    }
    let mut out = format!(
        "{:<22} {:<9} {:<20} {}\n",
        "TYPE", "STATUS", "CREATED (UTC)", "RESULT"
    );
    for record in &page.results {
        let kind_label = record
            .kind()
            .map(SimulationKind::label)
            .unwrap_or(record.simulation_type.as_str());
        out.push_str(&format!(
            "{:<22} {:<9} {:<20} {}\n",
            kind_label,
            record.status.as_str(),
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            summarize_run(record)
        ));
    }
    out.push_str(&format!("Total runs: {}", page.count));
    let pages = page.total_pages();
    if pages > 1 {
        out.push_str(&format!(" across {pages} pages"));
    }
    out
}

/// One-cell summary of a run for the history table.
pub fn summarize_run(record: &RunRecord) -> String {
    match &record.status {
        TaskState::Success => match &record.result {
            Some(result) => summarize_result(record.kind(), result),
            None => "-".to_string(),
        },
        TaskState::Failure => record.failure_detail(),
        _ => "...".to_string(),
    }
}

fn summarize_result(kind: Option<SimulationKind>, result: &Value) -> String {
    if let Some(error) = inline_error(result) {
        return error;
    }
    match SimulationOutcome::parse(kind, result) {
        SimulationOutcome::TravelTime(result) => format!(
            "{}: {} years",
            result.star_system_name, result.travel_time_years
        ),
        SimulationOutcome::SeasonalTemps(result) => format!(
            "{}: {} K swing",
            result.planet_name, result.seasonal_temp_difference_k
        ),
        SimulationOutcome::TidalLocking(result) => format!(
            "{}: {}",
            result.planet_name,
            if result.is_locked {
                "tidally locked"
            } else {
                "not locked"
            }
        ),
        SimulationOutcome::StarLifetime(result) => format!(
            "{}: {}% of lifespan complete",
            result.star_name, result.percent_lifespan_complete
        ),
        SimulationOutcome::Unrecognized { .. } => "finished (unrecognized result type)".to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Poll updates
// ═══════════════════════════════════════════════════════════════════════════

/// Display string for one polling update.
pub fn render_update(update: &PollUpdate) -> String {
    match update {
        PollUpdate::Started { target } => match target {
            PollTarget::Task { task_id, .. } => format!("Watching task {task_id}..."),
            PollTarget::History { page: Some(page) } => {
                format!("Watching history page {page}...")
            }
            PollTarget::History { page: None } => "Watching history...".to_string(),
        },
        PollUpdate::TaskPending { task_id, state } => pending_line(task_id, state),
        PollUpdate::TaskSucceeded { kind, result, .. } => render_outcome(*kind, result),
        PollUpdate::TaskFailed { detail, .. } => task_failed_line(detail),
        PollUpdate::History(page) => render_history_table(page),
        PollUpdate::PollError { target, message } => match target {
            PollTarget::Task { .. } => status_check_failed_line(message),
            PollTarget::History { .. } => history_failed_line(message),
        },
    }
}
