//! Typed result payloads, one per simulation type.
//!
//! Task results travel as untyped JSON until the moment of display; the
//! history tag (or the kind remembered from submission) picks which shape to
//! decode into. A payload that does not match its published shape is never
//! an error: it degrades to [`SimulationOutcome::Unrecognized`] and renders
//! generically.

use serde::Deserialize;
use serde_json::Value;

use crate::protocol::SimulationKind;

/// Interstellar travel duration to a target system.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TravelTimeResult {
    pub star_system_name: String,
    pub travel_time_years: f64,
}

/// Equilibrium temperatures at orbital extremes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeasonalTempsResult {
    pub planet_name: String,
    pub periastron_temp_k: f64,
    pub apoastron_temp_k: f64,
    pub seasonal_temp_difference_k: f64,
}

/// Tidal locking verdict for a planet around its host star.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TidalLockingResult {
    pub planet_name: String,
    pub star_name: String,
    pub is_locked: bool,
    pub locking_timescale_years: f64,
    pub star_age_years: f64,
    pub conclusion: String,
}

/// Main-sequence lifetime estimate for a star.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StarLifetimeResult {
    pub star_name: String,
    pub star_mass_solar: f64,
    pub star_age_gyr: f64,
    pub estimated_total_lifetime_gyr: f64,
    pub estimated_remaining_lifetime_gyr: f64,
    pub percent_lifespan_complete: f64,
    pub conclusion: String,
}

/// A task result decoded as far as the client understands it.
#[derive(Debug, Clone)]
pub enum SimulationOutcome {
    TravelTime(TravelTimeResult),
    SeasonalTemps(SeasonalTempsResult),
    TidalLocking(TidalLockingResult),
    StarLifetime(StarLifetimeResult),
    /// Unknown simulation type, or a known type whose payload did not match
    /// its published shape. `raw` keeps the payload for generic display.
    Unrecognized {
        kind: Option<SimulationKind>,
        raw: Value,
    },
}

impl SimulationOutcome {
    /// Decodes `result` according to `kind`. Never fails; shape mismatches
    /// fall through to [`SimulationOutcome::Unrecognized`].
    pub fn parse(kind: Option<SimulationKind>, result: &Value) -> SimulationOutcome {
        let unrecognized = |kind| SimulationOutcome::Unrecognized {
            kind,
            raw: result.clone(),
        };
        let Some(kind) = kind else {
            return unrecognized(None);
        };
        let decoded = match kind {
            SimulationKind::TravelTime => {
                serde_json::from_value(result.clone()).map(SimulationOutcome::TravelTime)
            }
            SimulationKind::SeasonalTemps => {
                serde_json::from_value(result.clone()).map(SimulationOutcome::SeasonalTemps)
            }
            SimulationKind::TidalLocking => {
                serde_json::from_value(result.clone()).map(SimulationOutcome::TidalLocking)
            }
            SimulationKind::StarLifetime => {
                serde_json::from_value(result.clone()).map(SimulationOutcome::StarLifetime)
            }
        };
        decoded.unwrap_or_else(|_| unrecognized(Some(kind)))
    }

    pub fn kind(&self) -> Option<SimulationKind> {
        match self {
            SimulationOutcome::TravelTime(_) => Some(SimulationKind::TravelTime),
            SimulationOutcome::SeasonalTemps(_) => Some(SimulationKind::SeasonalTemps),
            SimulationOutcome::TidalLocking(_) => Some(SimulationKind::TidalLocking),
            SimulationOutcome::StarLifetime(_) => Some(SimulationKind::StarLifetime),
            SimulationOutcome::Unrecognized { kind, .. } => *kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn travel_time_payload_decodes() {
        let payload = json!({"star_system_name": "Proxima b", "travel_time_years": 4.2});
        match SimulationOutcome::parse(Some(SimulationKind::TravelTime), &payload) {
            SimulationOutcome::TravelTime(result) => {
                assert_eq!(result.star_system_name, "Proxima b");
                assert!((result.travel_time_years - 4.2).abs() < 1e-9);
            }
            other => panic!("expected travel time outcome, got {:?}", other),
        }
    }

    #[test]
    fn seasonal_temps_payload_decodes() {
        let payload = json!({
            "planet_name": "Kepler-22 b",
            "periastron_temp_k": 310.4,
            "apoastron_temp_k": 250.1,
            "seasonal_temp_difference_k": 60.3
        });
        match SimulationOutcome::parse(Some(SimulationKind::SeasonalTemps), &payload) {
            SimulationOutcome::SeasonalTemps(result) => {
                assert_eq!(result.planet_name, "Kepler-22 b");
                assert!((result.seasonal_temp_difference_k - 60.3).abs() < 1e-9);
            }
            other => panic!("expected seasonal outcome, got {:?}", other),
        }
    }

    #[test]
    fn tidal_locking_payload_decodes() {
        let payload = json!({
            "planet_name": "Trappist-1 e",
            "star_name": "Trappist-1",
            "is_locked": true,
            "locking_timescale_years": 1.2e6,
            "star_age_years": 7.6e9,
            "conclusion": "The planet is almost certainly tidally locked."
        });
        match SimulationOutcome::parse(Some(SimulationKind::TidalLocking), &payload) {
            SimulationOutcome::TidalLocking(result) => {
                assert!(result.is_locked);
                assert_eq!(result.star_name, "Trappist-1");
            }
            other => panic!("expected tidal outcome, got {:?}", other),
        }
    }

    #[test]
    fn star_lifetime_payload_decodes() {
        let payload = json!({
            "star_name": "Tau Ceti",
            "star_mass_solar": 0.78,
            "star_age_gyr": 5.8,
            "estimated_total_lifetime_gyr": 21.0,
            "estimated_remaining_lifetime_gyr": 15.2,
            "percent_lifespan_complete": 27.6,
            "conclusion": "Tau Ceti is a stable main-sequence star."
        });
        match SimulationOutcome::parse(Some(SimulationKind::StarLifetime), &payload) {
            SimulationOutcome::StarLifetime(result) => {
                assert!((result.percent_lifespan_complete - 27.6).abs() < 1e-9);
            }
            other => panic!("expected lifetime outcome, got {:?}", other),
        }
    }

    #[test]
    fn unknown_kind_degrades_to_unrecognized() {
        let payload = json!({"anything": true});
        match SimulationOutcome::parse(None, &payload) {
            SimulationOutcome::Unrecognized { kind, raw } => {
                assert_eq!(kind, None);
                assert_eq!(raw, payload);
            }
            other => panic!("expected unrecognized outcome, got {:?}", other),
        }
    }

    #[test]
    fn shape_mismatch_degrades_to_unrecognized() {
        // Missing travel_time_years entirely.
        let payload = json!({"star_system_name": "Proxima b"});
        match SimulationOutcome::parse(Some(SimulationKind::TravelTime), &payload) {
            SimulationOutcome::Unrecognized { kind, .. } => {
                assert_eq!(kind, Some(SimulationKind::TravelTime));
            }
            other => panic!("expected unrecognized outcome, got {:?}", other),
        }
    }

    #[test]
    fn integer_years_decode_as_float() {
        let payload = json!({"star_system_name": "Barnard", "travel_time_years": 42529});
        match SimulationOutcome::parse(Some(SimulationKind::TravelTime), &payload) {
            SimulationOutcome::TravelTime(result) => {
                assert!((result.travel_time_years - 42529.0).abs() < 1e-9);
            }
            other => panic!("expected travel time outcome, got {:?}", other),
        }
    }
}
