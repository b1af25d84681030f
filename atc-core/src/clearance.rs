//! Clearance synthesis: templated IFR clearance text and squawk codes.
//!
//! Pure functions: no state, no I/O. The only randomness is the squawk,
//! drawn fresh on every call.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::types::{AtcError, FlightPlan, FlightRecord, Result, ValidFlightPlan};

/// Runway shown before a controller has assigned one.
pub const RUNWAY_PLACEHOLDER: &str = "___";

/// Initial heading after departure, degrees.
pub const DEFAULT_HEADING: u16 = 180;

/// A rendered clearance and the squawk it assigns.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Clearance {
    pub text: String,
    pub squawk: String,
}

/// Four octal digits, each drawn independently.
pub fn generate_squawk() -> String {
    generate_squawk_with(&mut rand::thread_rng())
}

pub fn generate_squawk_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..4)
        .map(|_| char::from(b'0' + rng.gen_range(0..=7u8)))
        .collect()
}

/// Render the clearance template. `runway` falls back to the placeholder
/// when absent or blank.
pub fn clearance_text(
    callsign: &str,
    arriving: &str,
    flight_level: u32,
    runway: Option<&str>,
    squawk: &str,
) -> String {
    let runway = runway
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(RUNWAY_PLACEHOLDER);
    let altitude_ft = u64::from(flight_level) * 100;

    format!(
        "{callsign}, cleared IFR to {arriving} airport as filed, departure runway {runway}.\n\
         Climb and maintain {altitude_ft} feet.\n\
         After departure maintain {DEFAULT_HEADING} heading.\n\
         Squawk {squawk}.\n"
    )
}

/// Validate a flight plan and produce its clearance with a fresh squawk.
pub fn make_clearance(plan: &FlightPlan, runway: Option<&str>) -> Result<Clearance> {
    let plan = plan.validate()?;
    Ok(clear_valid_plan(&plan, runway))
}

fn clear_valid_plan(plan: &ValidFlightPlan, runway: Option<&str>) -> Clearance {
    let squawk = generate_squawk();
    let text = clearance_text(
        &plan.callsign,
        &plan.arriving,
        plan.flight_level,
        runway,
        &squawk,
    );
    Clearance { text, squawk }
}

/// Build a history record for a flight plan, clearing it for `runway`.
pub fn record_for_plan(
    plan: &FlightPlan,
    runway: Option<&str>,
    timestamp: DateTime<Utc>,
) -> Result<(FlightRecord, Clearance)> {
    let plan = plan.validate()?;
    let clearance = clear_valid_plan(&plan, runway);
    let record = FlightRecord {
        timestamp,
        callsign: plan.callsign,
        aircraft_type: plan.aircraft,
        departure_airport: plan.departing,
        arrival_airport: plan.arriving,
        flight_level: plan.flight_level,
        route: plan.route,
        clearance_text: clearance.text.clone(),
        squawk: clearance.squawk.clone(),
    };
    Ok((record, clearance))
}

/// Normalise a runway designator: `01`..`36` with an optional L/R/C suffix.
pub fn validate_runway(runway: &str) -> Result<String> {
    let upper = runway.trim().to_ascii_uppercase();
    let invalid = || AtcError::InvalidRunway(runway.to_string());

    let digits_end = upper
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(upper.len());
    let (number, suffix) = upper.split_at(digits_end);

    if number.len() != 2 || !matches!(suffix, "" | "L" | "R" | "C") {
        return Err(invalid());
    }
    match number.parse::<u8>() {
        Ok(1..=36) => Ok(upper),
        _ => Err(invalid()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
