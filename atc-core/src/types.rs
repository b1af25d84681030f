//! Shared types, error enum, and feed message decoding for atc-core.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// All errors produced by atc-core.
#[derive(Debug, Error)]
pub enum AtcError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("invalid runway designator: {0:?}")]
    InvalidRunway(String),
    #[error("invalid airport code: {0:?}")]
    InvalidAirport(String),
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AtcError>;

// ---------------------------------------------------------------------------
// Feed event kinds
// ---------------------------------------------------------------------------

pub const KIND_FLIGHT_PLAN: &str = "FLIGHT_PLAN";
pub const KIND_EVENT_FLIGHT_PLAN: &str = "EVENT_FLIGHT_PLAN";
pub const KIND_AIRCRAFT_DATA: &str = "ACFT_DATA";
pub const KIND_EVENT_AIRCRAFT_DATA: &str = "EVENT_ACFT_DATA";

/// Route reported when the pilot filed none.
pub const DEFAULT_ROUTE: &str = "N/A";

// ---------------------------------------------------------------------------
// Flight plans
// ---------------------------------------------------------------------------

/// A flight plan as it arrives on the wire. Every field may be absent;
/// call [`FlightPlan::validate`] before using it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightPlan {
    pub callsign: Option<String>,
    pub realcallsign: Option<String>,
    #[serde(rename = "robloxName")]
    pub roblox_name: Option<String>,
    pub aircraft: Option<String>,
    pub flightrules: Option<String>,
    pub departing: Option<String>,
    pub arriving: Option<String>,
    pub route: Option<String>,
    /// Either `"040"` or `40` depending on the producer.
    pub flightlevel: Option<Value>,
}

/// A flight plan with every required field present and normalised.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidFlightPlan {
    pub callsign: String,
    pub aircraft: String,
    pub departing: String,
    pub arriving: String,
    pub flight_level: u32,
    pub route: String,
}

fn required(value: &Option<String>, field: &'static str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AtcError::MissingField(field)),
    }
}

fn parse_flight_level(value: &Option<Value>) -> Result<u32> {
    let invalid = |reason: String| AtcError::InvalidField {
        field: "flightlevel",
        reason,
    };
    match value {
        None | Some(Value::Null) => Err(AtcError::MissingField("flightlevel")),
        Some(Value::String(s)) if s.trim().is_empty() => Err(AtcError::MissingField("flightlevel")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| invalid(format!("{s:?} is not a number"))),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| invalid(format!("{n} is out of range"))),
        Some(other) => Err(invalid(format!("unexpected value {other}"))),
    }
}

impl FlightPlan {
    /// Check required fields and normalise airport codes to upper case.
    pub fn validate(&self) -> Result<ValidFlightPlan> {
        let callsign = required(&self.callsign, "callsign")?;
        let aircraft = required(&self.aircraft, "aircraft")?;
        let departing = required(&self.departing, "departing")?.to_ascii_uppercase();
        let arriving = required(&self.arriving, "arriving")?.to_ascii_uppercase();
        let flight_level = parse_flight_level(&self.flightlevel)?;
        let route = self
            .route
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_ROUTE)
            .to_string();

        Ok(ValidFlightPlan {
            callsign,
            aircraft,
            departing,
            arriving,
            flight_level,
            route,
        })
    }
}

// ---------------------------------------------------------------------------
// Flight records
// ---------------------------------------------------------------------------

/// One processed flight plan held in the history buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRecord {
    pub timestamp: DateTime<Utc>,
    pub callsign: String,
    pub aircraft_type: String,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub flight_level: u32,
    pub route: String,
    pub clearance_text: String,
    pub squawk: String,
}

impl FlightRecord {
    /// Reject records with blank required fields, no clearance text, or a
    /// squawk that is not four digits in 0-7.
    pub fn validate(&self) -> Result<()> {
        let fields: [(&'static str, &str); 6] = [
            ("callsign", &self.callsign),
            ("aircraft", &self.aircraft_type),
            ("departing", &self.departure_airport),
            ("arriving", &self.arrival_airport),
            ("squawk", &self.squawk),
            ("clearance_text", &self.clearance_text),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(AtcError::MissingField(name));
            }
        }
        if self.squawk.len() != 4 || !self.squawk.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(AtcError::InvalidField {
                field: "squawk",
                reason: format!("{:?} is not four digits 0-7", self.squawk),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aircraft positions
// ---------------------------------------------------------------------------

/// Coordinate pair in the feed's native coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    #[serde(alias = "z")]
    pub y: f64,
}

/// Latest known state of one aircraft. Attributes other than the position
/// are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftPosition {
    pub callsign: String,
    pub position: Position,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Full aircraft-data payload keyed by callsign.
pub type AircraftSnapshot = HashMap<String, AircraftPosition>;

/// Build a snapshot from the feed's `{callsign: {position: {..}, ..}}` object.
///
/// Entries without a usable position are skipped rather than failing the
/// whole payload.
pub fn parse_aircraft_snapshot(payload: Value) -> Result<AircraftSnapshot> {
    let entries = match payload {
        Value::Object(map) => map,
        other => {
            return Err(AtcError::Decode(serde_json::Error::custom(format!(
                "aircraft data must be an object, got {other}"
            ))))
        }
    };

    let mut snapshot = AircraftSnapshot::with_capacity(entries.len());
    for (callsign, attrs) in entries {
        let Value::Object(mut attrs) = attrs else {
            continue;
        };
        let Some(position) = attrs
            .remove("position")
            .and_then(|p| serde_json::from_value::<Position>(p).ok())
        else {
            continue;
        };
        snapshot.insert(
            callsign.clone(),
            AircraftPosition {
                callsign,
                position,
                extra: attrs,
            },
        );
    }
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Error => write!(f, "Error"),
        }
    }
}

/// One diagnostic log line. `status` is set only for connection
/// transitions; dropped-message diagnostics carry `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub timestamp: DateTime<Utc>,
    pub status: Option<ConnectionStatus>,
    pub message: String,
}

impl StatusEntry {
    pub fn is_transition(&self) -> bool {
        self.status.is_some()
    }
}

// ---------------------------------------------------------------------------
// Feed messages
// ---------------------------------------------------------------------------

/// A classified inbound feed message.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    FlightPlan(FlightPlan),
    AircraftData(AircraftSnapshot),
    /// Unrecognised kind, kept only for logging.
    Ignored(String),
}

#[derive(Deserialize)]
struct Envelope {
    t: String,
    #[serde(default)]
    d: Value,
}

/// Decode a raw feed message and classify it by its `t` tag.
pub fn decode_message(text: &str) -> Result<FeedEvent> {
    let envelope: Envelope = serde_json::from_str(text)?;
    match envelope.t.as_str() {
        KIND_FLIGHT_PLAN | KIND_EVENT_FLIGHT_PLAN => {
            Ok(FeedEvent::FlightPlan(serde_json::from_value(envelope.d)?))
        }
        KIND_AIRCRAFT_DATA | KIND_EVENT_AIRCRAFT_DATA => {
            Ok(FeedEvent::AircraftData(parse_aircraft_snapshot(envelope.d)?))
        }
        _ => Ok(FeedEvent::Ignored(envelope.t)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
