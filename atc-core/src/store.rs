//! Shared flight state: bounded history, aircraft snapshot, filter, status.
//!
//! One writer (the feed client plus user-triggered mutations), any number of
//! readers. Each field sits behind its own `RwLock`; no method holds more
//! than one lock at a time, so the fields are independently consistent and
//! there is no lock ordering to get wrong. Readers always get copies.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clearance::{clearance_text, validate_runway};
use crate::geo;
use crate::types::*;

/// Maximum flight records retained before oldest-first eviction.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Records served by a default recent-flights query.
pub const DEFAULT_RECENT_LIMIT: usize = 50;

/// Diagnostic entries exposed to status readers.
pub const STATUS_LOG_VISIBLE: usize = 10;

/// Diagnostic entries retained internally (export includes all of them).
const STATUS_LOG_RETAINED: usize = 200;

// ---------------------------------------------------------------------------
// Read-side views
// ---------------------------------------------------------------------------

/// A flight record as returned to readers: a copy, optionally joined with
/// the aircraft's current position and its distances to both airports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightView {
    pub timestamp: DateTime<Utc>,
    pub callsign: String,
    pub aircraft_type: String,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub flight_level: u32,
    pub route: String,
    /// Withheld for flights arriving at the filtered airport.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clearance_text: Option<String>,
    pub squawk: String,
    pub arriving_at_filter: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_to_departure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_to_arrival: Option<f64>,
}

impl FlightView {
    fn build(record: FlightRecord, filter: Option<&str>, aircraft: &AircraftSnapshot) -> Self {
        let arriving_at_filter = filter == Some(record.arrival_airport.as_str());
        let position = aircraft.get(&record.callsign).map(|ac| ac.position);
        let distance_to_departure =
            position.and_then(|p| geo::distance_to_airport(&p, &record.departure_airport));
        let distance_to_arrival =
            position.and_then(|p| geo::distance_to_airport(&p, &record.arrival_airport));

        FlightView {
            timestamp: record.timestamp,
            callsign: record.callsign,
            aircraft_type: record.aircraft_type,
            departure_airport: record.departure_airport,
            arrival_airport: record.arrival_airport,
            flight_level: record.flight_level,
            route: record.route,
            clearance_text: (!arriving_at_filter).then_some(record.clearance_text),
            squawk: record.squawk,
            arriving_at_filter,
            position,
            distance_to_departure,
            distance_to_arrival,
        }
    }
}

/// Serializable dump of everything the store holds about flights.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryExport {
    pub exported_at: DateTime<Utc>,
    pub count: usize,
    pub flights: Vec<FlightRecord>,
    pub status_log: Vec<StatusEntry>,
}

struct StatusLog {
    current: ConnectionStatus,
    entries: VecDeque<StatusEntry>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct StateStore {
    capacity: usize,
    history: RwLock<VecDeque<FlightRecord>>,
    aircraft: RwLock<Arc<AircraftSnapshot>>,
    filter: RwLock<Option<String>>,
    status: RwLock<StatusLog>,
}

// A panicking writer cannot leave any of these fields half-updated in a way
// readers could observe, so a poisoned lock is still safe to use.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Normalise an airport code: trimmed, upper-case, 3–4 ASCII alphanumerics.
pub fn normalize_airport(code: &str) -> Result<String> {
    let code = code.trim().to_ascii_uppercase();
    if (3..=4).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(code)
    } else {
        Err(AtcError::InvalidAirport(code))
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        StateStore {
            capacity: capacity.max(1),
            history: RwLock::new(VecDeque::with_capacity(capacity.max(1) + 1)),
            aircraft: RwLock::new(Arc::new(AircraftSnapshot::new())),
            filter: RwLock::new(None),
            status: RwLock::new(StatusLog {
                current: ConnectionStatus::Disconnected,
                entries: VecDeque::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // -- history -----------------------------------------------------------

    /// Append a record, evicting the oldest ones beyond capacity.
    pub fn append_flight(&self, record: FlightRecord) -> Result<()> {
        record.validate()?;
        let mut history = write(&self.history);
        history.push_back(record);
        while history.len() > self.capacity {
            history.pop_front();
        }
        Ok(())
    }

    /// Up to `limit` most recent records visible under `filter`, newest last.
    ///
    /// With a filter, flights unrelated to that airport are left out and
    /// flights arriving there come back flagged, without clearance text.
    pub fn list_recent_flights(&self, limit: usize, filter: Option<&str>) -> Vec<FlightView> {
        let filter = filter
            .map(|f| f.trim().to_ascii_uppercase())
            .filter(|f| !f.is_empty());
        let filter = filter.as_deref();
        let aircraft = self.aircraft();

        let mut records: Vec<FlightRecord> = {
            let history = read(&self.history);
            history
                .iter()
                .rev()
                .filter(|r| match filter {
                    Some(code) => r.departure_airport == code || r.arrival_airport == code,
                    None => true,
                })
                .take(limit)
                .cloned()
                .collect()
        };
        records.reverse();

        records
            .into_iter()
            .map(|r| FlightView::build(r, filter, &aircraft))
            .collect()
    }

    /// Re-clear every held flight for `runway`. The whole rewrite happens
    /// under one write lock, so readers see all old or all new text.
    pub fn update_runway(&self, runway: &str) -> Result<usize> {
        let runway = validate_runway(runway)?;
        let mut history = write(&self.history);
        for record in history.iter_mut() {
            record.clearance_text = clearance_text(
                &record.callsign,
                &record.arrival_airport,
                record.flight_level,
                Some(&runway),
                &record.squawk,
            );
        }
        Ok(history.len())
    }

    /// Drop all flight records. Returns how many were removed.
    pub fn clear_history(&self) -> usize {
        let mut history = write(&self.history);
        let removed = history.len();
        history.clear();
        removed
    }

    pub fn history_len(&self) -> usize {
        read(&self.history).len()
    }

    pub fn export(&self) -> HistoryExport {
        let flights: Vec<FlightRecord> = read(&self.history).iter().cloned().collect();
        let status_log: Vec<StatusEntry> = read(&self.status).entries.iter().cloned().collect();
        HistoryExport {
            exported_at: Utc::now(),
            count: flights.len(),
            flights,
            status_log,
        }
    }

    // -- aircraft ----------------------------------------------------------

    /// Replace the aircraft snapshot wholesale.
    pub fn snapshot_aircraft(&self, snapshot: AircraftSnapshot) {
        *write(&self.aircraft) = Arc::new(snapshot);
    }

    pub fn aircraft(&self) -> Arc<AircraftSnapshot> {
        Arc::clone(&read(&self.aircraft))
    }

    // -- filter ------------------------------------------------------------

    /// Set or clear the airport filter. Blank clears it.
    pub fn set_filter(&self, code: Option<&str>) -> Result<Option<String>> {
        let code = match code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => Some(normalize_airport(c)?),
            None => None,
        };
        *write(&self.filter) = code.clone();
        Ok(code)
    }

    pub fn filter(&self) -> Option<String> {
        read(&self.filter).clone()
    }

    // -- status ------------------------------------------------------------

    /// Record a status transition with its diagnostic message.
    pub fn set_status(&self, status: ConnectionStatus, message: impl Into<String>) {
        let mut log = write(&self.status);
        log.current = status;
        push_entry(&mut log.entries, Some(status), message.into());
    }

    /// Append a diagnostic entry. It is not a transition, so it carries no
    /// status and the current status is unchanged.
    pub fn log_diagnostic(&self, message: impl Into<String>) {
        let mut log = write(&self.status);
        push_entry(&mut log.entries, None, message.into());
    }

    pub fn status(&self) -> ConnectionStatus {
        read(&self.status).current
    }

    /// The last `n` diagnostic entries, oldest first.
    pub fn recent_log(&self, n: usize) -> Vec<StatusEntry> {
        let log = read(&self.status);
        let skip = log.entries.len().saturating_sub(n);
        log.entries.iter().skip(skip).cloned().collect()
    }
}

fn push_entry(
    entries: &mut VecDeque<StatusEntry>,
    status: Option<ConnectionStatus>,
    message: String,
) {
    entries.push_back(StatusEntry {
        timestamp: Utc::now(),
        status,
        message,
    });
    while entries.len() > STATUS_LOG_RETAINED {
        entries.pop_front();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};
    use std::thread;

    fn record(callsign: &str, departing: &str, arriving: &str) -> FlightRecord {
        let squawk = "1234".to_string();
        FlightRecord {
            timestamp: Utc::now(),
            callsign: callsign.into(),
            aircraft_type: "A320".into(),
            departure_airport: departing.into(),
            arrival_airport: arriving.into(),
            flight_level: 90,
            route: DEFAULT_ROUTE.into(),
            clearance_text: clearance_text(callsign, arriving, 90, None, &squawk),
            squawk,
        }
    }

    fn position(callsign: &str, x: f64, y: f64) -> (String, AircraftPosition) {
        (
            callsign.to_string(),
            AircraftPosition {
                callsign: callsign.to_string(),
                position: Position { x, y },
                extra: Map::new(),
            },
        )
    }

    #[test]
    fn test_history_bound_evicts_oldest() {
        let store = StateStore::new();
        for i in 1..=101 {
            store
                .append_flight(record(&format!("FLT-{i}"), "IRFD", "ITKO"))
                .unwrap();
        }
        assert_eq!(store.history_len(), 100);

        let flights = store.list_recent_flights(100, None);
        assert_eq!(flights.len(), 100);
        assert_eq!(flights.first().unwrap().callsign, "FLT-2");
        assert_eq!(flights.last().unwrap().callsign, "FLT-101");
    }

    #[test]
    fn test_limit_returns_most_recent_newest_last() {
        let store = StateStore::new();
        for i in 1..=60 {
            store
                .append_flight(record(&format!("FLT-{i}"), "IRFD", "ITKO"))
                .unwrap();
        }
        let flights = store.list_recent_flights(DEFAULT_RECENT_LIMIT, None);
        assert_eq!(flights.len(), 50);
        assert_eq!(flights[0].callsign, "FLT-11");
        assert_eq!(flights[49].callsign, "FLT-60");
        assert!(flights.iter().all(|f| !f.arriving_at_filter));
        assert!(flights.iter().all(|f| f.clearance_text.is_some()));
    }

    #[test]
    fn test_append_rejects_partial_record() {
        let store = StateStore::new();
        let mut bad = record("FLT-1", "IRFD", "ITKO");
        bad.arrival_airport.clear();
        assert!(matches!(
            store.append_flight(bad),
            Err(AtcError::MissingField("arriving"))
        ));
        assert_eq!(store.history_len(), 0);
    }

    #[test]
    fn test_update_runway_rewrites_all() {
        let store = StateStore::new();
        store.append_flight(record("A-1", "IRFD", "ITKO")).unwrap();
        store.append_flight(record("B-2", "IMLR", "IGRV")).unwrap();
        store.append_flight(record("C-3", "IPPH", "IBTH")).unwrap();

        assert_eq!(store.update_runway("09L").unwrap(), 3);

        let flights = store.list_recent_flights(10, None);
        let expected = [("A-1", "ITKO"), ("B-2", "IGRV"), ("C-3", "IBTH")];
        for (view, (callsign, arriving)) in flights.iter().zip(expected) {
            let text = view.clearance_text.as_deref().unwrap();
            assert!(text.contains("runway 09L"), "{text}");
            assert!(text.contains("9000 feet"));
            assert_eq!(view.callsign, callsign);
            assert_eq!(view.arrival_airport, arriving);
            assert_eq!(view.flight_level, 90);
            assert!(text.contains(&format!("Squawk {}.", view.squawk)));
        }
    }

    #[test]
    fn test_update_runway_empty_history_is_noop() {
        let store = StateStore::new();
        assert_eq!(store.update_runway("27").unwrap(), 0);
    }

    #[test]
    fn test_update_runway_invalid() {
        let store = StateStore::new();
        store.append_flight(record("A-1", "IRFD", "ITKO")).unwrap();
        assert!(store.update_runway("banana").is_err());
        let text = store.list_recent_flights(1, None)[0].clearance_text.clone().unwrap();
        assert!(text.contains("runway ___"));
    }

    #[test]
    fn test_filter_semantics() {
        let store = StateStore::new();
        store.append_flight(record("DEP-1", "IMLR", "ITKO")).unwrap();
        store.append_flight(record("ARR-1", "IRFD", "IMLR")).unwrap();
        store.append_flight(record("OTHER-1", "IRFD", "ITKO")).unwrap();

        let flights = store.list_recent_flights(50, Some("IMLR"));
        assert_eq!(flights.len(), 2);

        let dep = &flights[0];
        assert_eq!(dep.callsign, "DEP-1");
        assert!(!dep.arriving_at_filter);
        assert!(dep.clearance_text.is_some());

        let arr = &flights[1];
        assert_eq!(arr.callsign, "ARR-1");
        assert!(arr.arriving_at_filter);
        assert!(arr.clearance_text.is_none());

        let json = serde_json::to_value(arr).unwrap();
        assert!(json.get("clearance_text").is_none());
        assert_eq!(json["arriving_at_filter"], true);

        // Stored state untouched
        let all = store.list_recent_flights(50, None);
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|f| f.clearance_text.is_some()));
    }

    #[test]
    fn test_filter_limit_counts_matching_only() {
        let store = StateStore::new();
        store.append_flight(record("M-1", "IMLR", "ITKO")).unwrap();
        for i in 0..5 {
            store
                .append_flight(record(&format!("X-{i}"), "IRFD", "ITKO"))
                .unwrap();
        }
        let flights = store.list_recent_flights(2, Some("imlr"));
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].callsign, "M-1");
    }

    #[test]
    fn test_clear_history() {
        let store = StateStore::new();
        store.append_flight(record("A-1", "IRFD", "ITKO")).unwrap();
        store.append_flight(record("B-2", "IRFD", "ITKO")).unwrap();
        store.snapshot_aircraft([position("A-1", 0.0, 0.0)].into_iter().collect());
        store.set_status(ConnectionStatus::Connected, "Connected to feed");

        assert_eq!(store.clear_history(), 2);
        assert!(store.list_recent_flights(50, None).is_empty());
        assert_eq!(store.aircraft().len(), 1);
        assert_eq!(store.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_snapshot_full_replace() {
        let store = StateStore::new();
        store.snapshot_aircraft(
            [position("A-1", 0.0, 0.0), position("B-2", 1.0, 1.0)]
                .into_iter()
                .collect(),
        );
        let before = store.aircraft();

        store.snapshot_aircraft([position("C-3", 5.0, 5.0)].into_iter().collect());
        let after = store.aircraft();

        assert_eq!(before.len(), 2);
        assert_eq!(after.len(), 1);
        assert!(after.contains_key("C-3"));
        assert!(!after.contains_key("A-1"));
    }

    #[test]
    fn test_distance_join() {
        let store = StateStore::new();
        store.append_flight(record("A-1", "IMLR", "IGRV")).unwrap();
        store.append_flight(record("B-2", "IMLR", "IGRV")).unwrap();
        store.snapshot_aircraft([position("A-1", -890.0, 1450.0)].into_iter().collect());

        let flights = store.list_recent_flights(50, None);
        let a = &flights[0];
        assert_eq!(a.position, Some(Position { x: -890.0, y: 1450.0 }));
        assert_eq!(a.distance_to_departure, Some(0.0));
        assert!((a.distance_to_arrival.unwrap() - 90.0f64.hypot(110.0)).abs() < 1e-9);

        let b = &flights[1];
        assert!(b.position.is_none());
        assert!(b.distance_to_departure.is_none());
        let json = serde_json::to_value(b).unwrap();
        assert!(json.get("distance_to_arrival").is_none());
    }

    #[test]
    fn test_filter_set_get() {
        let store = StateStore::new();
        assert_eq!(store.filter(), None);
        assert_eq!(store.set_filter(Some(" imlr ")).unwrap(), Some("IMLR".into()));
        assert_eq!(store.filter(), Some("IMLR".into()));
        assert!(store.set_filter(Some("not a code")).is_err());
        assert_eq!(store.filter(), Some("IMLR".into()));
        assert_eq!(store.set_filter(Some("")).unwrap(), None);
        assert_eq!(store.filter(), None);
        store.set_filter(Some("ITKO")).unwrap();
        store.set_filter(None).unwrap();
        assert_eq!(store.filter(), None);
    }

    #[test]
    fn test_status_log_bounded() {
        let store = StateStore::new();
        assert_eq!(store.status(), ConnectionStatus::Disconnected);
        for i in 0..250 {
            store.set_status(ConnectionStatus::Error, format!("fault {i}"));
        }
        store.log_diagnostic("decode failed");
        assert_eq!(store.status(), ConnectionStatus::Error);

        let recent = store.recent_log(STATUS_LOG_VISIBLE);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent.last().unwrap().message, "decode failed");
        assert_eq!(recent.last().unwrap().status, None);
        assert!(!recent.last().unwrap().is_transition());
        assert_eq!(recent[8].status, Some(ConnectionStatus::Error));
        assert_eq!(recent[0].message, "fault 241");

        assert_eq!(store.export().status_log.len(), STATUS_LOG_RETAINED);
    }

    #[test]
    fn test_export() {
        let store = StateStore::new();
        store.append_flight(record("A-1", "IRFD", "ITKO")).unwrap();
        let export = store.export();
        assert_eq!(export.count, 1);
        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["flights"][0]["callsign"], "A-1");
        assert!(json["flights"][0]["clearance_text"].is_string());
        assert!(matches!(json["exported_at"], Value::String(_)));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = Arc::new(StateStore::new());
        store.set_filter(Some("IMLR")).unwrap();

        thread::scope(|s| {
            let writer = Arc::clone(&store);
            s.spawn(move || {
                for i in 0..1000 {
                    let arriving = if i % 2 == 0 { "IMLR" } else { "ITKO" };
                    writer
                        .append_flight(record(&format!("FLT-{i}"), "IRFD", arriving))
                        .unwrap();
                    if i % 100 == 0 {
                        writer.update_runway("27L").unwrap();
                        writer.snapshot_aircraft(
                            [position(&format!("FLT-{i}"), 1.0, 2.0)].into_iter().collect(),
                        );
                    }
                }
            });

            for _ in 0..10 {
                let reader = Arc::clone(&store);
                s.spawn(move || {
                    for _ in 0..200 {
                        let filter = reader.filter();
                        let flights = reader.list_recent_flights(50, filter.as_deref());
                        assert!(flights.len() <= 50);
                        for f in &flights {
                            assert!(!f.callsign.is_empty());
                            assert!(!f.aircraft_type.is_empty());
                            assert!(!f.departure_airport.is_empty());
                            assert!(!f.arrival_airport.is_empty());
                            assert_eq!(f.squawk.len(), 4);
                            assert_eq!(f.arriving_at_filter, f.clearance_text.is_none());
                        }
                        for f in reader.list_recent_flights(100, None) {
                            assert!(!f.clearance_text.unwrap().is_empty());
                        }
                    }
                });
            }
        });

        assert_eq!(store.history_len(), 100);
    }

    #[test]
    fn test_runway_rewrite_is_all_or_nothing_for_readers() {
        let store = Arc::new(StateStore::new());
        for i in 0..DEFAULT_HISTORY_CAPACITY {
            store
                .append_flight(record(&format!("FLT-{i}"), "IRFD", "ITKO"))
                .unwrap();
        }
        store.update_runway("09L").unwrap();

        thread::scope(|s| {
            let writer = Arc::clone(&store);
            s.spawn(move || {
                for i in 0..500 {
                    let runway = if i % 2 == 0 { "27R" } else { "09L" };
                    assert_eq!(writer.update_runway(runway).unwrap(), DEFAULT_HISTORY_CAPACITY);
                }
            });

            for _ in 0..8 {
                let reader = Arc::clone(&store);
                s.spawn(move || {
                    for _ in 0..300 {
                        let flights = reader.list_recent_flights(DEFAULT_HISTORY_CAPACITY, None);
                        assert_eq!(flights.len(), DEFAULT_HISTORY_CAPACITY);
                        let runways: Vec<&str> = flights
                            .iter()
                            .map(|f| {
                                let text = f.clearance_text.as_deref().unwrap();
                                if text.contains("departure runway 09L.") {
                                    "09L"
                                } else if text.contains("departure runway 27R.") {
                                    "27R"
                                } else {
                                    panic!("unexpected clearance: {text}")
                                }
                            })
                            .collect();
                        assert!(
                            runways.iter().all(|r| *r == runways[0]),
                            "mixed runways in one read: {runways:?}"
                        );
                    }
                });
            }
        });

        let last = store.list_recent_flights(1, None);
        assert!(last[0]
            .clearance_text
            .as_deref()
            .unwrap()
            .contains("departure runway 09L."));
    }
}
