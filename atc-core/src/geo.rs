//! Airport table and distance helpers.
//!
//! Positions are in the feed's native map coordinates (the same x/y the
//! aircraft-data events report), so distances are planar and unitless.

use serde::Serialize;

use crate::types::Position;

/// A known airport and its map position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Airport {
    pub code: &'static str,
    pub position: Position,
}

const fn ap(code: &'static str, x: f64, y: f64) -> Airport {
    Airport {
        code,
        position: Position { x, y },
    }
}

/// Built-in airports in feed coordinates.
pub const AIRPORTS: &[Airport] = &[
    ap("IBAR", -1250.0, 2100.0),
    ap("IHEN", -890.0, 1890.0),
    ap("ILAR", -1540.0, 2250.0),
    ap("IIAB", -720.0, 1750.0),
    ap("IPAP", -2100.0, 2890.0),
    ap("IGRV", -980.0, 1560.0),
    ap("IJAF", -2450.0, 3210.0),
    ap("IZOL", -2890.0, 2780.0),
    ap("ISCM", -2340.0, 2100.0),
    ap("IDCS", -450.0, 2690.0),
    ap("ITKO", -1670.0, 1340.0),
    ap("ILKL", -1234.0, 3450.0),
    ap("IPPH", -3200.0, 2100.0),
    ap("IGAR", -2100.0, 3890.0),
    ap("IBLT", -560.0, 2340.0),
    ap("IRFD", -2780.0, 3100.0),
    ap("IMLR", -890.0, 1450.0),
    ap("ITRC", -2890.0, 4100.0),
    ap("IBTH", -1890.0, 2450.0),
    ap("IUFO", -2560.0, 3200.0),
    ap("ISAU", -670.0, 3100.0),
    ap("ISKP", -3100.0, 4000.0),
];

/// Look up an airport by code (case-insensitive).
pub fn airport(code: &str) -> Option<&'static Airport> {
    AIRPORTS
        .iter()
        .find(|a| a.code.eq_ignore_ascii_case(code.trim()))
}

pub fn airports() -> &'static [Airport] {
    AIRPORTS
}

/// Straight-line distance between two map positions.
pub fn distance(a: &Position, b: &Position) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Distance from `from` to the airport `code`, if the airport is known.
pub fn distance_to_airport(from: &Position, code: &str) -> Option<f64> {
    airport(code).map(|a| distance(from, &a.position))
}
