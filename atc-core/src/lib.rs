//! atc-core: flight-plan decoding, clearance synthesis, and shared state.
//!
//! No async, no network I/O. Just data types, pure functions, and the
//! synchronized state store. `atc-server` wraps this with the live feed
//! client, the query API, and the CLI.

pub mod clearance;
pub mod config;
pub mod geo;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use clearance::{make_clearance, Clearance};
pub use store::{FlightView, HistoryExport, StateStore};
pub use types::*;
