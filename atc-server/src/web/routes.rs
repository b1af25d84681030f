//! REST API route handlers.
//!
//! Every handler works on copies handed out by the `StateStore`; locks are
//! never held across an `.await`.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use atc_core::clearance::{record_for_plan, validate_runway};
use atc_core::geo;
use atc_core::store::{DEFAULT_RECENT_LIMIT, STATUS_LOG_VISIBLE};
use atc_core::types::FlightPlan;

use crate::web::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct FlightParams {
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct ClearanceBody {
    #[serde(flatten)]
    plan: FlightPlan,
    runway: Option<String>,
}

#[derive(Deserialize)]
pub struct RunwayBody {
    runway: String,
}

#[derive(Deserialize)]
pub struct FilterBody {
    airport: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bad_request(err: impl Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": err.to_string()})),
    )
}

// ---------------------------------------------------------------------------
// Read endpoints
// ---------------------------------------------------------------------------

/// GET /api/flights: recent flights under the active airport filter.
pub async fn api_flights(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FlightParams>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, state.store.capacity());
    let filter = state.store.filter();
    let flights = state.store.list_recent_flights(limit, filter.as_deref());
    Json(serde_json::to_value(&flights).unwrap_or(json!([])))
}

/// GET /api/status: connection status, recent diagnostics, feed counters.
pub async fn api_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = &state.store;
    Json(json!({
        "status": store.status(),
        "log": store.recent_log(STATUS_LOG_VISIBLE),
        "stats": state.stats.snapshot(),
        "history": store.history_len(),
        "filter": store.filter(),
        "feed_url": state.feed_url,
    }))
}

/// GET /api/aircraft: latest aircraft snapshot keyed by callsign.
pub async fn api_aircraft(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.aircraft();
    Json(serde_json::to_value(&*snapshot).unwrap_or(json!({})))
}

/// GET /api/airports: built-in airport table.
pub async fn api_airports() -> impl IntoResponse {
    Json(json!(geo::airports()))
}

/// GET /api/export: full history as a downloadable document.
pub async fn api_export(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let export = state.store.export();
    (
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"flight_history.json\"",
        )],
        Json(export),
    )
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// POST /api/clearance: clear a flight plan by hand and keep the record.
pub async fn api_clearance(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClearanceBody>,
) -> (StatusCode, Json<Value>) {
    let runway = match body.runway.as_deref().map(str::trim) {
        Some(r) if !r.is_empty() => match validate_runway(r) {
            Ok(r) => Some(r),
            Err(e) => return bad_request(e),
        },
        _ => None,
    };

    let (record, clearance) =
        match record_for_plan(&body.plan, runway.as_deref(), chrono::Utc::now()) {
            Ok(pair) => pair,
            Err(e) => return bad_request(e),
        };

    let response = json!({
        "clearance": clearance.text,
        "squawk": clearance.squawk,
        "record": record,
    });
    if let Err(e) = state.store.append_flight(record) {
        return bad_request(e);
    }

    tracing::info!(callsign = ?body.plan.callsign, "Manual clearance issued");
    (StatusCode::CREATED, Json(response))
}

/// POST /api/runway: re-clear every held flight for a new runway.
pub async fn api_runway(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunwayBody>,
) -> (StatusCode, Json<Value>) {
    let runway = match validate_runway(&body.runway) {
        Ok(r) => r,
        Err(e) => return bad_request(e),
    };
    match state.store.update_runway(&runway) {
        Ok(updated) => {
            tracing::info!("Runway set to {runway}, {updated} clearances rewritten");
            (
                StatusCode::OK,
                Json(json!({"updated": updated, "runway": runway})),
            )
        }
        Err(e) => bad_request(e),
    }
}

/// POST /api/history/clear: drop all flight records.
pub async fn api_clear_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cleared = state.store.clear_history();
    tracing::info!("History cleared ({cleared} records)");
    Json(json!({"cleared": cleared}))
}

/// GET /api/filter: current airport filter.
pub async fn api_filter_get(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({"airport": state.store.filter()}))
}

/// POST /api/filter: set (or clear with null/blank) the airport filter.
pub async fn api_filter_set(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FilterBody>,
) -> (StatusCode, Json<Value>) {
    match state.store.set_filter(body.airport.as_deref()) {
        Ok(airport) => (StatusCode::OK, Json(json!({"airport": airport}))),
        Err(e) => bad_request(e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
