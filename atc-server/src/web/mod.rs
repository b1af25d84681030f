//! Web server: axum REST API over the live flight state.
//!
//! Handlers only read from or mutate the shared `StateStore`; none of them
//! touch the network feed, so a dead feed never stalls a request.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use atc_core::store::StateStore;

use crate::feed::FeedStats;

pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub store: Arc<StateStore>,
    pub stats: Arc<FeedStats>,
    pub feed_url: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/flights", get(routes::api_flights))
        .route("/api/status", get(routes::api_status))
        .route("/api/aircraft", get(routes::api_aircraft))
        .route("/api/airports", get(routes::api_airports))
        .route("/api/clearance", post(routes::api_clearance))
        .route("/api/runway", post(routes::api_runway))
        .route("/api/history/clear", post(routes::api_clear_history))
        .route(
            "/api/filter",
            get(routes::api_filter_get).post(routes::api_filter_set),
        )
        .route("/api/export", get(routes::api_export))
        .with_state(state)
        .layer(cors)
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    state: Arc<AppState>,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("ATC 24 API listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
