//! HTTP API for flight boards
//!
//! Thin handlers over [`AcquisitionManager::get_current`]. Every board
//! response has the same JSON shape; only a storage outage changes the
//! status code.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::acquisition::AcquisitionManager;
use crate::data::{ExtractionResult, Mode};

/// Build the axum Router with all endpoints
pub fn router(manager: Arc<AcquisitionManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/departures", get(departures))
        .route("/api/arrivals", get(arrivals))
        .with_state(manager)
}

/// Serve the API on `addr` until the process stops
pub async fn start(addr: SocketAddr, manager: Arc<AcquisitionManager>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP API listening on http://{addr}");
    axum::serve(listener, router(manager)).await
}

async fn health() -> &'static str {
    "ok"
}

async fn departures(
    State(manager): State<Arc<AcquisitionManager>>,
) -> (StatusCode, Json<ExtractionResult>) {
    board(&manager, Mode::Departures).await
}

async fn arrivals(
    State(manager): State<Arc<AcquisitionManager>>,
) -> (StatusCode, Json<ExtractionResult>) {
    board(&manager, Mode::Arrivals).await
}

async fn board(manager: &AcquisitionManager, mode: Mode) -> (StatusCode, Json<ExtractionResult>) {
    let result = manager.get_current(mode).await;
    let status = if result.is_cache_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(result))
}
