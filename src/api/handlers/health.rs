//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;
use std::time::SystemTime;
use tracing::instrument;

use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `healthy` while the server answers
    pub status: String,
    /// Crate version
    pub version: String,
    /// Seconds since startup
    pub uptime_seconds: u64,
    /// Tracked site id
    pub site_id: u64,
    /// Whether requests to this endpoint are tracked
    pub tracked: bool,
}

/// Returns service health information.
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = SystemTime::now()
        .duration_since(state.start_time)
        .unwrap_or_default()
        .as_secs();

    let config = state.tracker.config();
    let tracked = !config.exclude_paths().iter().any(|path| path == "/health");

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        site_id: config.site_id(),
        tracked,
    })
}
