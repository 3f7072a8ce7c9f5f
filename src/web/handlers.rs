use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    /// Controller telemetry messages merged since start
    pub telemetry_updates: u64,
    pub uptime_secs: u64,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.sessions.session_count().await,
        telemetry_updates: state.bus.snapshot().updates,
        uptime_secs: state.uptime_secs(),
    })
}
