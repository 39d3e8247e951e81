//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::MODULE_NAME;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("fhg-pipeline")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short git hash embedded at build time
    pub git_hash: String,
    pub build_timestamp: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Tasks accepted but not yet picked up by a worker
    pub queue_depth: usize,
    /// Connected SSE clients
    pub subscribers: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    Json(HealthResponse {
        status: "ok".to_string(),
        module: MODULE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        queue_depth: state.service.queue_depth(),
        subscribers: state.event_bus.subscriber_count(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
