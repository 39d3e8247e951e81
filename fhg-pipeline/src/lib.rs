//! fhg-pipeline library interface
//!
//! Validation pipeline for FHIR bundles: extraction, syntactic/semantic
//! checks, anomaly scoring, NEWS2 clinical rules and narrative generation,
//! driven per task by the orchestrator and aggregated into one report.

pub mod aggregation;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod models;
pub mod pipeline;
pub mod scoring;
pub mod stages;
pub mod store;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use fhg_common::events::EventBus;
use tower_http::trace::TraceLayer;

use crate::pipeline::PipelineService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Submission, cancellation and status queries
    pub service: PipelineService,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Largest accepted request body
    pub max_bundle_bytes: usize,
}

impl AppState {
    pub fn new(service: PipelineService, event_bus: EventBus, max_bundle_bytes: usize) -> Self {
        Self {
            service,
            event_bus,
            startup_time: Utc::now(),
            max_bundle_bytes,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let body_limit = state.max_bundle_bytes;
    Router::new()
        .merge(api::task_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
