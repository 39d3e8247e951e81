//! HTTP API handlers for fhg-pipeline
//!
//! REST endpoints for submission and status polling, plus SSE for push
//! updates.

pub mod health;
pub mod sse;
pub mod tasks;

pub use health::health_routes;
pub use sse::event_stream;
pub use tasks::task_routes;
