//! Server-Sent Events (SSE) for task progress streaming

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only stream events of this task
    pub task_id: Option<Uuid>,
}

/// GET /events - SSE event stream
///
/// Streams TaskSubmitted, TaskProgress, StageCompleted and TaskFinished,
/// optionally narrowed to one task with `?task_id=`.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    fhg_common::sse::event_sse_stream(&state.event_bus, move |event| {
        filter.task_id.map_or(true, |id| event.task_id() == id)
    })
}
