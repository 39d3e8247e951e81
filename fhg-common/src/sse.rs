//! Server-Sent Events (SSE) utilities
//!
//! Turns the broadcast EventBus into an axum SSE response.

use crate::events::{EventBus, FhgEvent};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Heartbeat interval for idle SSE connections
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Stream events from `bus` that satisfy `filter` as SSE
///
/// Lagged subscribers skip the dropped events and keep streaming; clients
/// that need the authoritative state poll the status endpoint.
///
/// # Example
/// ```rust,ignore
/// pub async fn event_stream(State(state): State<AppState>) -> impl IntoResponse {
///     fhg_common::sse::event_sse_stream(&state.event_bus, |_| true)
/// }
/// ```
pub fn event_sse_stream<F>(
    bus: &EventBus,
    filter: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    F: Fn(&FhgEvent) -> bool + Send + 'static,
{
    info!("New SSE client connected");
    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !filter(&event) {
                        continue;
                    }
                    let event_type = event.event_type().to_string();
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            debug!("SSE: Broadcasting event: {}", event_type);
                            yield Ok(Event::default().event(event_type).data(json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE: Client lagging, events dropped");
                }
                Err(RecvError::Closed) => {
                    info!("SSE: Event bus closed, ending stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
