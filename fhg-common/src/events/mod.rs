//! Event types for the FHIRGuard event system
//!
//! Provides shared event definitions and the EventBus used for push updates.

mod task_types;

pub use task_types::{PipelineState, Stage, StageOutcome, TaskStatus, Verdict};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// FHIRGuard event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// They mirror writes to the task store: an event is only emitted after the
/// corresponding task update has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FhgEvent {
    /// Bundle accepted and queued
    TaskSubmitted {
        task_id: Uuid,
        /// Logical upload the bundle belongs to (for supersession)
        upload_key: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Task moved to a new pipeline state or its percentage changed
    TaskProgress {
        task_id: Uuid,
        state: PipelineState,
        status: TaskStatus,
        /// Attempted stages / applicable stages (0.0 - 100.0)
        percentage: f64,
        timestamp: DateTime<Utc>,
    },

    /// A stage result was appended to the task
    StageCompleted {
        task_id: Uuid,
        stage: Stage,
        outcome: StageOutcome,
        issue_count: usize,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Task reached a terminal status and its report was stored
    TaskFinished {
        task_id: Uuid,
        status: TaskStatus,
        verdict: Verdict,
        /// Why the task ended early (cancellation, timeout), if it did
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl FhgEvent {
    /// Event type name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            FhgEvent::TaskSubmitted { .. } => "TaskSubmitted",
            FhgEvent::TaskProgress { .. } => "TaskProgress",
            FhgEvent::StageCompleted { .. } => "StageCompleted",
            FhgEvent::TaskFinished { .. } => "TaskFinished",
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            FhgEvent::TaskSubmitted { task_id, .. }
            | FhgEvent::TaskProgress { task_id, .. }
            | FhgEvent::StageCompleted { task_id, .. }
            | FhgEvent::TaskFinished { task_id, .. } => *task_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use fhg_common::events::{EventBus, FhgEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(FhgEvent::TaskSubmitted {
///     task_id: uuid::Uuid::new_v4(),
///     upload_key: None,
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FhgEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events buffered per subscriber before the oldest are dropped
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<FhgEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: FhgEvent) -> Result<usize, broadcast::error::SendError<FhgEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Progress updates are always observable through the task store, so
    /// a missing subscriber is not an error.
    pub fn emit_lossy(&self, event: FhgEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events_in_emit_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let task_id = Uuid::new_v4();

        bus.emit_lossy(FhgEvent::TaskSubmitted {
            task_id,
            upload_key: Some("upload-1".to_string()),
            timestamp: Utc::now(),
        });
        bus.emit_lossy(FhgEvent::StageCompleted {
            task_id,
            stage: Stage::Syntactic,
            outcome: StageOutcome::Success,
            issue_count: 2,
            latency_ms: 12,
            timestamp: Utc::now(),
        });

        assert_eq!(rx.recv().await.unwrap().event_type(), "TaskSubmitted");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type(), "StageCompleted");
        assert_eq!(second.task_id(), task_id);
    }

    #[test]
    fn test_emit_without_subscribers_is_reported() {
        let bus = EventBus::new(4);
        let result = bus.emit(FhgEvent::TaskSubmitted {
            task_id: Uuid::new_v4(),
            upload_key: None,
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = FhgEvent::TaskProgress {
            task_id: Uuid::nil(),
            state: PipelineState::ParallelChecks,
            status: TaskStatus::Running,
            percentage: 40.0,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TaskProgress");
        assert_eq!(json["state"], "PARALLEL_CHECKS");
        assert_eq!(json["status"], "running");
    }
}
