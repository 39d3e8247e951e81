//! Submission, cancellation and status queries
//!
//! The API layer talks to the pipeline only through [`PipelineService`].
//! Submission returns as soon as the task is stored and queued; the worker
//! pool does the rest.

use chrono::Utc;
use fhg_common::events::{EventBus, FhgEvent};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::TaskSignals;
use crate::models::{BundleInfo, Task};
use crate::store::TaskStore;

const SUPERSEDED_REASON: &str = "superseded by a newer submission";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Task not found: {0}")]
    NotFound(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Submission queue is full")]
    QueueFull,

    #[error(transparent)]
    Store(#[from] fhg_common::Error),
}

/// One bundle handed in for validation
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub bytes: Vec<u8>,
    /// Logical upload the bundle belongs to; a newer submission with the
    /// same key supersedes older tasks
    pub upload_key: Option<String>,
    pub filename: Option<String>,
}

#[derive(Clone)]
pub struct PipelineService {
    store: Arc<dyn TaskStore>,
    event_bus: EventBus,
    signals: TaskSignals,
    queue: mpsc::Sender<Uuid>,
}

impl PipelineService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        event_bus: EventBus,
        signals: TaskSignals,
        queue: mpsc::Sender<Uuid>,
    ) -> Self {
        Self {
            store,
            event_bus,
            signals,
            queue,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Store and enqueue a bundle, returning its task id
    ///
    /// Queue capacity is reserved before anything is written, so a full
    /// queue leaves no trace.
    pub async fn submit(&self, submission: Submission) -> Result<Uuid, ServiceError> {
        if submission.bytes.is_empty() {
            return Err(ServiceError::InvalidInput("request body is empty".to_string()));
        }
        let permit = self.queue.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => ServiceError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => {
                ServiceError::Conflict("pipeline is shutting down".to_string())
            }
        })?;

        if let Some(key) = submission.upload_key.as_deref() {
            self.supersede(key).await?;
        }

        let task = Task::new(BundleInfo {
            upload_key: submission.upload_key.clone(),
            filename: submission.filename,
            size_bytes: submission.bytes.len(),
        });
        let task_id = task.task_id;
        self.store.insert(&task, &submission.bytes).await?;
        self.signals.register(task_id).await;
        permit.send(task_id);

        info!(
            task_id = %task_id,
            upload_key = submission.upload_key.as_deref().unwrap_or_default(),
            size_bytes = task.bundle.size_bytes,
            "Task submitted"
        );
        self.event_bus.emit_lossy(FhgEvent::TaskSubmitted {
            task_id,
            upload_key: submission.upload_key,
            timestamp: Utc::now(),
        });
        Ok(task_id)
    }

    /// Cancel unfinished tasks for `upload_key` and purge finished ones
    async fn supersede(&self, upload_key: &str) -> Result<(), ServiceError> {
        for task in self.store.find_by_upload_key(upload_key).await? {
            if task.is_terminal() {
                self.store.purge(task.task_id).await?;
                info!(task_id = %task.task_id, upload_key, "Purged superseded task");
            } else if self.signals.cancel(task.task_id, SUPERSEDED_REASON).await {
                info!(task_id = %task.task_id, upload_key, "Cancelled superseded task");
            }
        }
        Ok(())
    }

    /// Request cancellation of a queued or running task
    pub async fn cancel(&self, task_id: Uuid, reason: Option<&str>) -> Result<Task, ServiceError> {
        let task = self.status(task_id).await?;
        if task.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "task {} already finished as {}",
                task_id,
                task.status.as_str()
            )));
        }
        let reason = reason.unwrap_or(super::DEFAULT_CANCEL_REASON);
        if !self.signals.cancel(task_id, reason).await {
            self.cancel_unregistered(task_id, reason).await?;
        }
        info!(task_id = %task_id, reason, "Task cancellation requested");
        Ok(task)
    }

    /// Cancel a task that has no live signal
    ///
    /// Either left over from a previous run and not yet requeued by recovery,
    /// or finished (and unregistered) since it was last read. The signal is
    /// kept only in the first case.
    async fn cancel_unregistered(&self, task_id: Uuid, reason: &str) -> Result<(), ServiceError> {
        warn!(task_id = %task_id, "Cancel requested for task with no live signal");
        self.signals.register(task_id).await.cancel(reason);

        let current = match self.store.load(task_id).await {
            Ok(current) => current,
            Err(e) => {
                self.signals.remove(task_id).await;
                return Err(e.into());
            }
        };
        match current {
            Some(task) if !task.is_terminal() => Ok(()),
            Some(task) => {
                self.signals.remove(task_id).await;
                Err(ServiceError::Conflict(format!(
                    "task {} already finished as {}",
                    task_id,
                    task.status.as_str()
                )))
            }
            None => {
                self.signals.remove(task_id).await;
                Err(ServiceError::NotFound(task_id))
            }
        }
    }

    pub async fn status(&self, task_id: Uuid) -> Result<Task, ServiceError> {
        self.store
            .load(task_id)
            .await?
            .ok_or(ServiceError::NotFound(task_id))
    }

    /// Remove a finished task
    pub async fn purge(&self, task_id: Uuid) -> Result<(), ServiceError> {
        let task = self.status(task_id).await?;
        if !task.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "task {} is still {}",
                task_id,
                task.status.as_str()
            )));
        }
        if !self.store.purge(task_id).await? {
            return Err(ServiceError::NotFound(task_id));
        }
        info!(task_id = %task_id, "Task purged");
        Ok(())
    }

    /// Tasks waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Re-enqueue recovered tasks, waiting for queue capacity
    pub async fn requeue(&self, task_ids: Vec<Uuid>) -> Result<(), ServiceError> {
        for task_id in task_ids {
            self.signals.register(task_id).await;
            self.queue
                .send(task_id)
                .await
                .map_err(|_| ServiceError::Conflict("pipeline is shutting down".to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTaskStore;
    use fhg_common::events::TaskStatus;

    fn service(capacity: usize) -> (PipelineService, mpsc::Receiver<Uuid>, TaskSignals) {
        let (tx, rx) = mpsc::channel(capacity);
        let signals = TaskSignals::new();
        let service = PipelineService::new(
            Arc::new(InMemoryTaskStore::new()),
            EventBus::new(16),
            signals.clone(),
            tx,
        );
        (service, rx, signals)
    }

    fn bundle(key: Option<&str>) -> Submission {
        Submission {
            bytes: br#"{"resourceType":"Bundle","entry":[]}"#.to_vec(),
            upload_key: key.map(str::to_string),
            filename: Some("bundle.json".to_string()),
        }
    }

    #[tokio::test]
    async fn test_submit_queues_task() {
        let (service, mut rx, _) = service(4);
        let task_id = service.submit(bundle(None)).await.unwrap();
        assert_eq!(rx.recv().await, Some(task_id));
        let task = service.status(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.bundle.filename.as_deref(), Some("bundle.json"));
    }

    #[tokio::test]
    async fn test_empty_body_rejected() {
        let (service, _rx, _) = service(4);
        let result = service.submit(Submission::default()).await;
        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_full_queue_rejected_without_storing() {
        let (service, _rx, _) = service(1);
        service.submit(bundle(None)).await.unwrap();
        assert_eq!(service.queue_depth(), 1);
        let result = service.submit(bundle(Some("u1"))).await;
        assert!(matches!(result, Err(ServiceError::QueueFull)));
        assert!(service.store().find_by_upload_key("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_supersession_cancels_unfinished_task() {
        let (service, _rx, signals) = service(4);
        let first = service.submit(bundle(Some("upload-7"))).await.unwrap();
        let signal = signals.register(first).await;
        service.submit(bundle(Some("upload-7"))).await.unwrap();
        assert!(signal.is_cancelled());
        assert_eq!(signal.reason(), SUPERSEDED_REASON);
    }

    #[tokio::test]
    async fn test_purge_requires_terminal_task() {
        let (service, _rx, _) = service(4);
        let task_id = service.submit(bundle(None)).await.unwrap();
        assert!(matches!(
            service.purge(task_id).await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            service.purge(Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_leftover_task_keeps_signal() {
        let (service, _rx, signals) = service(4);
        let task = Task::new(BundleInfo::default());
        service.store().insert(&task, b"{}").await.unwrap();

        service.cancel(task.task_id, Some("operator request")).await.unwrap();

        let signal = signals.register(task.task_id).await;
        assert!(signal.is_cancelled());
        assert_eq!(signal.reason(), "operator request");
    }

    #[tokio::test]
    async fn test_cancel_unregistered_finished_task_leaves_no_signal() {
        let (service, _rx, signals) = service(4);
        let mut task = Task::new(BundleInfo::default());
        task.status = TaskStatus::Completed;
        service.store().insert(&task, b"{}").await.unwrap();

        let result = service.cancel_unregistered(task.task_id, "late").await;

        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert_eq!(signals.len().await, 0);
    }
}
