//! Per-task cancellation signals

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_CANCEL_REASON: &str = "cancelled by caller";

/// Cancellation token plus the reason recorded by whoever cancelled first
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string())
    }
}

/// Signals of every task that is queued or running
#[derive(Clone, Default)]
pub struct TaskSignals {
    signals: Arc<RwLock<HashMap<Uuid, CancelSignal>>>,
}

impl TaskSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal for `task_id`, registering one if needed
    pub async fn register(&self, task_id: Uuid) -> CancelSignal {
        self.signals
            .write()
            .await
            .entry(task_id)
            .or_default()
            .clone()
    }

    /// Cancel a registered task; `false` if none is registered
    pub async fn cancel(&self, task_id: Uuid, reason: &str) -> bool {
        match self.signals.read().await.get(&task_id) {
            Some(signal) => {
                signal.cancel(reason);
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, task_id: Uuid) {
        self.signals.write().await.remove(&task_id);
    }

    pub async fn len(&self) -> usize {
        self.signals.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let signal = CancelSignal::new();
        assert_eq!(signal.reason(), DEFAULT_CANCEL_REASON);
        signal.cancel("superseded");
        signal.cancel("cancelled by caller");
        assert!(signal.is_cancelled());
        assert_eq!(signal.reason(), "superseded");
    }

    #[tokio::test]
    async fn test_registered_signal_is_shared() {
        let signals = TaskSignals::new();
        let id = Uuid::new_v4();
        let signal = signals.register(id).await;
        assert!(signals.cancel(id, "stop").await);
        assert!(signal.is_cancelled());
        signals.remove(id).await;
        assert!(!signals.cancel(id, "stop").await);
    }
}
