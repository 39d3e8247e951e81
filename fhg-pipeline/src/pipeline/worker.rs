//! Fixed-size worker pool draining the task queue
//!
//! Each worker owns one task at a time from dequeue to terminal status.
//! A store failure inside a worker is unrecoverable: the worker trips the
//! fatal token so the process shuts down and restart recovery takes over.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Orchestrator, TaskSignals};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `count` workers on `queue`
    ///
    /// Workers stop taking new tasks once `shutdown` is cancelled and exit
    /// when the queue closes.
    pub fn spawn(
        count: usize,
        queue: mpsc::Receiver<Uuid>,
        orchestrator: Arc<Orchestrator>,
        signals: TaskSignals,
        shutdown: CancellationToken,
        fatal: CancellationToken,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue));
        let handles = (0..count.max(1))
            .map(|worker_id| {
                let queue = queue.clone();
                let orchestrator = orchestrator.clone();
                let signals = signals.clone();
                let shutdown = shutdown.clone();
                let fatal = fatal.clone();
                tokio::spawn(async move {
                    run_worker(worker_id, queue, orchestrator, signals, shutdown, fatal).await
                })
            })
            .collect();
        info!(workers = count.max(1), "Worker pool started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait up to `grace` for workers to finish their current task
    ///
    /// Workers still running afterwards are aborted; their tasks stay
    /// `running` in the store and are recovered on next start.
    pub async fn join(self, grace: Duration) {
        let mut handles = self.handles;
        let waited = tokio::time::timeout(grace, async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;

        if waited.is_err() {
            warn!(grace_secs = grace.as_secs(), "Workers still busy after grace period, aborting");
            for handle in &handles {
                handle.abort();
            }
        } else {
            info!("Worker pool stopped");
        }
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    orchestrator: Arc<Orchestrator>,
    signals: TaskSignals,
    shutdown: CancellationToken,
    fatal: CancellationToken,
) {
    debug!(worker_id, "Worker started");
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                task_id = queue.recv() => task_id,
            }
        };
        let Some(task_id) = next else {
            break;
        };

        let signal = signals.register(task_id).await;
        debug!(worker_id, task_id = %task_id, "Worker picked up task");
        let result = orchestrator.process(task_id, signal).await;
        signals.remove(task_id).await;

        if let Err(e) = result {
            error!(worker_id, task_id = %task_id, error = %e, "Task store failure, stopping service");
            fatal.cancel();
            break;
        }
    }
    debug!(worker_id, "Worker stopped");
}
