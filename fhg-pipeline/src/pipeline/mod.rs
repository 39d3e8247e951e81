//! Pipeline orchestrator
//!
//! # State Progression
//! RECEIVED → EXTRACTED → SYNTACTIC_CHECK → PARALLEL_CHECKS → NARRATIVE → AGGREGATING → DONE
//!
//! - Syntactic completes before anything else is dispatched.
//! - Semantic is skipped when syntactic failed or reported a fatal issue.
//! - Semantic, anomaly and clinical run concurrently as spawned tasks; their
//!   results are appended by the owning worker in arrival order.
//! - Narrative runs only when syntactic and semantic both terminated with
//!   success or failure and the bundle was readable.
//! - Cancellation and the task deadline stop dispatching; in-flight calls are
//!   left to finish and their results are discarded. Both still produce a
//!   report from the partial results.

pub mod control;
pub mod recovery;
pub mod service;
pub mod task_log;
pub mod worker;

use fhg_common::events::{EventBus, PipelineState, Stage, StageOutcome, TaskStatus};
use fhg_common::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregation;
use crate::config::PipelineSettings;
use crate::extraction::extract_bytes;
use crate::models::{ResourceIndex, StageResult};
use crate::stages::{execute_with_policy, StageExecutors, StageInput, StageRun};
use crate::store::TaskStore;

pub use control::{CancelSignal, TaskSignals, DEFAULT_CANCEL_REASON};
pub use service::{PipelineService, ServiceError, Submission};
pub use task_log::TaskLog;
pub use worker::WorkerPool;

pub const SEMANTIC_BLOCKED_REASON: &str = "syntactic check failed or reported fatal issues";

/// How a run of stage groups ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Finished,
    Cancelled,
    TimedOut,
}

/// Drives tasks through the stage sequence
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    event_bus: EventBus,
    executors: StageExecutors,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        event_bus: EventBus,
        executors: StageExecutors,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            event_bus,
            executors,
            settings,
        }
    }

    /// Run `task_id` to a terminal status
    ///
    /// Resumes from whatever results the store already holds. Only a store
    /// failure is returned as an error.
    pub async fn process(&self, task_id: Uuid, signal: CancelSignal) -> Result<()> {
        let Some(task) = self.store.load(task_id).await? else {
            warn!(task_id = %task_id, "Queued task no longer exists, skipping");
            return Ok(());
        };
        if task.is_terminal() {
            return Ok(());
        }
        let raw = self.store.load_bundle(task_id).await?.unwrap_or_default();
        let deadline = Instant::now() + self.settings.task_timeout();

        let mut log = TaskLog::new(task, self.store.clone(), self.event_bus.clone());
        log.mark_running().await?;
        info!(task_id = %task_id, state = log.task().state.as_str(), "Processing task");

        let (bundle, extraction) = extract_bytes(&raw, self.settings.max_observations);
        if log.task().state < PipelineState::Extracted {
            log.record_extraction(extraction.issues.clone()).await?;
        }
        let index: Option<ResourceIndex> = bundle.as_ref().map(|b| b.index());
        let mut input = StageInput {
            task_id,
            raw: Arc::new(raw),
            bundle: bundle.map(Arc::new),
            extraction: Arc::new(extraction),
            report_so_far: None,
        };

        let end = if log.task().state >= PipelineState::Aggregating {
            // Interrupted while aggregating; results are complete
            RunEnd::Finished
        } else {
            self.run_stages(&mut log, &mut input, index.as_ref(), &signal, deadline)
                .await?
        };

        let (status, reason) = match end {
            RunEnd::Finished => (log.task().derive_status(), None),
            RunEnd::Cancelled => (TaskStatus::Cancelled, Some(signal.reason())),
            RunEnd::TimedOut => (
                TaskStatus::Failed,
                Some(format!(
                    "task exceeded its {} s time budget",
                    self.settings.task_timeout_secs
                )),
            ),
        };
        if end != RunEnd::Finished {
            warn!(task_id = %task_id, reason = reason.as_deref().unwrap_or_default(), "Task stopped early");
        }

        log.enter(PipelineState::Aggregating).await?;
        let report = aggregation::aggregate(log.task(), index.as_ref(), status, reason.clone());
        log.finish(status, reason, report).await
    }

    async fn run_stages(
        &self,
        log: &mut TaskLog,
        input: &mut StageInput,
        index: Option<&ResourceIndex>,
        signal: &CancelSignal,
        deadline: Instant,
    ) -> Result<RunEnd> {
        log.enter(PipelineState::SyntacticCheck).await?;
        let end = self.run_group(log, &[Stage::Syntactic], input, signal, deadline).await?;
        if end != RunEnd::Finished {
            return Ok(end);
        }

        if input.bundle.is_none() {
            for stage in [Stage::Semantic, Stage::Anomaly, Stage::Clinical, Stage::Narrative] {
                self.skip(log, stage, "bundle could not be read").await?;
            }
            return Ok(RunEnd::Finished);
        }

        let syntactic_blocks = log
            .task()
            .result(Stage::Syntactic)
            .map(|r| r.outcome == StageOutcome::Failure || r.has_fatal_issue())
            .unwrap_or(true);
        // Must be stored before PARALLEL_CHECKS; recovery fails result-less stages of the current state
        if syntactic_blocks {
            self.skip(log, Stage::Semantic, SEMANTIC_BLOCKED_REASON).await?;
        }
        log.enter(PipelineState::ParallelChecks).await?;
        let end = self
            .run_group(
                log,
                &[Stage::Semantic, Stage::Anomaly, Stage::Clinical],
                input,
                signal,
                deadline,
            )
            .await?;
        if end != RunEnd::Finished {
            return Ok(end);
        }

        let attempted = |stage| {
            log.task()
                .result(stage)
                .is_some_and(StageResult::was_attempted)
        };
        if !(attempted(Stage::Syntactic) && attempted(Stage::Semantic)) {
            self.skip(log, Stage::Narrative, "semantic check did not run").await?;
            return Ok(RunEnd::Finished);
        }

        log.enter(PipelineState::Narrative).await?;
        if !log.task().has_result(Stage::Narrative) {
            let so_far = aggregation::aggregate(log.task(), index, log.task().status, None);
            input.report_so_far = Some(Arc::new(so_far));
        }
        self.run_group(log, &[Stage::Narrative], input, signal, deadline)
            .await
    }

    async fn skip(&self, log: &mut TaskLog, stage: Stage, reason: &str) -> Result<()> {
        if log.task().has_result(stage) {
            return Ok(());
        }
        log.record(StageRun {
            result: StageResult::skipped(stage, reason),
            scores: None,
            narrative: None,
        })
        .await
    }

    /// Dispatch the stages of one group that have no result yet and append
    /// their results as they arrive
    async fn run_group(
        &self,
        log: &mut TaskLog,
        stages: &[Stage],
        input: &StageInput,
        signal: &CancelSignal,
        deadline: Instant,
    ) -> Result<RunEnd> {
        if signal.is_cancelled() {
            return Ok(RunEnd::Cancelled);
        }
        if Instant::now() >= deadline {
            return Ok(RunEnd::TimedOut);
        }

        let mut pending = FuturesUnordered::new();
        for &stage in stages {
            if log.task().has_result(stage) {
                continue;
            }
            let executor = self.executors.get(stage);
            let stage_input = input.clone();
            // Spawned so that dropping `pending` detaches rather than aborts the call
            let handle =
                tokio::spawn(async move { execute_with_policy(executor.as_ref(), &stage_input).await });
            pending.push(async move { (stage, handle.await) });
        }

        while !pending.is_empty() {
            tokio::select! {
                biased;
                _ = signal.cancelled() => return Ok(RunEnd::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Ok(RunEnd::TimedOut),
                Some((stage, joined)) = pending.next() => {
                    let run = match joined {
                        Ok(run) => run,
                        Err(e) => StageRun {
                            result: StageResult::failure(
                                stage,
                                format!("stage task aborted: {}", e),
                                "stage-aborted",
                                0,
                                1,
                            ),
                            scores: None,
                            narrative: None,
                        },
                    };
                    log.record(run).await?;
                }
            }
        }
        Ok(RunEnd::Finished)
    }
}
