//! Append-only view of one task, owned by its worker
//!
//! Every mutation is persisted before the matching event is emitted, so a
//! push client never sees a state the status endpoint cannot confirm.

use chrono::Utc;
use fhg_common::events::{EventBus, FhgEvent, PipelineState, TaskStatus};
use fhg_common::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{Issue, Task, TaskError, ValidationReport};
use crate::stages::StageRun;
use crate::store::TaskStore;

fn invariant(e: TaskError) -> Error {
    Error::Internal(e.to_string())
}

pub struct TaskLog {
    task: Task,
    store: Arc<dyn TaskStore>,
    event_bus: EventBus,
}

impl TaskLog {
    pub fn new(task: Task, store: Arc<dyn TaskStore>, event_bus: EventBus) -> Self {
        Self {
            task,
            store,
            event_bus,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    fn emit_progress(&self) {
        self.event_bus.emit_lossy(FhgEvent::TaskProgress {
            task_id: self.task.task_id,
            state: self.task.state,
            status: self.task.status,
            percentage: self.task.percentage,
            timestamp: Utc::now(),
        });
    }

    pub async fn mark_running(&mut self) -> Result<()> {
        if self.task.status == TaskStatus::Running {
            return Ok(());
        }
        self.task.status = TaskStatus::Running;
        self.task.updated_at = Utc::now();
        self.store.save(&self.task).await?;
        self.emit_progress();
        Ok(())
    }

    /// Move forward to `state`
    ///
    /// Entering the current or an earlier state is a no-op (resumed tasks
    /// replay the sequence); skipping ahead to a non-successor is an error.
    pub async fn enter(&mut self, state: PipelineState) -> Result<()> {
        if state <= self.task.state {
            return Ok(());
        }
        let transition = self.task.transition_to(state).map_err(invariant)?;
        debug!(
            task_id = %self.task.task_id,
            from = transition.old_state.as_str(),
            to = transition.new_state.as_str(),
            "Task state transition"
        );
        self.store.save(&self.task).await?;
        self.emit_progress();
        Ok(())
    }

    /// Record extraction issues and enter EXTRACTED
    pub async fn record_extraction(&mut self, issues: Vec<Issue>) -> Result<()> {
        self.task.extraction_issues = issues;
        self.task.transition_to(PipelineState::Extracted).map_err(invariant)?;
        self.store.save(&self.task).await?;
        self.emit_progress();
        Ok(())
    }

    /// Append a terminated stage
    pub async fn record(&mut self, run: StageRun) -> Result<()> {
        let StageRun {
            result,
            scores,
            narrative,
        } = run;
        let stage = result.stage;
        let outcome = result.outcome;
        let issue_count = result.issues.len();
        let latency_ms = result.latency_ms;

        self.task.append_result(result).map_err(invariant)?;
        if scores.is_some() {
            self.task.clinical_scores = scores;
        }
        if narrative.is_some() {
            self.task.narrative = narrative;
        }
        self.store.save(&self.task).await?;

        self.event_bus.emit_lossy(FhgEvent::StageCompleted {
            task_id: self.task.task_id,
            stage,
            outcome,
            issue_count,
            latency_ms,
            timestamp: Utc::now(),
        });
        self.emit_progress();
        Ok(())
    }

    /// Store the terminal status and report, then enter DONE
    pub async fn finish(
        &mut self,
        status: TaskStatus,
        reason: Option<String>,
        report: ValidationReport,
    ) -> Result<()> {
        let verdict = report.verdict;
        self.task.status = status;
        self.task.reason = reason.clone();
        self.task.report = Some(report);
        self.task.transition_to(PipelineState::Done).map_err(invariant)?;
        self.store.save(&self.task).await?;

        info!(
            task_id = %self.task.task_id,
            status = status.as_str(),
            verdict = ?verdict,
            "Task finished"
        );
        self.emit_progress();
        self.event_bus.emit_lossy(FhgEvent::TaskFinished {
            task_id: self.task.task_id,
            status,
            verdict,
            reason,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
