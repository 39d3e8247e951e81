//! Validation task state machine
//!
//! RECEIVED → EXTRACTED → SYNTACTIC_CHECK → PARALLEL_CHECKS → NARRATIVE → AGGREGATING → DONE
//!
//! A task is mutated only by the worker that owns it (see `pipeline::TaskLog`).

use chrono::{DateTime, Utc};
use fhg_common::events::{PipelineState, Stage, StageOutcome, TaskStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::issue::{Issue, ResourceRef, Severity};
use super::report::{NarrativeText, StageSummary, ValidationReport};
use super::score::ClinicalScoreSet;

/// Machine code of the issue recorded for an unreadable bundle
pub const INPUT_UNREADABLE_CODE: &str = "input-unreadable";

/// Violations of the task invariants
#[derive(Debug, Error, PartialEq)]
pub enum TaskError {
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition { from: PipelineState, to: PipelineState },

    #[error("stage {0} already has a result")]
    DuplicateResult(Stage),

    #[error("task already finished with status {0:?}")]
    AlreadyFinished(TaskStatus),
}

/// Submitted bundle metadata (bytes are kept by the store)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleInfo {
    /// Logical upload this submission belongs to; a newer submission with the
    /// same key supersedes older tasks
    pub upload_key: Option<String>,
    pub filename: Option<String>,
    pub size_bytes: usize,
}

/// Result of one terminated stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub issues: Vec<Issue>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Calls made to the executor (2 after a transport retry)
    pub attempts: u32,
}

impl StageResult {
    pub fn success(stage: Stage, issues: Vec<Issue>, latency_ms: u64, attempts: u32) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Success,
            issues,
            latency_ms,
            error: None,
            attempts,
        }
    }

    /// Failed stage with one issue describing the failure
    ///
    /// The issue is fatal for every stage except narrative, which is best-effort.
    pub fn failure(
        stage: Stage,
        error: impl Into<String>,
        code: &str,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        let error = error.into();
        let issue = Issue::new(
            failure_severity(stage),
            stage,
            ResourceRef::Bundle,
            format!("{} stage failed: {}", stage, error),
        )
        .with_code(code);
        Self {
            stage,
            outcome: StageOutcome::Failure,
            issues: vec![issue],
            latency_ms,
            error: Some(error),
            attempts,
        }
    }

    pub fn skipped(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Skipped,
            issues: Vec::new(),
            latency_ms: 0,
            error: Some(reason.into()),
            attempts: 0,
        }
    }

    /// Terminated with a success or failure (not skipped)
    pub fn was_attempted(&self) -> bool {
        self.outcome != StageOutcome::Skipped
    }

    pub fn has_fatal_issue(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Fatal)
    }

    pub fn summary(&self) -> StageSummary {
        StageSummary {
            stage: self.stage,
            outcome: self.outcome,
            issue_count: self.issues.len(),
            latency_ms: self.latency_ms,
            error: self.error.clone(),
        }
    }
}

/// Severity of the issue recorded when `stage` fails
pub fn failure_severity(stage: Stage) -> Severity {
    match stage {
        Stage::Narrative => Severity::Information,
        _ => Severity::Fatal,
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub task_id: Uuid,
    pub old_state: PipelineState,
    pub new_state: PipelineState,
    pub transitioned_at: DateTime<Utc>,
}

/// One submitted bundle moving through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub state: PipelineState,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub bundle: BundleInfo,
    /// Append-only, in append order
    pub results: Vec<StageResult>,
    /// Issues raised while reading the bundle
    pub extraction_issues: Vec<Issue>,
    pub clinical_scores: Option<ClinicalScoreSet>,
    pub narrative: Option<NarrativeText>,
    /// Attempted stages / applicable stages (0.0 - 100.0)
    pub percentage: f64,
    /// Why the task ended (cancellation, timeout, restart recovery)
    pub reason: Option<String>,
    pub report: Option<ValidationReport>,
}

impl Task {
    pub fn new(bundle: BundleInfo) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            state: PipelineState::Received,
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            bundle,
            results: Vec::new(),
            extraction_issues: Vec::new(),
            clinical_scores: None,
            narrative: None,
            percentage: 0.0,
            reason: None,
            report: None,
        }
    }

    pub fn result(&self, stage: Stage) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    pub fn has_result(&self, stage: Stage) -> bool {
        self.result(stage).is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition to a later state; earlier or unlisted states are rejected
    pub fn transition_to(&mut self, new_state: PipelineState) -> Result<StateTransition, TaskError> {
        if !self.state.can_transition_to(new_state) {
            return Err(TaskError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }
        let transition = StateTransition {
            task_id: self.task_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;
        self.updated_at = transition.transitioned_at;
        Ok(transition)
    }

    /// Append a terminated stage's result and refresh the percentage
    pub fn append_result(&mut self, result: StageResult) -> Result<(), TaskError> {
        if self.is_terminal() {
            return Err(TaskError::AlreadyFinished(self.status));
        }
        if self.has_result(result.stage) {
            return Err(TaskError::DuplicateResult(result.stage));
        }
        self.results.push(result);
        self.percentage = self.completion_percentage();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Attempted stages / applicable stages
    ///
    /// Skipped stages are not applicable, so a task whose later stages were
    /// all skipped still reaches 100%.
    pub fn completion_percentage(&self) -> f64 {
        let skipped = self
            .results
            .iter()
            .filter(|r| r.outcome == StageOutcome::Skipped)
            .count();
        let attempted = self.results.len() - skipped;
        let applicable = Stage::ALL.len() - skipped;
        if applicable == 0 {
            return 100.0;
        }
        (attempted as f64 / applicable as f64) * 100.0
    }

    /// Status implied by the validation-stage results
    ///
    /// - failed: every attempted validation stage failed (or none was attempted)
    /// - partially-completed: at least one succeeded and at least one failed
    /// - completed: every attempted validation stage succeeded
    pub fn derive_status(&self) -> TaskStatus {
        let attempted: Vec<_> = self
            .results
            .iter()
            .filter(|r| r.stage.is_validation() && r.was_attempted())
            .collect();
        let failed = attempted
            .iter()
            .filter(|r| r.outcome == StageOutcome::Failure)
            .count();

        if attempted.is_empty() || failed == attempted.len() {
            TaskStatus::Failed
        } else if failed > 0 {
            TaskStatus::PartiallyCompleted
        } else {
            TaskStatus::Completed
        }
    }

    /// False when extraction recorded the bundle as unreadable
    pub fn bundle_readable(&self) -> bool {
        !self
            .extraction_issues
            .iter()
            .any(|i| i.code.as_deref() == Some(INPUT_UNREADABLE_CODE))
    }
}
