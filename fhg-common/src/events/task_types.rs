//! Validation task type definitions
//!
//! Shared vocabulary for pipeline tasks: which stage ran, how it ended,
//! where the task is in its state machine and what the overall outcome was.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One independent validation or scoring step of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Schema (structural) check of the raw bundle bytes
    Syntactic,
    /// Implementation-guide profile conformance
    Semantic,
    /// Statistical outlier scoring of extracted vitals
    Anomaly,
    /// Early-warning score and clinical rules (in-process)
    Clinical,
    /// Best-effort narrative text generation
    Narrative,
}

impl Stage {
    /// Every stage, in dispatch order
    pub const ALL: [Stage; 5] = [
        Stage::Syntactic,
        Stage::Semantic,
        Stage::Anomaly,
        Stage::Clinical,
        Stage::Narrative,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Syntactic => "syntactic",
            Stage::Semantic => "semantic",
            Stage::Anomaly => "anomaly",
            Stage::Clinical => "clinical",
            Stage::Narrative => "narrative",
        }
    }

    /// Stages backed by an external validation service.
    ///
    /// Only these decide whether a task is completed, partially completed or failed.
    /// Clinical scoring is local and narrative generation is best-effort.
    pub fn is_validation(self) -> bool {
        matches!(self, Stage::Syntactic | Stage::Semantic | Stage::Anomaly)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a stage terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Failure,
    Skipped,
}

/// Overall task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Submitted, waiting for a worker
    Queued,
    /// Owned by a worker
    Running,
    /// Every attempted validation stage succeeded
    Completed,
    /// Every attempted validation stage failed, or the task timed out
    Failed,
    /// At least one validation stage succeeded and at least one failed
    PartiallyCompleted,
    /// Cancelled by the caller
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::PartiallyCompleted
                | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::PartiallyCompleted => "partially-completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(TaskStatus::Queued),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "partially-completed" => Some(TaskStatus::PartiallyCompleted),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

/// Position of a task in the pipeline state machine
///
/// Declaration order is pipeline order; a task never moves to an earlier state.
/// SYNTACTIC_CHECK → PARALLEL_CHECKS (semantic ∥ anomaly ∥ clinical) → NARRATIVE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Received,
    Extracted,
    SyntacticCheck,
    ParallelChecks,
    Narrative,
    Aggregating,
    Done,
}

impl PipelineState {
    /// Allowed successor states
    ///
    /// Any non-terminal state may jump straight to `Aggregating` when the task
    /// is cancelled, times out or the bundle is unreadable.
    pub fn successors(self) -> &'static [PipelineState] {
        use PipelineState::*;
        match self {
            Received => &[Extracted, Aggregating],
            Extracted => &[SyntacticCheck, Aggregating],
            SyntacticCheck => &[ParallelChecks, Aggregating],
            ParallelChecks => &[Narrative, Aggregating],
            Narrative => &[Aggregating],
            Aggregating => &[Done],
            Done => &[],
        }
    }

    pub fn can_transition_to(self, next: PipelineState) -> bool {
        self.successors().contains(&next)
    }

    /// Stages that are dispatched while the task sits in this state
    pub fn stages(self) -> &'static [Stage] {
        match self {
            PipelineState::SyntacticCheck => &[Stage::Syntactic],
            PipelineState::ParallelChecks => &[Stage::Semantic, Stage::Anomaly, Stage::Clinical],
            PipelineState::Narrative => &[Stage::Narrative],
            _ => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Received => "RECEIVED",
            PipelineState::Extracted => "EXTRACTED",
            PipelineState::SyntacticCheck => "SYNTACTIC_CHECK",
            PipelineState::ParallelChecks => "PARALLEL_CHECKS",
            PipelineState::Narrative => "NARRATIVE",
            PipelineState::Aggregating => "AGGREGATING",
            PipelineState::Done => "DONE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RECEIVED" => Some(PipelineState::Received),
            "EXTRACTED" => Some(PipelineState::Extracted),
            "SYNTACTIC_CHECK" => Some(PipelineState::SyntacticCheck),
            "PARALLEL_CHECKS" => Some(PipelineState::ParallelChecks),
            "NARRATIVE" => Some(PipelineState::Narrative),
            "AGGREGATING" => Some(PipelineState::Aggregating),
            "DONE" => Some(PipelineState::Done),
            _ => None,
        }
    }
}

/// Overall validation verdict of a finished task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pass,
    PassWithWarnings,
    Fail,
}
