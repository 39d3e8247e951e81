//! Terminal validation report

use chrono::{DateTime, Utc};
use fhg_common::events::{Stage, StageOutcome, TaskStatus, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::issue::{Issue, IssueSource, Severity};
use super::score::ClinicalScoreSet;

/// Narrative sections produced by the text-generation service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeText {
    pub patient_summary: String,
    pub clinical_handoff: String,
    pub audit_notes: String,
    /// Model that produced the text, when the service reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl NarrativeText {
    pub fn is_blank(&self) -> bool {
        self.patient_summary.trim().is_empty()
            && self.clinical_handoff.trim().is_empty()
            && self.audit_notes.trim().is_empty()
    }
}

/// Per-stage line of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub issue_count: usize,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated, deduplicated outcome of one task
///
/// Created once when the task reaches a terminal status, immutable afterwards.
/// The same shape (with a non-terminal status) is handed to the narrative
/// stage as the report-so-far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub verdict: Verdict,
    /// Ranked: most severe first
    pub issues: Vec<Issue>,
    pub severity_counts: BTreeMap<Severity, usize>,
    pub stage_counts: BTreeMap<IssueSource, usize>,
    pub stages: Vec<StageSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_scores: Option<ClinicalScoreSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<NarrativeText>,
    pub generated_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.severity_counts.get(&severity).copied().unwrap_or(0)
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}
