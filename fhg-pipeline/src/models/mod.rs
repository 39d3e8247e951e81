//! Data models for the validation pipeline

pub mod bundle;
pub mod issue;
pub mod observation;
pub mod report;
pub mod score;
pub mod task;

pub use bundle::{normalize_id, Bundle, InputError, ResourceIndex};
pub use issue::{Issue, IssueSource, ResourceRef, Severity};
pub use observation::{Observation, PatientContext, SubjectKey, VitalParameter};
pub use report::{NarrativeText, StageSummary, ValidationReport};
pub use score::{ClinicalScoreSet, RiskBand, SubScore, SubjectScore};
pub use task::{BundleInfo, StageResult, StateTransition, Task, TaskError, INPUT_UNREADABLE_CODE};
