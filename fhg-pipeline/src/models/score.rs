//! Clinical early-warning score results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::issue::ResourceRef;
use super::observation::{SubjectKey, VitalParameter};

/// Risk band derived from the aggregate score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn label(self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
        }
    }
}

/// Points awarded for one parameter, traceable to the reading that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub parameter: VitalParameter,
    pub value: f64,
    pub points: u8,
    /// Observation resource the value came from
    pub source: ResourceRef,
    pub recorded_order: usize,
    pub timestamp: Option<DateTime<Utc>>,
    /// Adjustment applied on top of the banded points (oxygen correction)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<String>,
}

/// Score for one subject/encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectScore {
    pub key: SubjectKey,
    pub score: u8,
    pub band: RiskBand,
    pub sub_scores: Vec<SubScore>,
    /// Scored parameters with no usable reading; never treated as normal
    pub not_evaluated: Vec<VitalParameter>,
}

impl SubjectScore {
    pub fn sub_score(&self, parameter: VitalParameter) -> Option<&SubScore> {
        self.sub_scores.iter().find(|s| s.parameter == parameter)
    }

    pub fn is_evaluated(&self, parameter: VitalParameter) -> bool {
        !self.not_evaluated.contains(&parameter)
    }
}

/// Scores for every subject/encounter of a task, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalScoreSet {
    pub subjects: Vec<SubjectScore>,
}

impl ClinicalScoreSet {
    pub fn get(&self, key: &SubjectKey) -> Option<&SubjectScore> {
        self.subjects.iter().find(|s| &s.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Highest band across subjects
    pub fn highest_band(&self) -> Option<RiskBand> {
        self.subjects.iter().map(|s| s.band).max()
    }
}
