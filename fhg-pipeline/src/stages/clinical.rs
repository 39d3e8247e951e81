//! In-process clinical scoring stage

use async_trait::async_trait;
use fhg_common::events::Stage;
use std::time::Duration;
use tracing::debug;

use super::{StageError, StageExecutor, StageInput, StageOutput};
use crate::scoring;

/// Runs the NEWS2 rule engine over the extracted observations
#[derive(Debug, Default)]
pub struct ClinicalScorer;

impl ClinicalScorer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageExecutor for ClinicalScorer {
    fn stage(&self) -> Stage {
        Stage::Clinical
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        if input.extraction.is_unreadable() {
            return Err(StageError::MissingInput("bundle could not be read".to_string()));
        }
        let (scores, issues) = scoring::evaluate(&input.extraction);
        debug!(
            task_id = %input.task_id,
            subjects = scores.subjects.len(),
            alerts = issues.len(),
            "Clinical scoring complete"
        );
        Ok(StageOutput {
            issues,
            scores: Some(scores),
            narrative: None,
        })
    }
}
