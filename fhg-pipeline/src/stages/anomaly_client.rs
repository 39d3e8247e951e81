//! Anomaly scoring adapter
//!
//! Sends the extracted observation sequence; the service returns one score
//! per observation. Observations at or above the configured threshold become
//! warnings on the source Observation resource.

use async_trait::async_trait;
use fhg_common::events::Stage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{http, StageError, StageExecutor, StageInput, StageOutput};
use crate::config::{AnomalyServiceConfig, ServiceEndpoint};
use crate::models::{Issue, Observation, Severity};

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    threshold: f64,
    observations: Vec<ObservationPayload<'a>>,
}

#[derive(Debug, Serialize)]
struct ObservationPayload<'a> {
    index: usize,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    encounter: Option<&'a str>,
    parameter: &'static str,
    value: f64,
    unit: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservationScore {
    pub index: usize,
    pub score: f64,
    /// Service-side flag; computed from the threshold when absent
    #[serde(default)]
    pub flagged: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: Vec<ObservationScore>,
}

pub struct AnomalyClient {
    http_client: reqwest::Client,
    endpoint: ServiceEndpoint,
    threshold: f64,
}

impl AnomalyClient {
    pub fn new(http_client: reqwest::Client, config: &AnomalyServiceConfig) -> Self {
        Self {
            http_client,
            endpoint: config.endpoint(),
            threshold: config.threshold,
        }
    }
}

#[async_trait]
impl StageExecutor for AnomalyClient {
    fn stage(&self) -> Stage {
        Stage::Anomaly
    }

    fn timeout(&self) -> Duration {
        self.endpoint.timeout()
    }

    async fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let observations = &input.extraction.observations;
        if observations.is_empty() {
            debug!(task_id = %input.task_id, "No observations to score");
            return Ok(StageOutput::default());
        }

        let request = ScoreRequest {
            threshold: self.threshold,
            observations: observations
                .iter()
                .enumerate()
                .map(|(index, o)| ObservationPayload {
                    index,
                    subject: &o.key.subject,
                    encounter: o.key.encounter.as_deref(),
                    parameter: o.parameter.label(),
                    value: o.value,
                    unit: &o.unit,
                    timestamp: o.timestamp.map(|t| t.to_rfc3339()),
                })
                .collect(),
        };

        let response = self
            .http_client
            .post(&self.endpoint.url)
            .json(&request)
            .send()
            .await
            .map_err(http::send_error)?;

        let payload: ScoreResponse = http::read_json(response).await?;
        let issues = flag_outliers(payload.scores, observations, self.threshold)?;
        Ok(StageOutput::issues(issues))
    }
}

/// One warning per flagged observation; an index outside the request is malformed
pub fn flag_outliers(
    scores: Vec<ObservationScore>,
    observations: &[Observation],
    threshold: f64,
) -> Result<Vec<Issue>, StageError> {
    let mut issues = Vec::new();
    for score in scores {
        let observation = observations.get(score.index).ok_or_else(|| {
            StageError::Malformed(format!(
                "score for observation {} but only {} were sent",
                score.index,
                observations.len()
            ))
        })?;
        let flagged = score.flagged.unwrap_or(score.score >= threshold);
        if flagged {
            issues.push(
                Issue::new(
                    Severity::Warning,
                    Stage::Anomaly,
                    observation.source.clone(),
                    format!(
                        "Unusual {} reading {} {} (anomaly score {:.2})",
                        observation.parameter, observation.value, observation.unit, score.score
                    )
                    .trim_end()
                    .to_string(),
                )
                .with_code("anomaly-outlier"),
            );
        }
    }
    Ok(issues)
}
