//! Stage executors
//!
//! Every pipeline stage sits behind [`StageExecutor`]. External services are
//! reached through HTTP adapters that normalize their payloads into
//! [`Issue`]s; clinical scoring runs in-process. The orchestrator only ever
//! calls [`execute_with_policy`], which owns timeout and retry handling.

pub mod anomaly_client;
pub mod clinical;
pub mod http;
pub mod narrative_client;
pub mod semantic_client;
pub mod syntactic_client;

use async_trait::async_trait;
use fhg_common::events::Stage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ServicesConfig;
use crate::extraction::Extraction;
use crate::models::{Bundle, ClinicalScoreSet, Issue, NarrativeText, StageResult, ValidationReport};

pub use anomaly_client::AnomalyClient;
pub use clinical::ClinicalScorer;
pub use narrative_client::NarrativeClient;
pub use semantic_client::SemanticClient;
pub use syntactic_client::SyntacticClient;

/// Everything a stage may read; shared, never mutated
#[derive(Debug, Clone)]
pub struct StageInput {
    pub task_id: Uuid,
    /// Submitted bytes as received
    pub raw: Arc<Vec<u8>>,
    /// `None` when the bundle could not be read
    pub bundle: Option<Arc<Bundle>>,
    pub extraction: Arc<Extraction>,
    /// Aggregated report of earlier stages (narrative stage only)
    pub report_so_far: Option<Arc<ValidationReport>>,
}

impl StageInput {
    pub fn bundle(&self) -> Result<&Bundle, StageError> {
        self.bundle
            .as_deref()
            .ok_or_else(|| StageError::MissingInput("bundle could not be read".to_string()))
    }
}

/// Normalized stage output
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub issues: Vec<Issue>,
    pub scores: Option<ClinicalScoreSet>,
    pub narrative: Option<NarrativeText>,
}

impl StageOutput {
    pub fn issues(issues: Vec<Issue>) -> Self {
        Self {
            issues,
            ..Default::default()
        }
    }
}

/// Stage execution errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// Service unreachable, overloaded (429/502/503/504) or timed out; retried once
    #[error("transport error: {0}")]
    Transport(String),

    /// Service answered with an error; never retried
    #[error("service error: {0}")]
    Application(String),

    /// Response could not be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Stage cannot run on this input
    #[error("missing input: {0}")]
    MissingInput(String),
}

impl StageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transport(_))
    }

    /// Machine code of the issue recorded for this failure
    pub fn code(&self) -> &'static str {
        match self {
            StageError::Transport(_) => "stage-transport",
            StageError::Application(_) => "stage-application",
            StageError::Malformed(_) => "stage-malformed",
            StageError::MissingInput(_) => "stage-missing-input",
        }
    }
}

/// One pipeline stage
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    /// Budget for a single call
    fn timeout(&self) -> Duration;

    async fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError>;
}

/// Terminated stage: its result plus any payload the task keeps
#[derive(Debug, Clone)]
pub struct StageRun {
    pub result: StageResult,
    pub scores: Option<ClinicalScoreSet>,
    pub narrative: Option<NarrativeText>,
}

/// Run a stage with its timeout and the retry policy
///
/// A timed-out call counts as a transport failure. At most one retry, and
/// only after a transport failure.
pub async fn execute_with_policy(executor: &dyn StageExecutor, input: &StageInput) -> StageRun {
    let stage = executor.stage();
    let started = Instant::now();
    let mut attempts = 0;

    let outcome = loop {
        attempts += 1;
        let result = match tokio::time::timeout(executor.timeout(), executor.execute(input)).await
        {
            Ok(result) => result,
            Err(_) => Err(StageError::Transport(format!(
                "no response within {} ms",
                executor.timeout().as_millis()
            ))),
        };

        match result {
            Err(e) if e.is_retryable() && attempts < 2 => {
                warn!(task_id = %input.task_id, stage = %stage, error = %e, "Stage transport failure, retrying once");
            }
            other => break other,
        }
    };

    let latency_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(output) => {
            debug!(
                task_id = %input.task_id,
                stage = %stage,
                issues = output.issues.len(),
                latency_ms,
                "Stage succeeded"
            );
            StageRun {
                result: StageResult::success(stage, output.issues, latency_ms, attempts),
                scores: output.scores,
                narrative: output.narrative,
            }
        }
        Err(e) => {
            warn!(task_id = %input.task_id, stage = %stage, error = %e, attempts, "Stage failed");
            StageRun {
                result: StageResult::failure(stage, e.to_string(), e.code(), latency_ms, attempts),
                scores: None,
                narrative: None,
            }
        }
    }
}

/// The executor set a pipeline runs with
#[derive(Clone)]
pub struct StageExecutors {
    pub syntactic: Arc<dyn StageExecutor>,
    pub semantic: Arc<dyn StageExecutor>,
    pub anomaly: Arc<dyn StageExecutor>,
    pub clinical: Arc<dyn StageExecutor>,
    pub narrative: Arc<dyn StageExecutor>,
}

impl StageExecutors {
    /// HTTP adapters for the configured services plus the local scorer
    pub fn from_config(services: &ServicesConfig) -> Result<Self, StageError> {
        let client = http::build_client()?;
        Ok(Self {
            syntactic: Arc::new(SyntacticClient::new(client.clone(), services.syntactic.clone())),
            semantic: Arc::new(SemanticClient::new(client.clone(), services.semantic.clone())),
            anomaly: Arc::new(AnomalyClient::new(client.clone(), &services.anomaly)),
            clinical: Arc::new(ClinicalScorer::new()),
            narrative: Arc::new(NarrativeClient::new(client, &services.narrative)),
        })
    }

    pub fn get(&self, stage: Stage) -> Arc<dyn StageExecutor> {
        match stage {
            Stage::Syntactic => self.syntactic.clone(),
            Stage::Semantic => self.semantic.clone(),
            Stage::Anomaly => self.anomaly.clone(),
            Stage::Clinical => self.clinical.clone(),
            Stage::Narrative => self.narrative.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhg_common::events::StageOutcome;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        stage: Stage,
        calls: AtomicU32,
        /// Results returned per call; the last one repeats
        script: Vec<Result<StageOutput, StageError>>,
        delay: Duration,
    }

    impl Scripted {
        fn new(stage: Stage, script: Vec<Result<StageOutput, StageError>>) -> Self {
            Self {
                stage,
                calls: AtomicU32::new(0),
                script,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl StageExecutor for Scripted {
        fn stage(&self) -> Stage {
            self.stage
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        async fn execute(&self, _input: &StageInput) -> Result<StageOutput, StageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            tokio::time::sleep(self.delay).await;
            self.script[call.min(self.script.len() - 1)].clone()
        }
    }

    fn input() -> StageInput {
        StageInput {
            task_id: Uuid::new_v4(),
            raw: Arc::new(Vec::new()),
            bundle: None,
            extraction: Arc::new(Extraction::default()),
            report_so_far: None,
        }
    }

    #[tokio::test]
    async fn test_transport_failure_retried_once() {
        let executor = Scripted::new(
            Stage::Semantic,
            vec![Err(StageError::Transport("503".into())), Ok(StageOutput::default())],
        );
        let run = execute_with_policy(&executor, &input()).await;
        assert_eq!(run.result.outcome, StageOutcome::Success);
        assert_eq!(run.result.attempts, 2);
    }

    #[tokio::test]
    async fn test_second_transport_failure_recorded() {
        let executor = Scripted::new(Stage::Semantic, vec![Err(StageError::Transport("503".into()))]);
        let run = execute_with_policy(&executor, &input()).await;
        assert_eq!(run.result.outcome, StageOutcome::Failure);
        assert_eq!(run.result.attempts, 2);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(run.result.issues[0].code.as_deref(), Some("stage-transport"));
    }

    #[tokio::test]
    async fn test_application_error_not_retried() {
        let executor = Scripted::new(Stage::Anomaly, vec![Err(StageError::Application("400".into()))]);
        let run = execute_with_policy(&executor, &input()).await;
        assert_eq!(run.result.outcome, StageOutcome::Failure);
        assert_eq!(run.result.attempts, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transport_failure() {
        let mut executor = Scripted::new(Stage::Narrative, vec![Ok(StageOutput::default())]);
        executor.delay = Duration::from_millis(500);
        let run = execute_with_policy(&executor, &input()).await;
        assert_eq!(run.result.outcome, StageOutcome::Failure);
        assert_eq!(run.result.attempts, 2);
        assert!(!run.result.has_fatal_issue());
        assert!(run.narrative.is_none());
    }
}
