//! Test Helper Utilities
//!
//! Scripted stage executors, a store that fails on demand and bundle
//! fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use fhg_common::events::{EventBus, PipelineState, Stage};
use fhg_common::{Error, Result};
use fhg_pipeline::config::PipelineSettings;
use fhg_pipeline::models::{Issue, NarrativeText, ResourceRef, Severity, Task};
use fhg_pipeline::pipeline::{CancelSignal, Orchestrator};
use fhg_pipeline::stages::{
    ClinicalScorer, StageError, StageExecutor, StageExecutors, StageInput, StageOutput,
};
use fhg_pipeline::store::{InMemoryTaskStore, TaskStore};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// What a fake executor answers with
#[derive(Clone)]
pub enum Behavior {
    Succeed(Vec<Issue>),
    Fail(StageError),
    Narrate(NarrativeText),
}

/// Stage executor with a fixed answer and a call counter
pub struct FakeExecutor {
    stage: Stage,
    behavior: Behavior,
    delay: Duration,
    timeout: Duration,
    calls: AtomicU32,
}

impl FakeExecutor {
    pub fn new(stage: Stage, behavior: Behavior) -> Self {
        Self {
            stage,
            behavior,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(10),
            calls: AtomicU32::new(0),
        }
    }

    pub fn succeeding(stage: Stage) -> Self {
        Self::new(stage, Behavior::Succeed(Vec::new()))
    }

    pub fn with_issues(stage: Stage, issues: Vec<Issue>) -> Self {
        Self::new(stage, Behavior::Succeed(issues))
    }

    pub fn failing(stage: Stage, error: StageError) -> Self {
        Self::new(stage, Behavior::Fail(error))
    }

    pub fn narrating() -> Self {
        Self::new(
            Stage::Narrative,
            Behavior::Narrate(NarrativeText {
                patient_summary: "Tachycardic patient on supplemental oxygen.".to_string(),
                clinical_handoff: "S: HR 130. B: on O2. A: NEWS2 4. R: review in 1h.".to_string(),
                audit_notes: "Respiratory rate not recorded.".to_string(),
                model: Some("fake".to_string()),
            }),
        )
    }

    /// Answer only after `delay`
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageExecutor for FakeExecutor {
    fn stage(&self) -> Stage {
        self.stage
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, _input: &StageInput) -> std::result::Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behavior {
            Behavior::Succeed(issues) => Ok(StageOutput::issues(issues.clone())),
            Behavior::Fail(error) => Err(error.clone()),
            Behavior::Narrate(narrative) => Ok(StageOutput {
                narrative: Some(narrative.clone()),
                ..Default::default()
            }),
        }
    }
}

/// One fake per external stage; clinical scoring runs for real
pub struct Fakes {
    pub syntactic: Arc<FakeExecutor>,
    pub semantic: Arc<FakeExecutor>,
    pub anomaly: Arc<FakeExecutor>,
    pub narrative: Arc<FakeExecutor>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            syntactic: Arc::new(FakeExecutor::succeeding(Stage::Syntactic)),
            semantic: Arc::new(FakeExecutor::succeeding(Stage::Semantic)),
            anomaly: Arc::new(FakeExecutor::succeeding(Stage::Anomaly)),
            narrative: Arc::new(FakeExecutor::narrating()),
        }
    }
}

impl Fakes {
    pub fn executors(&self) -> StageExecutors {
        StageExecutors {
            syntactic: self.syntactic.clone(),
            semantic: self.semantic.clone(),
            anomaly: self.anomaly.clone(),
            clinical: Arc::new(ClinicalScorer::new()),
            narrative: self.narrative.clone(),
        }
    }
}

/// Orchestrator over an in-memory store
pub struct Harness {
    pub store: Arc<InMemoryTaskStore>,
    pub event_bus: EventBus,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(fakes: &Fakes) -> Self {
        Self::with_settings(fakes, PipelineSettings::default())
    }

    pub fn with_settings(fakes: &Fakes, settings: PipelineSettings) -> Self {
        let store = Arc::new(InMemoryTaskStore::new());
        let event_bus = EventBus::new(256);
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            event_bus.clone(),
            fakes.executors(),
            settings,
        ));
        Self {
            store,
            event_bus,
            orchestrator,
        }
    }

    /// Store a queued task for `bytes`
    pub async fn insert(&self, bytes: &[u8]) -> Uuid {
        let task = Task::new(Default::default());
        self.store.insert(&task, bytes).await.unwrap();
        task.task_id
    }

    pub async fn load(&self, task_id: Uuid) -> Task {
        self.store.load(task_id).await.unwrap().unwrap()
    }

    /// Process `bytes` to completion and return the stored task
    pub async fn run(&self, bytes: &[u8]) -> Task {
        let task_id = self.insert(bytes).await;
        self.orchestrator
            .process(task_id, CancelSignal::new())
            .await
            .unwrap();
        self.load(task_id).await
    }
}

/// Store whose writes start failing once `fail_writes` is set
///
/// With `crash_after` set, the save that follows the first stored copy in
/// that state fails once, as if the process died between the two writes.
#[derive(Default)]
pub struct FailingStore {
    inner: InMemoryTaskStore,
    pub fail_writes: AtomicBool,
    /// (state, whether a copy in that state has been stored)
    crash_after: Mutex<Option<(PipelineState, bool)>>,
}

impl FailingStore {
    pub fn crashing_after(state: PipelineState) -> Self {
        Self {
            crash_after: Mutex::new(Some((state, false))),
            ..Default::default()
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Internal("disk I/O error".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FailingStore {
    async fn insert(&self, task: &Task, bundle: &[u8]) -> Result<()> {
        self.inner.insert(task, bundle).await
    }

    async fn save(&self, task: &Task) -> Result<()> {
        self.check()?;
        {
            let mut crash = self.crash_after.lock().unwrap();
            match *crash {
                Some((_, true)) => {
                    *crash = None;
                    return Err(Error::Internal("process killed".to_string()));
                }
                Some((state, false)) if state == task.state => *crash = Some((state, true)),
                _ => {}
            }
        }
        self.inner.save(task).await
    }

    async fn load(&self, task_id: Uuid) -> Result<Option<Task>> {
        self.inner.load(task_id).await
    }

    async fn load_bundle(&self, task_id: Uuid) -> Result<Option<Vec<u8>>> {
        self.inner.load_bundle(task_id).await
    }

    async fn list_unfinished(&self) -> Result<Vec<Task>> {
        self.inner.list_unfinished().await
    }

    async fn find_by_upload_key(&self, upload_key: &str) -> Result<Vec<Task>> {
        self.inner.find_by_upload_key(upload_key).await
    }

    async fn purge(&self, task_id: Uuid) -> Result<bool> {
        self.check()?;
        self.inner.purge(task_id).await
    }

    async fn close(&self) {}
}

pub fn issue(severity: Severity, stage: Stage, resource: ResourceRef, message: &str) -> Issue {
    Issue::new(severity, stage, resource, message)
}

/// LOINC-coded vital sign observation for `subject`
pub fn vital(id: &str, subject: &str, code: &str, value: f64) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "subject": { "reference": format!("Patient/{subject}") },
        "code": { "coding": [{ "system": "http://loinc.org", "code": code }] },
        "valueQuantity": { "value": value },
        "effectiveDateTime": "2024-03-01T08:00:00Z"
    })
}

pub fn bundle_bytes(resources: Vec<Value>) -> Vec<u8> {
    let entries: Vec<Value> = resources
        .into_iter()
        .map(|resource| json!({ "resource": resource }))
        .collect();
    serde_json::to_vec(&json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": entries
    }))
    .unwrap()
}

/// Patient p1: HR 130, SpO2 94 on 2 L/min oxygen, no respiratory rate
pub fn tachycardic_on_oxygen() -> Vec<u8> {
    bundle_bytes(vec![
        json!({ "resourceType": "Patient", "id": "p1" }),
        vital("hr", "p1", "8867-4", 130.0),
        vital("spo2", "p1", "59408-5", 94.0),
        vital("o2", "p1", "3151-8", 2.0),
    ])
}
