//! Configuration for fhg-pipeline
//!
//! Bootstrap settings are resolved in this order (highest first):
//! 1. Command-line arguments (`--bind`, `--database`, `--workers`)
//! 2. Environment variables (`FHG_*`)
//! 3. TOML file (`--config`, `FHG_CONFIG`, `~/.config/fhirguard/fhg-pipeline.toml`)
//! 4. Built-in defaults
//!
//! Settings cannot change while the service runs.

use fhg_common::config::{env_override, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const MODULE_NAME: &str = "fhg-pipeline";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5730";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub bind_address: String,
    /// SQLite database file; defaults to the per-user data directory
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub pipeline: PipelineSettings,
    pub services: ServicesConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            database_path: None,
            logging: LoggingConfig::default(),
            pipeline: PipelineSettings::default(),
            services: ServicesConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Apply `FHG_*` environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(bind) = env_override::<String>("FHG_BIND_ADDRESS") {
            self.bind_address = bind;
        }
        if let Some(path) = env_override::<PathBuf>("FHG_DATABASE_PATH") {
            self.database_path = Some(path);
        }
        if let Some(level) = env_override::<String>("FHG_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(workers) = env_override("FHG_WORKER_COUNT") {
            self.pipeline.worker_count = workers;
        }
        if let Some(capacity) = env_override("FHG_QUEUE_CAPACITY") {
            self.pipeline.queue_capacity = capacity;
        }
        if let Some(secs) = env_override("FHG_TASK_TIMEOUT_SECS") {
            self.pipeline.task_timeout_secs = secs;
        }
        if let Some(url) = env_override::<String>("FHG_SYNTACTIC_URL") {
            self.services.syntactic.url = url;
        }
        if let Some(url) = env_override::<String>("FHG_SEMANTIC_URL") {
            self.services.semantic.url = url;
        }
        if let Some(url) = env_override::<String>("FHG_ANOMALY_URL") {
            self.services.anomaly.url = url;
        }
        if let Some(threshold) = env_override("FHG_ANOMALY_THRESHOLD") {
            self.services.anomaly.threshold = threshold;
        }
        if let Some(url) = env_override::<String>("FHG_NARRATIVE_URL") {
            self.services.narrative.url = url;
        }
        if let Some(model) = env_override::<String>("FHG_NARRATIVE_MODEL") {
            self.services.narrative.model = model;
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> fhg_common::Result<()> {
        let p = &self.pipeline;
        if p.worker_count == 0 {
            return Err(fhg_common::Error::Config("pipeline.worker_count must be > 0".into()));
        }
        if p.queue_capacity == 0 {
            return Err(fhg_common::Error::Config("pipeline.queue_capacity must be > 0".into()));
        }
        if p.task_timeout_secs == 0 {
            return Err(fhg_common::Error::Config("pipeline.task_timeout_secs must be > 0".into()));
        }
        if p.max_observations == 0 {
            return Err(fhg_common::Error::Config("pipeline.max_observations must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.services.anomaly.threshold) {
            return Err(fhg_common::Error::Config(
                "services.anomaly.threshold must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Worker pool and task limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub worker_count: usize,
    /// Submissions waiting for a worker; a full queue rejects new submissions
    pub queue_capacity: usize,
    /// Wall-clock budget for one task, all stages included
    pub task_timeout_secs: u64,
    pub max_observations: usize,
    pub event_capacity: usize,
    pub max_bundle_bytes: usize,
    /// Time given to in-flight tasks on shutdown before they are aborted
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 64,
            task_timeout_secs: 300,
            max_observations: 10_000,
            event_capacity: 256,
            max_bundle_bytes: 50 * 1024 * 1024,
            shutdown_grace_secs: 10,
        }
    }
}

impl PipelineSettings {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Endpoint and per-call timeout of one external service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl ServiceEndpoint {
    pub fn new(url: &str, timeout_ms: u64) -> Self {
        Self {
            url: url.to_string(),
            timeout_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyServiceConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// Scores at or above this value are flagged
    pub threshold: f64,
}

impl AnomalyServiceConfig {
    pub fn endpoint(&self) -> ServiceEndpoint {
        ServiceEndpoint::new(&self.url, self.timeout_ms)
    }
}

impl Default for AnomalyServiceConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8083/score".to_string(),
            timeout_ms: 10_000,
            threshold: 0.6,
        }
    }
}

/// Ollama-style text generation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeServiceConfig {
    pub url: String,
    pub timeout_ms: u64,
    pub model: String,
}

impl NarrativeServiceConfig {
    pub fn endpoint(&self) -> ServiceEndpoint {
        ServiceEndpoint::new(&self.url, self.timeout_ms)
    }
}

impl Default for NarrativeServiceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434/api/generate".to_string(),
            timeout_ms: 120_000,
            model: "alibayram/medgemma:4b".to_string(),
        }
    }
}

/// External stage services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub syntactic: ServiceEndpoint,
    pub semantic: ServiceEndpoint,
    pub anomaly: AnomalyServiceConfig,
    pub narrative: NarrativeServiceConfig,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            syntactic: ServiceEndpoint::new("http://127.0.0.1:8081/validate/schema", 10_000),
            semantic: ServiceEndpoint::new("http://127.0.0.1:8082/validate", 60_000),
            anomaly: AnomalyServiceConfig::default(),
            narrative: NarrativeServiceConfig::default(),
        }
    }
}
