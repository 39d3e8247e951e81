//! Syntactic (schema) check adapter
//!
//! Sends the raw submitted bytes; the service answers with a list of
//! `(path, message, severity)` violations, either bare or wrapped in
//! `{"violations": [...]}`.

use async_trait::async_trait;
use fhg_common::events::Stage;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{http, StageError, StageExecutor, StageInput, StageOutput};
use crate::config::ServiceEndpoint;
use crate::models::{Bundle, Issue, ResourceRef, Severity};

#[derive(Debug, Clone, Deserialize)]
pub struct Violation {
    #[serde(default)]
    pub path: String,
    pub message: String,
    #[serde(default)]
    pub severity: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SyntacticResponse {
    Wrapped { violations: Vec<Violation> },
    Bare(Vec<Violation>),
}

pub struct SyntacticClient {
    http_client: reqwest::Client,
    endpoint: ServiceEndpoint,
}

impl SyntacticClient {
    pub fn new(http_client: reqwest::Client, endpoint: ServiceEndpoint) -> Self {
        Self {
            http_client,
            endpoint,
        }
    }
}

#[async_trait]
impl StageExecutor for SyntacticClient {
    fn stage(&self) -> Stage {
        Stage::Syntactic
    }

    fn timeout(&self) -> Duration {
        self.endpoint.timeout()
    }

    async fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        debug!(task_id = %input.task_id, bytes = input.raw.len(), "Requesting schema check");

        let response = self
            .http_client
            .post(&self.endpoint.url)
            .header(reqwest::header::CONTENT_TYPE, "application/fhir+json")
            .body(input.raw.as_ref().clone())
            .send()
            .await
            .map_err(http::send_error)?;

        let payload: SyntacticResponse = http::read_json(response).await?;
        let violations = match payload {
            SyntacticResponse::Wrapped { violations } => violations,
            SyntacticResponse::Bare(violations) => violations,
        };
        Ok(StageOutput::issues(normalize(violations, input.bundle.as_deref())))
    }
}

/// Convert violations to issues
///
/// Paths of the form `entry[N]...` attach to the Nth resource; anything else
/// (or an unreadable bundle) is bundle-level. Unlabelled severities are errors.
pub fn normalize(violations: Vec<Violation>, bundle: Option<&Bundle>) -> Vec<Issue> {
    violations
        .into_iter()
        .map(|v| {
            let resource = entry_index(&v.path)
                .and_then(|i| bundle.and_then(|b| b.entry_ref(i)))
                .unwrap_or(ResourceRef::Bundle);
            let severity = v
                .severity
                .as_deref()
                .and_then(Severity::from_label)
                .unwrap_or(Severity::Error);
            let issue = Issue::new(severity, Stage::Syntactic, resource, v.message);
            if v.path.is_empty() {
                issue
            } else {
                issue.at(v.path)
            }
        })
        .collect()
}

/// `entry[3].resource.name` / `Bundle.entry[3]` / `/entry/3/resource` → 3
fn entry_index(path: &str) -> Option<usize> {
    if let Some(start) = path.find("entry[") {
        let rest = &path[start + "entry[".len()..];
        let end = rest.find(']')?;
        return rest[..end].trim().parse().ok();
    }
    let rest = path.strip_prefix("/entry/")?;
    rest.split('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_paths() {
        assert_eq!(entry_index("Bundle.entry[2].resource.gender"), Some(2));
        assert_eq!(entry_index("/entry/0/resource"), Some(0));
        assert_eq!(entry_index("Bundle.type"), None);
        assert_eq!(entry_index("entry[x]"), None);
    }

    #[test]
    fn test_normalize_attaches_to_entries() {
        let bundle = Bundle::from_resources(vec![
            json!({ "resourceType": "Patient", "id": "p1" }),
            json!({ "resourceType": "Observation", "id": "o1" }),
        ]);
        let violations: Vec<Violation> = serde_json::from_value(json!([
            { "path": "Bundle.entry[1].resource.status", "message": "status is required", "severity": "error" },
            { "path": "Bundle.type", "message": "unknown bundle type", "severity": "warning" },
            { "path": "Bundle.entry[9]", "message": "dangling" }
        ]))
        .unwrap();

        let issues = normalize(violations, Some(&bundle));
        assert_eq!(issues[0].resource, ResourceRef::resource("Observation", "o1"));
        assert_eq!(issues[0].message, "status is required");
        assert_eq!(issues[0].location.as_deref(), Some("Bundle.entry[1].resource.status"));
        assert_eq!(issues[1].resource, ResourceRef::Bundle);
        assert_eq!(issues[1].severity, Severity::Warning);
        assert_eq!(issues[2].resource, ResourceRef::Bundle);
        assert_eq!(issues[2].severity, Severity::Error);
    }

    #[test]
    fn test_both_response_shapes_parse() {
        let wrapped: SyntacticResponse =
            serde_json::from_value(json!({ "violations": [{ "message": "m" }] })).unwrap();
        assert!(matches!(wrapped, SyntacticResponse::Wrapped { .. }));
        let bare: SyntacticResponse = serde_json::from_value(json!([])).unwrap();
        assert!(matches!(bare, SyntacticResponse::Bare(v) if v.is_empty()));
    }
}
