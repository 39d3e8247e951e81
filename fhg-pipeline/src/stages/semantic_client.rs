//! Semantic (profile) validation adapter
//!
//! Sends the normalized bundle. Accepts either the service's finding list
//! (`{"findings": [{resource_id, profile_code, message, severity}]}`) or a
//! FHIR `OperationOutcome`. An unreachable or overloaded service is a
//! transport failure, never an empty success.

use async_trait::async_trait;
use fhg_common::events::Stage;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{http, StageError, StageExecutor, StageInput, StageOutput};
use crate::config::ServiceEndpoint;
use crate::models::{Issue, ResourceIndex, ResourceRef, Severity};

#[derive(Debug, Clone, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub profile_code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutcomeIssue {
    pub severity: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub diagnostics: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub expression: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SemanticResponse {
    Findings { findings: Vec<Finding> },
    OperationOutcome {
        #[serde(rename = "resourceType")]
        resource_type: String,
        #[serde(default)]
        issue: Vec<OutcomeIssue>,
    },
}

pub struct SemanticClient {
    http_client: reqwest::Client,
    endpoint: ServiceEndpoint,
}

impl SemanticClient {
    pub fn new(http_client: reqwest::Client, endpoint: ServiceEndpoint) -> Self {
        Self {
            http_client,
            endpoint,
        }
    }
}

#[async_trait]
impl StageExecutor for SemanticClient {
    fn stage(&self) -> Stage {
        Stage::Semantic
    }

    fn timeout(&self) -> Duration {
        self.endpoint.timeout()
    }

    async fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let bundle = input.bundle()?;
        debug!(task_id = %input.task_id, resources = bundle.len(), "Requesting semantic validation");

        let response = self
            .http_client
            .post(&self.endpoint.url)
            .json(&bundle.to_json())
            .send()
            .await
            .map_err(http::send_error)?;

        let payload: SemanticResponse = http::read_json(response).await?;
        let index = bundle.index();
        match payload {
            SemanticResponse::Findings { findings } => {
                Ok(StageOutput::issues(normalize_findings(findings, &index)))
            }
            SemanticResponse::OperationOutcome { resource_type, issue }
                if resource_type == "OperationOutcome" =>
            {
                Ok(StageOutput::issues(normalize_outcome(issue, &index)))
            }
            SemanticResponse::OperationOutcome { resource_type, .. } => Err(StageError::Malformed(
                format!("unexpected resourceType {}", resource_type),
            )),
        }
    }
}

pub fn normalize_findings(findings: Vec<Finding>, index: &ResourceIndex) -> Vec<Issue> {
    findings
        .into_iter()
        .map(|f| {
            let resource = f
                .resource_id
                .as_deref()
                .map(|id| index.resolve(id))
                .unwrap_or(ResourceRef::Bundle);
            let severity = f
                .severity
                .as_deref()
                .and_then(Severity::from_label)
                .unwrap_or(Severity::Error);
            let issue = Issue::new(severity, Stage::Semantic, resource, f.message);
            match f.profile_code {
                Some(code) => issue.with_code(code),
                None => issue,
            }
        })
        .collect()
}

/// `expression` entries look like `Bundle.entry[0].resource` or `Patient/p1.name`
pub fn normalize_outcome(issues: Vec<OutcomeIssue>, index: &ResourceIndex) -> Vec<Issue> {
    issues
        .into_iter()
        .filter_map(|i| {
            let severity = Severity::from_label(&i.severity)?;
            let message = i
                .diagnostics
                .clone()
                .or_else(|| {
                    i.details
                        .as_ref()
                        .and_then(|d| d.get("text"))
                        .and_then(|t| t.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| i.code.clone().unwrap_or_else(|| "unspecified issue".to_string()));
            let resource = i
                .expression
                .first()
                .and_then(|e| resource_from_expression(e, index))
                .unwrap_or(ResourceRef::Bundle);
            let issue = Issue::new(severity, Stage::Semantic, resource, message);
            Some(match i.code {
                Some(code) => issue.with_code(code),
                None => issue,
            })
        })
        .collect()
}

fn resource_from_expression(expression: &str, index: &ResourceIndex) -> Option<ResourceRef> {
    let head = expression.split('.').next()?;
    if head.contains('/') {
        return Some(index.resolve(head));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bundle;
    use serde_json::json;

    fn index() -> ResourceIndex {
        Bundle::from_resources(vec![json!({ "resourceType": "Patient", "id": "p1" })]).index()
    }

    #[test]
    fn test_findings_resolve_resources() {
        let findings: Vec<Finding> = serde_json::from_value(json!([
            { "resource_id": "urn:uuid:p1", "profile_code": "us-core-6", "message": "Missing race extension", "severity": "warning" },
            { "message": "Bundle lacks identifier", "severity": "HIGH" }
        ]))
        .unwrap();
        let issues = normalize_findings(findings, &index());
        assert_eq!(issues[0].resource, ResourceRef::resource("Patient", "p1"));
        assert_eq!(issues[0].code.as_deref(), Some("us-core-6"));
        assert_eq!(issues[1].resource, ResourceRef::Bundle);
        assert_eq!(issues[1].severity, Severity::Error);
    }

    #[test]
    fn test_operation_outcome_shape() {
        let payload: SemanticResponse = serde_json::from_value(json!({
            "resourceType": "OperationOutcome",
            "issue": [
                { "severity": "error", "code": "invariant", "diagnostics": "dom-6", "expression": ["Patient/p1.text"] },
                { "severity": "information", "code": "informational", "details": { "text": "All OK" } },
                { "severity": "unknown-level", "code": "x" }
            ]
        }))
        .unwrap();
        let SemanticResponse::OperationOutcome { issue, .. } = payload else {
            panic!("expected OperationOutcome");
        };
        let issues = normalize_outcome(issue, &index());
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].resource, ResourceRef::resource("Patient", "p1"));
        assert_eq!(issues[1].message, "All OK");
        assert_eq!(issues[1].severity, Severity::Information);
    }
}
