//! Normalized validation findings
//!
//! Every stage adapter converts its service-specific payload into [`Issue`]
//! before anything reaches the aggregator.

use fhg_common::events::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Issue severity, ordered so that `max()` yields the most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Information,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Map a severity label from an external service
    ///
    /// Accepts FHIR OperationOutcome levels and the High/Medium/Low scale used
    /// by rule-style services. Unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Severity> {
        match label.trim().to_ascii_lowercase().as_str() {
            "fatal" | "critical" => Some(Severity::Fatal),
            "error" | "high" => Some(Severity::Error),
            "warning" | "warn" | "medium" => Some(Severity::Warning),
            "information" | "info" | "informational" | "low" | "note" => {
                Some(Severity::Information)
            }
            _ => None,
        }
    }
}

/// Where an issue came from
///
/// Pipeline stages plus the two in-process producers that are not stages:
/// bundle extraction and the aggregator's consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    Extraction,
    Syntactic,
    Semantic,
    Anomaly,
    Clinical,
    Narrative,
    Aggregation,
}

impl From<Stage> for IssueSource {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Syntactic => IssueSource::Syntactic,
            Stage::Semantic => IssueSource::Semantic,
            Stage::Anomaly => IssueSource::Anomaly,
            Stage::Clinical => IssueSource::Clinical,
            Stage::Narrative => IssueSource::Narrative,
        }
    }
}

/// Resource an issue is attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceRef {
    /// Cross-resource or whole-bundle finding
    Bundle,
    Resource { resource_type: String, id: String },
}

impl ResourceRef {
    pub fn resource(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        ResourceRef::Resource {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn is_bundle(&self) -> bool {
        matches!(self, ResourceRef::Bundle)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Bundle => f.write_str("bundle-level"),
            ResourceRef::Resource { resource_type, id } => write!(f, "{}/{}", resource_type, id),
        }
    }
}

/// One normalized finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    /// Producing stage(s); more than one only after deduplication
    pub sources: BTreeSet<IssueSource>,
    pub resource: ResourceRef,
    pub message: String,
    /// Machine-readable code (profile code, rule id, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Element path within the bundle, when the producer reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Issue {
    pub fn new(
        severity: Severity,
        source: impl Into<IssueSource>,
        resource: ResourceRef,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            sources: BTreeSet::from([source.into()]),
            resource,
            message: message.into(),
            code: None,
            location: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Whitespace-collapsed, lowercase message used as part of the dedup key
    pub fn normalized_message(&self) -> String {
        normalize_message(&self.message)
    }
}

/// Collapse runs of whitespace and lowercase
pub fn normalize_message(message: &str) -> String {
    message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_puts_fatal_last() {
        let max = [Severity::Warning, Severity::Fatal, Severity::Information]
            .into_iter()
            .max();
        assert_eq!(max, Some(Severity::Fatal));
        assert!(Severity::Error > Severity::Warning);
    }

    #[test]
    fn test_severity_labels_from_external_services() {
        assert_eq!(Severity::from_label("High"), Some(Severity::Error));
        assert_eq!(Severity::from_label(" information "), Some(Severity::Information));
        assert_eq!(Severity::from_label("FATAL"), Some(Severity::Fatal));
        assert_eq!(Severity::from_label("bogus"), None);
    }

    #[test]
    fn test_normalized_message_ignores_case_and_spacing() {
        assert_eq!(
            normalize_message("  Missing   birthDate\tvalue "),
            normalize_message("missing birthdate value")
        );
    }

    #[test]
    fn test_resource_ref_display() {
        assert_eq!(ResourceRef::resource("Patient", "p1").to_string(), "Patient/p1");
        assert_eq!(ResourceRef::Bundle.to_string(), "bundle-level");
    }
}
