//! Clinical alert rules evaluated on top of the NEWS2 scores

use crate::models::{Issue, IssueSource, Observation, RiskBand, Severity, SubjectScore, VitalParameter};

use super::news2::latest;

pub const NEWS2_URGENT_THRESHOLD: u8 = 5;
pub const NEWS2_EMERGENCY_THRESHOLD: u8 = 7;
/// mg/dL
pub const HYPOGLYCAEMIA_BELOW: f64 = 70.0;
/// mg/dL
pub const HYPERGLYCAEMIA_ABOVE: f64 = 300.0;
/// 0-10 scale
pub const SEVERE_PAIN_FROM: f64 = 7.0;

/// Alerts for one subject
pub fn evaluate_subject(score: &SubjectScore, observations: &[&Observation]) -> Vec<Issue> {
    let resource = score.key.patient_ref();
    let mut issues = Vec::new();

    if score.score >= NEWS2_URGENT_THRESHOLD {
        let response = if score.score >= NEWS2_EMERGENCY_THRESHOLD {
            "emergency response required"
        } else {
            "urgent clinical review required"
        };
        issues.push(
            Issue::new(
                Severity::Error,
                IssueSource::Clinical,
                resource.clone(),
                format!(
                    "NEWS2 score {} ({} risk) for {}: {}",
                    score.score,
                    score.band.label(),
                    score.key,
                    response
                ),
            )
            .with_code("news2-alert"),
        );
    } else if score.band == RiskBand::Medium {
        issues.push(
            Issue::new(
                Severity::Warning,
                IssueSource::Clinical,
                resource.clone(),
                format!(
                    "NEWS2 single parameter scored 3 for {}: urgent ward-based response",
                    score.key
                ),
            )
            .with_code("news2-red-score"),
        );
    }

    if let Some(glucose) = latest(observations, VitalParameter::BloodGlucose) {
        if glucose.value < HYPOGLYCAEMIA_BELOW {
            issues.push(
                Issue::new(
                    Severity::Error,
                    IssueSource::Clinical,
                    resource.clone(),
                    format!("Hypoglycaemia: blood glucose {} mg/dL is dangerously low", glucose.value),
                )
                .with_code("hypoglycaemia"),
            );
        } else if glucose.value > HYPERGLYCAEMIA_ABOVE {
            issues.push(
                Issue::new(
                    Severity::Error,
                    IssueSource::Clinical,
                    resource.clone(),
                    format!(
                        "Hyperglycaemic crisis: blood glucose {} mg/dL indicates ketoacidosis risk",
                        glucose.value
                    ),
                )
                .with_code("hyperglycaemia"),
            );
        }
    }

    if let Some(pain) = latest(observations, VitalParameter::PainScore) {
        if pain.value >= SEVERE_PAIN_FROM {
            issues.push(
                Issue::new(
                    Severity::Warning,
                    IssueSource::Clinical,
                    resource,
                    format!("Severe pain: score {}/10 requires management", pain.value),
                )
                .with_code("severe-pain"),
            );
        }
    }

    issues
}
