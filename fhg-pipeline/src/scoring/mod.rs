//! Clinical rule engine
//!
//! Computes NEWS2 per subject/encounter and raises clinical alerts. Pure and
//! deterministic: identical extractions give identical score sets and issues.

pub mod news2;
pub mod rules;

use crate::extraction::Extraction;
use crate::models::{ClinicalScoreSet, Issue, Observation};

/// Scores and alerts for every subject of an extraction
pub fn evaluate(extraction: &Extraction) -> (ClinicalScoreSet, Vec<Issue>) {
    let mut subjects = Vec::with_capacity(extraction.subjects.len());
    let mut issues = Vec::new();

    for key in &extraction.subjects {
        let observations: Vec<&Observation> = extraction.for_subject(key).collect();
        let score = news2::score_subject(key, &observations);
        issues.extend(rules::evaluate_subject(&score, &observations));
        subjects.push(score);
    }

    (ClinicalScoreSet { subjects }, issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::extract;
    use crate::models::{Bundle, ResourceRef, RiskBand, Severity, SubjectKey};
    use serde_json::{json, Value};

    fn vital(id: &str, subject: &str, code: &str, value: f64) -> Value {
        json!({
            "resourceType": "Observation",
            "id": id,
            "subject": { "reference": format!("Patient/{subject}") },
            "code": { "coding": [{ "system": "http://loinc.org", "code": code }] },
            "valueQuantity": { "value": value },
            "effectiveDateTime": "2024-03-01T08:00:00Z"
        })
    }

    #[test]
    fn test_patient_without_observations_is_scored_not_evaluated() {
        let bundle = Bundle::from_resources(vec![json!({ "resourceType": "Patient", "id": "quiet" })]);
        let (scores, issues) = evaluate(&extract(&bundle, 100));
        let score = scores.get(&SubjectKey::patient("quiet")).unwrap();
        assert_eq!(score.score, 0);
        assert_eq!(score.band, RiskBand::Low);
        assert_eq!(score.not_evaluated.len(), 7);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_alerts_attach_to_patient() {
        let bundle = Bundle::from_resources(vec![
            json!({ "resourceType": "Patient", "id": "p1" }),
            vital("rr", "p1", "9279-1", 30.0),
            vital("hr", "p1", "8867-4", 135.0),
            vital("t", "p1", "8310-5", 39.4),
            vital("g", "p1", "2339-0", 55.0),
            vital("pain", "p1", "72514-3", 8.0),
        ]);
        let (scores, issues) = evaluate(&extract(&bundle, 100));
        let score = scores.get(&SubjectKey::patient("p1")).unwrap();
        assert_eq!(score.score, 8);
        assert_eq!(score.band, RiskBand::High);

        let codes: Vec<_> = issues.iter().filter_map(|i| i.code.as_deref()).collect();
        assert_eq!(codes, vec!["news2-alert", "hypoglycaemia", "severe-pain"]);
        assert!(issues[0].message.contains("emergency"));
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[2].severity, Severity::Warning);
        assert!(issues
            .iter()
            .all(|i| i.resource == ResourceRef::resource("Patient", "p1")));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let bundle = Bundle::from_resources(vec![
            vital("a", "p1", "8867-4", 101.0),
            vital("b", "p2", "2708-6", 92.0),
            vital("c", "p2", "2345-7", 320.0),
        ]);
        let extraction = extract(&bundle, 100);
        assert_eq!(evaluate(&extraction), evaluate(&extraction));
    }
}
