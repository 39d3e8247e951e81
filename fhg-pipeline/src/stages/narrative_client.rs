//! Narrative generation adapter (Ollama-style `/api/generate`)
//!
//! Best-effort: a failure here never makes a task fail. The prompt carries
//! up to three subjects' demographics, history, medications, vitals and
//! NEWS2 results plus the report so far.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use fhg_common::events::Stage;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info};

use super::{http, StageError, StageExecutor, StageInput, StageOutput};
use crate::config::{NarrativeServiceConfig, ServiceEndpoint};
use crate::extraction::Extraction;
use crate::models::{ClinicalScoreSet, NarrativeText, ValidationReport, VitalParameter};
use crate::scoring;

const MAX_SUBJECTS: usize = 3;
const MAX_ISSUES_IN_PROMPT: usize = 10;

const SECTION_SUMMARY: &str = "SECTION 1: PATIENT SUMMARY";
const SECTION_HANDOFF: &str = "SECTION 2: CLINICAL HANDOFF";
const SECTION_AUDIT: &str = "SECTION 3: AUDIT NOTES";

const INSTRUCTIONS: &str = "You are a senior medical case manager. Write a report from the case data below.\n\
Output only the report. Start directly with section 1 and use these headings verbatim:\n\
SECTION 1: PATIENT SUMMARY - plain-language story connecting history to current vitals and the NEWS2 score.\n\
SECTION 2: CLINICAL HANDOFF - SBAR format for clinicians; say explicitly when a vital sign is missing.\n\
SECTION 3: AUDIT NOTES - documentation gaps and validation findings relevant to coding and audit.";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    Sections {
        patient_summary: String,
        clinical_handoff: String,
        audit_notes: String,
        #[serde(default)]
        model: Option<String>,
    },
    Text {
        response: String,
        #[serde(default)]
        model: Option<String>,
    },
}

pub struct NarrativeClient {
    http_client: reqwest::Client,
    endpoint: ServiceEndpoint,
    model: String,
}

impl NarrativeClient {
    pub fn new(http_client: reqwest::Client, config: &NarrativeServiceConfig) -> Self {
        Self {
            http_client,
            endpoint: config.endpoint(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl StageExecutor for NarrativeClient {
    fn stage(&self) -> Stage {
        Stage::Narrative
    }

    fn timeout(&self) -> Duration {
        self.endpoint.timeout()
    }

    async fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let computed;
        let scores = match input.report_so_far.as_ref().and_then(|r| r.clinical_scores.as_ref()) {
            Some(scores) => scores,
            None => {
                computed = scoring::evaluate(&input.extraction).0;
                &computed
            }
        };
        let prompt = build_prompt(
            &input.extraction,
            scores,
            input.report_so_far.as_deref(),
            Utc::now().date_naive(),
        );
        debug!(task_id = %input.task_id, prompt_chars = prompt.len(), "Requesting narrative");

        let response = self
            .http_client
            .post(&self.endpoint.url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(http::send_error)?;

        let narrative = match http::read_json::<GenerateResponse>(response).await? {
            GenerateResponse::Sections {
                patient_summary,
                clinical_handoff,
                audit_notes,
                model,
            } => NarrativeText {
                patient_summary,
                clinical_handoff,
                audit_notes,
                model: model.or_else(|| Some(self.model.clone())),
            },
            GenerateResponse::Text { response, model } => {
                let mut narrative = split_sections(&response);
                narrative.model = model.or_else(|| Some(self.model.clone()));
                narrative
            }
        };

        if narrative.is_blank() {
            return Err(StageError::Malformed("narrative service returned no text".to_string()));
        }
        info!(task_id = %input.task_id, "Narrative generated");
        Ok(StageOutput {
            narrative: Some(narrative),
            ..Default::default()
        })
    }
}

/// Case data for up to three subjects plus the validation findings so far
///
/// Ages are computed as of `today`.
pub fn build_prompt(
    extraction: &Extraction,
    scores: &ClinicalScoreSet,
    report: Option<&ValidationReport>,
    today: NaiveDate,
) -> String {
    let mut case = String::new();

    for subject in scores.subjects.iter().take(MAX_SUBJECTS) {
        let value = |parameter: VitalParameter| {
            let observations: Vec<_> = extraction.for_subject(&subject.key).collect();
            scoring::news2::latest(&observations, parameter)
                .map(|o| format!("{}", o.value))
                .unwrap_or_else(|| "N/A".to_string())
        };
        let _ = writeln!(case, "PATIENT: {}", subject.key);
        let patient = extraction.patient(&subject.key.subject);
        let _ = writeln!(
            case,
            "  - DEMOGRAPHICS: Name {} | Age {} | Gender {}",
            patient.and_then(|p| p.name.as_deref()).unwrap_or("Unknown"),
            patient
                .and_then(|p| p.age_on(today))
                .map_or_else(|| "N/A".to_string(), |age| format!("{}y", age)),
            patient.and_then(|p| p.gender.as_deref()).unwrap_or("Unknown"),
        );
        let _ = writeln!(
            case,
            "  - RISK: NEWS2 score {} ({})",
            subject.score,
            subject.band.label()
        );
        let _ = writeln!(
            case,
            "  - VITALS: BP {}/{} | HR {} | RR {} | SpO2 {}% | Temp {}C | GCS {}",
            value(VitalParameter::SystolicBp),
            value(VitalParameter::DiastolicBp),
            value(VitalParameter::HeartRate),
            value(VitalParameter::RespiratoryRate),
            value(VitalParameter::OxygenSaturation),
            value(VitalParameter::Temperature),
            value(VitalParameter::Consciousness),
        );
        let _ = writeln!(
            case,
            "  - METABOLIC: Glucose {} | BMI {} | Pain {}",
            value(VitalParameter::BloodGlucose),
            value(VitalParameter::BodyMassIndex),
            value(VitalParameter::PainScore),
        );
        let listed = |items: Option<&Vec<String>>| match items {
            Some(items) if !items.is_empty() => items.join(", "),
            _ => "None".to_string(),
        };
        let _ = writeln!(case, "  - HISTORY: {}", listed(patient.map(|p| &p.conditions)));
        let _ = writeln!(case, "  - MEDS: {}", listed(patient.map(|p| &p.medications)));
        if !subject.not_evaluated.is_empty() {
            let missing: Vec<_> = subject.not_evaluated.iter().map(|p| p.label()).collect();
            let _ = writeln!(case, "  - NOT RECORDED: {}", missing.join(", "));
        }
        case.push('\n');
    }
    if case.is_empty() {
        case.push_str("No patient vitals were recorded in this bundle.\n\n");
    }

    if let Some(report) = report {
        let _ = writeln!(case, "VALIDATION FINDINGS ({} total):", report.issues.len());
        for issue in report.issues.iter().take(MAX_ISSUES_IN_PROMPT) {
            let _ = writeln!(case, "  - [{:?}] {}: {}", issue.severity, issue.resource, issue.message);
        }
    }

    format!("{}\n\nCASE DATA:\n{}", INSTRUCTIONS, case)
}

/// Split generated text on the section headings
///
/// Text with no recognizable headings becomes the patient summary.
pub fn split_sections(text: &str) -> NarrativeText {
    let upper = text.to_ascii_uppercase();
    let mut marks: Vec<(usize, usize, &str)> = [SECTION_SUMMARY, SECTION_HANDOFF, SECTION_AUDIT]
        .iter()
        .filter_map(|heading| upper.find(heading).map(|pos| (pos, heading.len(), *heading)))
        .collect();
    marks.sort();

    if marks.is_empty() {
        return NarrativeText {
            patient_summary: text.trim().to_string(),
            ..Default::default()
        };
    }

    let mut narrative = NarrativeText::default();
    for (i, (pos, len, heading)) in marks.iter().enumerate() {
        let end = marks.get(i + 1).map_or(text.len(), |next| next.0);
        let body = text
            .get(pos + len..end)
            .unwrap_or_default()
            .trim_start_matches(|c: char| c == ':' || c == '-' || c.is_whitespace())
            .trim()
            .to_string();
        match *heading {
            SECTION_SUMMARY => narrative.patient_summary = body,
            SECTION_HANDOFF => narrative.clinical_handoff = body,
            _ => narrative.audit_notes = body,
        }
    }
    narrative
}
