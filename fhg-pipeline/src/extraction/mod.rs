//! Extraction adapter: bundle resources → physiological observations
//!
//! Pure and deterministic. Readings without a usable numeric value are
//! omitted; an unreadable bundle becomes a fatal bundle-level issue instead
//! of an error. Patient demographics, Condition and MedicationRequest
//! entries are collected alongside for the narrative stage.

pub mod loinc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::models::{
    normalize_id, Bundle, InputError, Issue, IssueSource, Observation, PatientContext,
    ResourceIndex, ResourceRef, Severity, SubjectKey, VitalParameter, INPUT_UNREADABLE_CODE,
};

/// Observations of one bundle plus any issues raised while reading it
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Sorted by (subject key, parameter, timestamp, recorded order)
    pub observations: Vec<Observation>,
    /// Subjects to score: every Patient resource plus every observation key
    pub subjects: Vec<SubjectKey>,
    /// One entry per Patient resource, in bundle order
    pub patients: Vec<PatientContext>,
    pub issues: Vec<Issue>,
}

impl Extraction {
    /// Extraction result for a bundle that could not be read
    pub fn unreadable(error: &InputError) -> Self {
        let issue = Issue::new(
            Severity::Fatal,
            IssueSource::Extraction,
            ResourceRef::Bundle,
            format!("Bundle could not be read: {}", error),
        )
        .with_code(INPUT_UNREADABLE_CODE);
        Self {
            observations: Vec::new(),
            subjects: Vec::new(),
            patients: Vec::new(),
            issues: vec![issue],
        }
    }

    pub fn is_unreadable(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.code.as_deref() == Some(INPUT_UNREADABLE_CODE))
    }

    pub fn patient(&self, id: &str) -> Option<&PatientContext> {
        self.patients.iter().find(|p| p.id == id)
    }

    pub fn for_subject<'a>(&'a self, key: &'a SubjectKey) -> impl Iterator<Item = &'a Observation> {
        self.observations.iter().filter(move |o| &o.key == key)
    }
}

/// Parse raw bytes and extract; parse failures are folded into the result
pub fn extract_bytes(bytes: &[u8], max_observations: usize) -> (Option<Bundle>, Extraction) {
    match Bundle::parse(bytes) {
        Ok(bundle) => {
            let extraction = extract(&bundle, max_observations);
            (Some(bundle), extraction)
        }
        Err(e) => {
            warn!(error = %e, "Bundle unreadable");
            (None, Extraction::unreadable(&e))
        }
    }
}

/// Candidate reading before duplicate resolution
struct Reading {
    observation: Observation,
    last_updated: Option<DateTime<Utc>>,
}

/// Extract observations from a parsed bundle
pub fn extract(bundle: &Bundle, max_observations: usize) -> Extraction {
    let index = bundle.index();
    let mut patients: Vec<PatientContext> = Vec::new();
    let mut readings: Vec<Reading> = Vec::new();
    // (subject id, text) in bundle order
    let mut conditions: Vec<(String, String)> = Vec::new();
    let mut medications: Vec<(String, String)> = Vec::new();

    for (position, resource) in bundle.resources().iter().enumerate() {
        match resource.get("resourceType").and_then(Value::as_str) {
            Some("Patient") => {
                if let Some(ResourceRef::Resource { id, .. }) = bundle.entry_ref(position) {
                    patients.push(patient_context(resource, id));
                }
            }
            Some("Observation") => {
                let source = bundle
                    .entry_ref(position)
                    .unwrap_or(ResourceRef::Bundle);
                readings.extend(readings_from_observation(resource, source, position, &index));
            }
            Some("Condition") => {
                if let Some(subject) = subject_id(resource, &index) {
                    conditions.push((subject, concept_text(resource.get("code"))));
                }
            }
            Some("MedicationRequest") => {
                if let Some(subject) = subject_id(resource, &index) {
                    let text = match resource.get("medicationCodeableConcept") {
                        Some(concept) => concept_text(Some(concept)),
                        None => resource
                            .pointer("/medicationReference/display")
                            .and_then(Value::as_str)
                            .map_or_else(|| UNKNOWN_TEXT.to_string(), str::to_string),
                    };
                    medications.push((subject, text));
                }
            }
            _ => {}
        }
    }

    for patient in &mut patients {
        patient.conditions = texts_for(&conditions, &patient.id);
        patient.medications = texts_for(&medications, &patient.id);
    }

    // Same (key, parameter, timestamp): keep the most recently recorded reading
    let mut latest: HashMap<(SubjectKey, VitalParameter, Option<DateTime<Utc>>), Reading> =
        HashMap::new();
    for reading in readings {
        let slot = (
            reading.observation.key.clone(),
            reading.observation.parameter,
            reading.observation.timestamp,
        );
        match latest.get(&slot) {
            Some(existing)
                if (existing.last_updated, existing.observation.recorded_order)
                    >= (reading.last_updated, reading.observation.recorded_order) => {}
            _ => {
                latest.insert(slot, reading);
            }
        }
    }

    let mut observations: Vec<Observation> = latest.into_values().map(|r| r.observation).collect();
    let mut issues = Vec::new();

    if observations.len() > max_observations {
        warn!(
            extracted = observations.len(),
            max_observations, "Observation limit reached, dropping oldest readings"
        );
        issues.push(
            Issue::new(
                Severity::Warning,
                IssueSource::Extraction,
                ResourceRef::Bundle,
                format!(
                    "Bundle contains {} observations; only the {} most recently recorded were evaluated",
                    observations.len(),
                    max_observations
                ),
            )
            .with_code("observations-truncated"),
        );
        observations.sort_by(|a, b| b.recorded_order.cmp(&a.recorded_order));
        observations.truncate(max_observations);
    }

    observations.sort_by(|a, b| {
        (&a.key, a.parameter, a.timestamp, a.recorded_order)
            .cmp(&(&b.key, b.parameter, b.timestamp, b.recorded_order))
    });

    let subjects = subject_keys(&patients, &observations);
    debug!(
        observations = observations.len(),
        subjects = subjects.len(),
        "Extraction complete"
    );

    Extraction {
        observations,
        subjects,
        patients,
        issues,
    }
}

/// Patient-level key for each Patient with no keyed observations, plus every observation key
fn subject_keys(patients: &[PatientContext], observations: &[Observation]) -> Vec<SubjectKey> {
    let mut keys: BTreeSet<SubjectKey> = observations.iter().map(|o| o.key.clone()).collect();
    for patient in patients {
        if !keys.iter().any(|k| k.subject == patient.id) {
            keys.insert(SubjectKey::patient(patient.id.clone()));
        }
    }
    keys.into_iter().collect()
}

const UNKNOWN_TEXT: &str = "Unknown";

fn patient_context(resource: &Value, id: String) -> PatientContext {
    let name = resource
        .pointer("/name/0")
        .and_then(|name| {
            name.get("text").and_then(Value::as_str).map(str::to_string).or_else(|| {
                let given = name
                    .get("given")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str);
                let family = name.get("family").and_then(Value::as_str);
                let parts: Vec<&str> = given.chain(family).collect();
                (!parts.is_empty()).then(|| parts.join(" "))
            })
        });
    PatientContext {
        name,
        gender: resource.get("gender").and_then(Value::as_str).map(str::to_string),
        birth_date: resource
            .get("birthDate")
            .and_then(Value::as_str)
            .and_then(|text| NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()),
        ..PatientContext::new(id)
    }
}

/// `text`, else the first coding's `display`
fn concept_text(concept: Option<&Value>) -> String {
    concept
        .and_then(|c| {
            c.get("text")
                .and_then(Value::as_str)
                .or_else(|| c.pointer("/coding/0/display").and_then(Value::as_str))
        })
        .map_or_else(|| UNKNOWN_TEXT.to_string(), str::to_string)
}

fn texts_for(entries: &[(String, String)], patient: &str) -> Vec<String> {
    entries
        .iter()
        .filter(|(subject, _)| subject == patient)
        .map(|(_, text)| text.clone())
        .collect()
}

fn subject_id(resource: &Value, index: &ResourceIndex) -> Option<String> {
    resource
        .pointer("/subject/reference")
        .and_then(Value::as_str)
        .map(|r| canonical_id(r, index))
        .filter(|id| !id.is_empty())
}

fn readings_from_observation(
    resource: &Value,
    source: ResourceRef,
    position: usize,
    index: &ResourceIndex,
) -> Vec<Reading> {
    let status = resource.get("status").and_then(Value::as_str);
    if matches!(status, Some("entered-in-error") | Some("cancelled")) {
        return Vec::new();
    }

    let Some(key) = subject_key(resource, index) else {
        debug!(resource = %source, "Observation has no subject, skipping");
        return Vec::new();
    };
    let timestamp = effective_time(resource);
    let last_updated = resource
        .pointer("/meta/lastUpdated")
        .and_then(Value::as_str)
        .and_then(parse_time);

    let codes = codes_of(resource.get("code"));
    let mut readings = Vec::new();

    if codes.iter().any(|c| c == loinc::BLOOD_PRESSURE_PANEL) {
        let components = resource
            .get("component")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for component in components {
            if let Some(parameter) = codes_of(component.get("code"))
                .iter()
                .find_map(|c| loinc::parameter_for_code(c))
            {
                if let Some((value, unit)) = numeric_value(component) {
                    readings.push(Reading {
                        observation: Observation {
                            key: key.clone(),
                            parameter,
                            value,
                            unit,
                            timestamp,
                            source: source.clone(),
                            recorded_order: position,
                        },
                        last_updated,
                    });
                }
            }
        }
        return readings;
    }

    let Some(parameter) = codes.iter().find_map(|c| loinc::parameter_for_code(c)) else {
        return readings;
    };
    if let Some((value, unit)) = numeric_value(resource) {
        readings.push(Reading {
            observation: Observation {
                key,
                parameter,
                value,
                unit,
                timestamp,
                source,
                recorded_order: position,
            },
            last_updated,
        });
    }
    readings
}

fn subject_key(resource: &Value, index: &ResourceIndex) -> Option<SubjectKey> {
    let subject = subject_id(resource, index)?;
    let encounter = resource
        .pointer("/encounter/reference")
        .and_then(Value::as_str)
        .map(|r| canonical_id(r, index))
        .filter(|id| !id.is_empty());
    Some(SubjectKey { subject, encounter })
}

/// Resolve `urn:uuid:` references to the id of the resource in the bundle
fn canonical_id(reference: &str, index: &ResourceIndex) -> String {
    match index.resolve(reference) {
        ResourceRef::Resource { id, .. } => id,
        ResourceRef::Bundle => normalize_id(reference),
    }
}

fn codes_of(concept: Option<&Value>) -> Vec<String> {
    concept
        .and_then(|c| c.get("coding"))
        .and_then(Value::as_array)
        .map(|codings| {
            codings
                .iter()
                .filter(|coding| {
                    coding
                        .get("system")
                        .and_then(Value::as_str)
                        .map_or(true, |s| s == loinc::LOINC_SYSTEM)
                })
                .filter_map(|coding| coding.get("code").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Numeric value and unit from `valueQuantity` or `valueInteger`
fn numeric_value(element: &Value) -> Option<(f64, String)> {
    if let Some(quantity) = element.get("valueQuantity") {
        let value = quantity.get("value").and_then(Value::as_f64)?;
        if !value.is_finite() {
            return None;
        }
        let unit = quantity
            .get("unit")
            .or_else(|| quantity.get("code"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Some((value, unit));
    }
    element
        .get("valueInteger")
        .and_then(Value::as_i64)
        .map(|v| (v as f64, String::new()))
}

fn effective_time(resource: &Value) -> Option<DateTime<Utc>> {
    ["/effectiveDateTime", "/effectiveInstant", "/effectivePeriod/start", "/issued"]
        .iter()
        .filter_map(|pointer| resource.pointer(pointer).and_then(Value::as_str))
        .find_map(parse_time)
}

/// RFC 3339 instant, or a bare date taken as midnight UTC
fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vital(id: &str, code: &str, value: Value, at: &str) -> Value {
        json!({
            "resourceType": "Observation",
            "id": id,
            "status": "final",
            "subject": { "reference": "Patient/p1" },
            "code": { "coding": [{ "system": "http://loinc.org", "code": code }] },
            "valueQuantity": { "value": value, "unit": "u" },
            "effectiveDateTime": at
        })
    }

    fn patient(id: &str) -> Value {
        json!({ "resourceType": "Patient", "id": id })
    }

    #[test]
    fn test_extracts_known_vitals_and_skips_non_numeric() {
        let bundle = Bundle::from_resources(vec![
            patient("p1"),
            vital("hr", "8867-4", json!(88), "2024-01-01T10:00:00Z"),
            vital("rr", "9279-1", json!("fast"), "2024-01-01T10:00:00Z"),
            vital("wt", "29463-7", json!(72.5), "2024-01-01T10:00:00Z"),
        ]);
        let extraction = extract(&bundle, 100);
        assert_eq!(extraction.observations.len(), 1);
        let hr = &extraction.observations[0];
        assert_eq!(hr.parameter, VitalParameter::HeartRate);
        assert_eq!(hr.value, 88.0);
        assert_eq!(hr.source, ResourceRef::resource("Observation", "hr"));
        assert_eq!(extraction.subjects, vec![SubjectKey::patient("p1")]);
    }

    #[test]
    fn test_duplicate_keeps_latest_recorded() {
        let mut older = vital("a", "8867-4", json!(70), "2024-01-01T10:00:00Z");
        older["meta"] = json!({ "lastUpdated": "2024-01-02T00:00:00Z" });
        let mut newer = vital("b", "8867-4", json!(95), "2024-01-01T10:00:00Z");
        newer["meta"] = json!({ "lastUpdated": "2024-01-03T00:00:00Z" });

        // Newer listed first: lastUpdated decides
        let extraction = extract(&Bundle::from_resources(vec![newer.clone(), older.clone()]), 100);
        assert_eq!(extraction.observations.len(), 1);
        assert_eq!(extraction.observations[0].value, 95.0);

        // Equal lastUpdated: later bundle position decides
        let first = vital("c", "8867-4", json!(60), "2024-01-01T10:00:00Z");
        let second = vital("d", "8867-4", json!(61), "2024-01-01T10:00:00Z");
        let extraction = extract(&Bundle::from_resources(vec![first, second]), 100);
        assert_eq!(extraction.observations[0].value, 61.0);
    }

    #[test]
    fn test_blood_pressure_panel_components() {
        let panel = json!({
            "resourceType": "Observation",
            "id": "bp",
            "subject": { "reference": "urn:uuid:u1" },
            "encounter": { "reference": "Encounter/e1" },
            "code": { "coding": [{ "system": "http://loinc.org", "code": "85354-9" }] },
            "effectivePeriod": { "start": "2024-02-01" },
            "component": [
                { "code": { "coding": [{ "code": "8480-6" }] }, "valueQuantity": { "value": 118, "unit": "mmHg" } },
                { "code": { "coding": [{ "code": "8462-4" }] }, "valueQuantity": { "value": 76, "unit": "mmHg" } }
            ]
        });
        let bundle = Bundle::parse(
            json!({
                "resourceType": "Bundle",
                "entry": [
                    { "fullUrl": "urn:uuid:u1", "resource": patient("p1") },
                    { "resource": panel }
                ]
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        let extraction = extract(&bundle, 100);
        let key = SubjectKey::with_encounter("p1", "e1");
        let params: Vec<_> = extraction.for_subject(&key).map(|o| o.parameter).collect();
        assert_eq!(params, vec![VitalParameter::SystolicBp, VitalParameter::DiastolicBp]);
        // Patient p1 has keyed observations, so no separate patient-level key
        assert_eq!(extraction.subjects, vec![key]);
        assert!(extraction.observations[0].timestamp.is_some());
    }

    #[test]
    fn test_max_observations_truncates_with_warning() {
        let resources = (0..5)
            .map(|i| vital(&format!("o{i}"), "8867-4", json!(60 + i), &format!("2024-01-01T10:0{i}:00Z")))
            .collect();
        let extraction = extract(&Bundle::from_resources(resources), 3);
        assert_eq!(extraction.observations.len(), 3);
        assert_eq!(extraction.issues.len(), 1);
        assert_eq!(extraction.issues[0].severity, Severity::Warning);
        // Most recently recorded kept
        assert!(extraction.observations.iter().all(|o| o.value >= 62.0));
    }

    #[test]
    fn test_unreadable_bytes_yield_fatal_issue() {
        let (bundle, extraction) = extract_bytes(b"not a bundle", 100);
        assert!(bundle.is_none());
        assert!(extraction.is_unreadable());
        assert_eq!(extraction.issues[0].severity, Severity::Fatal);
        assert!(extraction.issues[0].resource.is_bundle());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let resources = vec![
            vital("a", "8867-4", json!(80), "2024-01-01T10:00:00Z"),
            vital("b", "9279-1", json!(18), "2024-01-01T10:00:00Z"),
            vital("c", "2708-6", json!(97), "2024-01-01T09:00:00Z"),
        ];
        let bundle = Bundle::from_resources(resources);
        assert_eq!(extract(&bundle, 10).observations, extract(&bundle, 10).observations);
    }

    #[test]
    fn test_patient_context_collects_demographics_and_history() {
        let bundle = Bundle::from_resources(vec![
            json!({
                "resourceType": "Patient",
                "id": "p1",
                "name": [{ "given": ["Ada"], "family": "Lovelace" }],
                "gender": "female",
                "birthDate": "1980-06-15"
            }),
            json!({
                "resourceType": "Condition",
                "subject": { "reference": "Patient/p1" },
                "code": { "text": "Type 2 diabetes" }
            }),
            json!({
                "resourceType": "Condition",
                "subject": { "reference": "Patient/p1" },
                "code": { "coding": [{ "display": "Hypertension" }] }
            }),
            json!({
                "resourceType": "MedicationRequest",
                "subject": { "reference": "Patient/p1" },
                "medicationCodeableConcept": { "text": "Metformin 500 mg" }
            }),
            json!({
                "resourceType": "MedicationRequest",
                "subject": { "reference": "Patient/other" },
                "medicationReference": { "display": "Aspirin" }
            }),
            vital("bmi", "39156-5", json!(31.2), "2024-01-01T10:00:00Z"),
        ]);

        let extraction = extract(&bundle, 100);
        let patient = extraction.patient("p1").unwrap();
        assert_eq!(patient.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(patient.gender.as_deref(), Some("female"));
        assert_eq!(patient.birth_date, NaiveDate::from_ymd_opt(1980, 6, 15));
        assert_eq!(patient.conditions, vec!["Type 2 diabetes", "Hypertension"]);
        assert_eq!(patient.medications, vec!["Metformin 500 mg"]);
        assert_eq!(extraction.observations[0].parameter, VitalParameter::BodyMassIndex);
    }
}
