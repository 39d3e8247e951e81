//! Physiological observations extracted from a bundle

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::issue::ResourceRef;

/// Fixed set of extracted physiological parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalParameter {
    RespiratoryRate,
    OxygenSaturation,
    /// Inhaled oxygen flow/concentration; a positive value means supplemental oxygen
    SupplementalOxygen,
    SystolicBp,
    DiastolicBp,
    HeartRate,
    /// Glasgow Coma Scale total; below 15 means not alert
    Consciousness,
    Temperature,
    BloodGlucose,
    PainScore,
    BodyMassIndex,
}

impl VitalParameter {
    pub fn label(self) -> &'static str {
        match self {
            VitalParameter::RespiratoryRate => "respiratory-rate",
            VitalParameter::OxygenSaturation => "oxygen-saturation",
            VitalParameter::SupplementalOxygen => "supplemental-oxygen",
            VitalParameter::SystolicBp => "systolic-blood-pressure",
            VitalParameter::DiastolicBp => "diastolic-blood-pressure",
            VitalParameter::HeartRate => "heart-rate",
            VitalParameter::Consciousness => "consciousness",
            VitalParameter::Temperature => "temperature",
            VitalParameter::BloodGlucose => "blood-glucose",
            VitalParameter::PainScore => "pain-score",
            VitalParameter::BodyMassIndex => "body-mass-index",
        }
    }
}

impl fmt::Display for VitalParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Subject/encounter an observation belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    /// Normalized patient id
    pub subject: String,
    /// Normalized encounter id, if the observation names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<String>,
}

impl SubjectKey {
    pub fn patient(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            encounter: None,
        }
    }

    pub fn with_encounter(subject: impl Into<String>, encounter: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            encounter: Some(encounter.into()),
        }
    }

    /// Patient reference issues about this subject attach to
    pub fn patient_ref(&self) -> ResourceRef {
        ResourceRef::resource("Patient", self.subject.clone())
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.encounter {
            Some(encounter) => write!(f, "Patient/{} (Encounter/{})", self.subject, encounter),
            None => write!(f, "Patient/{}", self.subject),
        }
    }
}

/// One extracted reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub key: SubjectKey,
    pub parameter: VitalParameter,
    pub value: f64,
    pub unit: String,
    /// Clinically effective time of the reading
    pub timestamp: Option<DateTime<Utc>>,
    /// Source resource (the FHIR Observation)
    pub source: ResourceRef,
    /// Position of the source resource in the bundle; later means recorded later
    pub recorded_order: usize,
}

impl Observation {
    /// Ordering key for "latest reading wins" selection
    pub fn recency(&self) -> (Option<DateTime<Utc>>, usize) {
        (self.timestamp, self.recorded_order)
    }
}

/// Demographics and history of one Patient resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    /// Normalized patient id
    pub id: String,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    /// Condition resources naming this patient, in bundle order
    pub conditions: Vec<String>,
    /// MedicationRequest resources naming this patient, in bundle order
    pub medications: Vec<String>,
}

impl PatientContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Age in whole years on `date`
    pub fn age_on(&self, date: NaiveDate) -> Option<u32> {
        self.birth_date.and_then(|born| date.years_since(born))
    }
}
