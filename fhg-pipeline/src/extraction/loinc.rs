//! LOINC codes recognized by the extraction adapter

use crate::models::VitalParameter;

/// Blood pressure panel; systolic/diastolic arrive as components
pub const BLOOD_PRESSURE_PANEL: &str = "85354-9";

pub const LOINC_SYSTEM: &str = "http://loinc.org";

/// Map a LOINC code to the parameter it measures
pub fn parameter_for_code(code: &str) -> Option<VitalParameter> {
    let parameter = match code.trim() {
        "8867-4" => VitalParameter::HeartRate,
        "9279-1" => VitalParameter::RespiratoryRate,
        "2708-6" | "59408-5" => VitalParameter::OxygenSaturation,
        "8310-5" => VitalParameter::Temperature,
        "8480-6" => VitalParameter::SystolicBp,
        "8462-4" => VitalParameter::DiastolicBp,
        "2339-0" | "2345-7" => VitalParameter::BloodGlucose,
        "72514-3" | "38214-3" => VitalParameter::PainScore,
        "9269-2" => VitalParameter::Consciousness,
        "39156-5" => VitalParameter::BodyMassIndex,
        // Inhaled oxygen flow rate / concentration
        "3150-0" | "3151-8" => VitalParameter::SupplementalOxygen,
        _ => return None,
    };
    Some(parameter)
}
