//! NEWS2 (National Early Warning Score 2)
//!
//! Each band is upper-inclusive so fractional readings fall into exactly one band.

use crate::models::{Observation, RiskBand, SubScore, SubjectKey, SubjectScore, VitalParameter};

/// Parameters that contribute points, in report order
pub const SCORED_PARAMETERS: [VitalParameter; 6] = [
    VitalParameter::RespiratoryRate,
    VitalParameter::OxygenSaturation,
    VitalParameter::SystolicBp,
    VitalParameter::HeartRate,
    VitalParameter::Consciousness,
    VitalParameter::Temperature,
];

pub const OXYGEN_ADJUSTMENT: &str = "supplemental oxygen +1";

pub fn respiratory_rate_points(breaths_per_min: f64) -> u8 {
    match breaths_per_min {
        v if v <= 8.0 => 3,
        v if v <= 11.0 => 1,
        v if v <= 20.0 => 0,
        v if v <= 24.0 => 2,
        _ => 3,
    }
}

pub fn oxygen_saturation_points(percent: f64) -> u8 {
    match percent {
        v if v <= 91.0 => 3,
        v if v <= 93.0 => 2,
        v if v <= 95.0 => 1,
        _ => 0,
    }
}

pub fn systolic_points(mm_hg: f64) -> u8 {
    match mm_hg {
        v if v <= 90.0 => 3,
        v if v <= 100.0 => 2,
        v if v <= 110.0 => 1,
        v if v < 220.0 => 0,
        _ => 3,
    }
}

pub fn heart_rate_points(beats_per_min: f64) -> u8 {
    match beats_per_min {
        v if v <= 40.0 => 3,
        v if v <= 50.0 => 1,
        v if v <= 90.0 => 0,
        v if v <= 110.0 => 1,
        v if v <= 130.0 => 2,
        _ => 3,
    }
}

/// GCS total below 15 means the patient is not alert
pub fn consciousness_points(gcs: f64) -> u8 {
    if gcs < 15.0 {
        3
    } else {
        0
    }
}

pub fn temperature_points(celsius: f64) -> u8 {
    match celsius {
        v if v <= 35.0 => 3,
        v if v <= 36.0 => 1,
        v if v <= 38.0 => 0,
        v if v <= 39.0 => 1,
        _ => 2,
    }
}

fn points_for(parameter: VitalParameter, value: f64) -> Option<u8> {
    let points = match parameter {
        VitalParameter::RespiratoryRate => respiratory_rate_points(value),
        VitalParameter::OxygenSaturation => oxygen_saturation_points(value),
        VitalParameter::SystolicBp => systolic_points(value),
        VitalParameter::HeartRate => heart_rate_points(value),
        VitalParameter::Consciousness => consciousness_points(value),
        VitalParameter::Temperature => temperature_points(value),
        _ => return None,
    };
    Some(points)
}

/// Band: ≥7 high; 5-6 or any single parameter scoring 3 medium; otherwise low
pub fn risk_band(score: u8, sub_scores: &[SubScore]) -> RiskBand {
    if score >= 7 {
        RiskBand::High
    } else if score >= 5 || sub_scores.iter().any(|s| s.points == 3) {
        RiskBand::Medium
    } else {
        RiskBand::Low
    }
}

/// Latest reading of `parameter` by (timestamp, recorded order)
pub fn latest<'a>(
    observations: &[&'a Observation],
    parameter: VitalParameter,
) -> Option<&'a Observation> {
    observations
        .iter()
        .copied()
        .filter(|o| o.parameter == parameter)
        .max_by_key(|o| o.recency())
}

/// Score one subject from its observations
///
/// Absent parameters contribute zero and are listed as not evaluated.
/// Supplemental oxygen is listed as not evaluated when no reading exists;
/// the SpO2 sub-score is then taken as on room air.
pub fn score_subject(key: &SubjectKey, observations: &[&Observation]) -> SubjectScore {
    let mut sub_scores = Vec::new();
    let mut not_evaluated = Vec::new();

    let on_oxygen = match latest(observations, VitalParameter::SupplementalOxygen) {
        Some(reading) => reading.value > 0.0,
        None => {
            not_evaluated.push(VitalParameter::SupplementalOxygen);
            false
        }
    };

    for parameter in SCORED_PARAMETERS {
        let Some(reading) = latest(observations, parameter) else {
            not_evaluated.push(parameter);
            continue;
        };
        let Some(mut points) = points_for(parameter, reading.value) else {
            continue;
        };
        let mut adjustment = None;
        if parameter == VitalParameter::OxygenSaturation && on_oxygen {
            points = (points + 1).min(3);
            adjustment = Some(OXYGEN_ADJUSTMENT.to_string());
        }
        sub_scores.push(SubScore {
            parameter,
            value: reading.value,
            points,
            source: reading.source.clone(),
            recorded_order: reading.recorded_order,
            timestamp: reading.timestamp,
            adjustment,
        });
    }

    not_evaluated.sort();
    let score = sub_scores.iter().map(|s| s.points).sum();
    let band = risk_band(score, &sub_scores);

    SubjectScore {
        key: key.clone(),
        score,
        band,
        sub_scores,
        not_evaluated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceRef;

    fn obs(parameter: VitalParameter, value: f64, order: usize) -> Observation {
        Observation {
            key: SubjectKey::patient("p1"),
            parameter,
            value,
            unit: String::new(),
            timestamp: None,
            source: ResourceRef::resource("Observation", format!("o{order}")),
            recorded_order: order,
        }
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(respiratory_rate_points(8.0), 3);
        assert_eq!(respiratory_rate_points(11.0), 1);
        assert_eq!(respiratory_rate_points(20.0), 0);
        assert_eq!(respiratory_rate_points(24.0), 2);
        assert_eq!(respiratory_rate_points(25.0), 3);
        assert_eq!(oxygen_saturation_points(96.0), 0);
        assert_eq!(systolic_points(219.0), 0);
        assert_eq!(systolic_points(220.0), 3);
        assert_eq!(heart_rate_points(130.0), 2);
        assert_eq!(heart_rate_points(131.0), 3);
        assert_eq!(temperature_points(38.5), 1);
        assert_eq!(temperature_points(39.1), 2);
        assert_eq!(consciousness_points(14.0), 3);
        assert_eq!(consciousness_points(15.0), 0);
    }

    #[test]
    fn test_all_absent_scores_zero() {
        let score = score_subject(&SubjectKey::patient("p1"), &[]);
        assert_eq!(score.score, 0);
        assert_eq!(score.band, RiskBand::Low);
        assert!(score.sub_scores.is_empty());
        for parameter in SCORED_PARAMETERS {
            assert!(!score.is_evaluated(parameter));
        }
        assert!(!score.is_evaluated(VitalParameter::SupplementalOxygen));
    }

    #[test]
    fn test_oxygen_adjusts_spo2_sub_score() {
        let readings = [
            obs(VitalParameter::HeartRate, 130.0, 0),
            obs(VitalParameter::OxygenSaturation, 94.0, 1),
            obs(VitalParameter::SupplementalOxygen, 2.0, 2),
        ];
        let refs: Vec<&Observation> = readings.iter().collect();
        let score = score_subject(&SubjectKey::patient("p1"), &refs);

        assert_eq!(score.score, 4);
        assert_eq!(score.band, RiskBand::Low);
        let spo2 = score.sub_score(VitalParameter::OxygenSaturation).unwrap();
        assert_eq!(spo2.points, 2);
        assert_eq!(spo2.adjustment.as_deref(), Some(OXYGEN_ADJUSTMENT));
        assert!(!score.is_evaluated(VitalParameter::RespiratoryRate));
        assert!(score.is_evaluated(VitalParameter::SupplementalOxygen));
    }

    #[test]
    fn test_oxygen_adjustment_is_capped() {
        let readings = [
            obs(VitalParameter::OxygenSaturation, 88.0, 0),
            obs(VitalParameter::SupplementalOxygen, 4.0, 1),
        ];
        let refs: Vec<&Observation> = readings.iter().collect();
        let score = score_subject(&SubjectKey::patient("p1"), &refs);
        assert_eq!(score.sub_score(VitalParameter::OxygenSaturation).unwrap().points, 3);
        assert_eq!(score.band, RiskBand::Medium);
    }

    #[test]
    fn test_latest_reading_wins() {
        let readings = [
            obs(VitalParameter::HeartRate, 140.0, 0),
            obs(VitalParameter::HeartRate, 75.0, 3),
        ];
        let refs: Vec<&Observation> = readings.iter().collect();
        let score = score_subject(&SubjectKey::patient("p1"), &refs);
        let hr = score.sub_score(VitalParameter::HeartRate).unwrap();
        assert_eq!(hr.points, 0);
        assert_eq!(hr.source, ResourceRef::resource("Observation", "o3"));
    }

    #[test]
    fn test_high_band() {
        let readings = [
            obs(VitalParameter::RespiratoryRate, 26.0, 0),
            obs(VitalParameter::HeartRate, 120.0, 1),
            obs(VitalParameter::Temperature, 39.5, 2),
        ];
        let refs: Vec<&Observation> = readings.iter().collect();
        let score = score_subject(&SubjectKey::patient("p1"), &refs);
        assert_eq!(score.score, 7);
        assert_eq!(score.band, RiskBand::High);
    }
}
