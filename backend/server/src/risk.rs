//! # Risk Score
//!
//! Fixed weighted sum over four clinical fields, scaled to a 0-100 display range:
//!
//! ```text
//! (age / 100) * 0.4 + hypertension * 0.25 + (glucose / 200) * 0.2 + (bmi / 40) * 0.15
//! ```
//!
//! Not a predictive model. The divisors are smaller than the accepted input maxima
//! (glucose has no cap, BMI goes to 80), so a valid record can land above 100.
//! Such scores are reported as-is and flagged with `exceeds_scale` rather than
//! squashed back into range.
use std::fmt;

use serde::Serialize;

use crate::validation::PatientRecord;

const AGE_WEIGHT: f64 = 0.4;
const HYPERTENSION_WEIGHT: f64 = 0.25;
const GLUCOSE_WEIGHT: f64 = 0.2;
const BMI_WEIGHT: f64 = 0.15;

const AGE_DIVISOR: f64 = 100.0;
const GLUCOSE_DIVISOR: f64 = 200.0;
const BMI_DIVISOR: f64 = 40.0;

pub const DISPLAY_SCALE: f64 = 100.0;
pub const MEDIUM_THRESHOLD: f64 = 30.0;
pub const HIGH_THRESHOLD: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn for_score(score: f64) -> Self {
        if score < MEDIUM_THRESHOLD {
            RiskBand::Low
        } else if score < HIGH_THRESHOLD {
            RiskBand::Medium
        } else {
            RiskBand::High
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskScore {
    #[serde(serialize_with = "two_decimals")]
    pub score: f64,
    pub band: RiskBand,
    pub exceeds_scale: bool,
}

impl RiskScore {
    fn from_raw(raw: f64) -> Self {
        let score = raw * DISPLAY_SCALE;

        Self {
            score,
            band: RiskBand::for_score(score),
            exceeds_scale: score > DISPLAY_SCALE,
        }
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} ({})", self.score, self.band.as_str())
    }
}

fn two_decimals<S: serde::Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 100.0).round() / 100.0)
}

/// Unscaled weighted sum, before the display multiplier.
pub fn raw_score(age: f64, hypertension: bool, avg_glucose_level: f64, bmi: f64) -> f64 {
    let hypertension = if hypertension { 1.0 } else { 0.0 };

    (age / AGE_DIVISOR) * AGE_WEIGHT
        + hypertension * HYPERTENSION_WEIGHT
        + (avg_glucose_level / GLUCOSE_DIVISOR) * GLUCOSE_WEIGHT
        + (bmi / BMI_DIVISOR) * BMI_WEIGHT
}

pub fn score_values(age: f64, hypertension: bool, avg_glucose_level: f64, bmi: f64) -> RiskScore {
    RiskScore::from_raw(raw_score(age, hypertension, avg_glucose_level, bmi))
}

pub fn score(record: &PatientRecord) -> RiskScore {
    score_values(
        record.age,
        record.hypertension,
        record.avg_glucose_level,
        record.bmi,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{EverMarried, Gender, ResidenceType, SmokingStatus, WorkType};

    fn record(age: f64, hypertension: bool, glucose: f64, bmi: f64) -> PatientRecord {
        PatientRecord {
            age,
            gender: Gender::Female,
            hypertension,
            heart_disease: false,
            ever_married: EverMarried::No,
            work_type: WorkType::GovtJob,
            residence_type: ResidenceType::Rural,
            avg_glucose_level: glucose,
            bmi,
            smoking_status: SmokingStatus::Unknown,
            stroke: false,
        }
    }

    #[test]
    fn test_reference_scenario() {
        let raw = raw_score(55.0, true, 180.5, 28.3);
        assert!((raw - 0.756625).abs() < 1e-12);

        let risk = score(&record(55.0, true, 180.5, 28.3));
        assert!((risk.score - 75.6625).abs() < 1e-9);
        assert_eq!(risk.band, RiskBand::High);
        assert!(!risk.exceeds_scale);
        assert_eq!(risk.to_string(), "75.66 (high)");
    }

    #[test]
    fn test_zero_inputs() {
        let risk = score_values(0.0, false, 0.0, 0.1);

        assert!(risk.score < 1.0);
        assert_eq!(risk.band, RiskBand::Low);
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(RiskBand::for_score(29.99), RiskBand::Low);
        assert_eq!(RiskBand::for_score(30.0), RiskBand::Medium);
        assert_eq!(RiskBand::for_score(59.99), RiskBand::Medium);
        assert_eq!(RiskBand::for_score(60.0), RiskBand::High);
    }

    #[test]
    fn test_hypertension_weight() {
        let without = score_values(40.0, false, 100.0, 25.0);
        let with = score_values(40.0, true, 100.0, 25.0);

        assert!((with.score - without.score - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_exceeds_scale_is_flagged() {
        // every input within its accepted range
        let risk = score_values(120.0, true, 400.0, 80.0);

        assert!(risk.score > 100.0);
        assert!(risk.exceeds_scale);
        assert_eq!(risk.band, RiskBand::High);
    }

    #[test]
    fn test_serialized_rounding() {
        let risk = score_values(55.0, true, 180.5, 28.3);
        let json = serde_json::to_value(risk).expect("serialize");

        assert_eq!(json["score"], 75.66);
        assert_eq!(json["band"], "high");
        assert_eq!(json["exceeds_scale"], false);
    }
}
