//! # Record Validation
//!
//! Turns a raw form (field name -> string) into a typed [`PatientRecord`].
//!
//! Every field is checked and every failure is reported, so one rejected submission
//! lists all offending fields at once. Untyped maps never make it past this module.
use std::collections::HashMap;

use serde::{
    Deserialize, Serialize, Serializer,
    de::{self, Deserializer},
    ser::SerializeStruct,
};

pub const AGE: &str = "age";
pub const GENDER: &str = "gender";
pub const HYPERTENSION: &str = "hypertension";
pub const HEART_DISEASE: &str = "heart_disease";
pub const EVER_MARRIED: &str = "ever_married";
pub const WORK_TYPE: &str = "work_type";
pub const RESIDENCE_TYPE: &str = "residence_type";
pub const AVG_GLUCOSE_LEVEL: &str = "avg_glucose_level";
pub const BMI: &str = "bmi";
pub const SMOKING_STATUS: &str = "smoking_status";
pub const STROKE: &str = "stroke";

// older form templates capitalise this one
const RESIDENCE_TYPE_ALIAS: &str = "Residence_type";

pub const AGE_RANGE: (f64, f64) = (0.0, 120.0);
pub const BMI_RANGE: (f64, f64) = (0.1, 80.0);
pub const GLUCOSE_MIN: f64 = 0.0;

/// Closed set of accepted strings for a categorical field.
pub trait Choice: Sized + Copy + 'static {
    const ALL: &'static [Self];
    const NAMES: &'static [&'static str];

    fn as_str(self) -> &'static str;

    fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == value)
    }
}

macro_rules! choice {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl Choice for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];
            const NAMES: &'static [&'static str] = &[$($text),+];

            fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                <$name as Choice>::parse(&raw).ok_or_else(|| {
                    de::Error::custom(format!(
                        "invalid {}: {raw}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

choice!(Gender {
    Male => "Male",
    Female => "Female",
    Other => "Other",
});

choice!(EverMarried {
    Yes => "Yes",
    No => "No",
});

choice!(WorkType {
    Private => "Private",
    SelfEmployed => "Self-employed",
    GovtJob => "Govt_job",
    Children => "children",
    NeverWorked => "Never_worked",
});

choice!(ResidenceType {
    Urban => "Urban",
    Rural => "Rural",
});

choice!(SmokingStatus {
    FormerlySmoked => "formerly smoked",
    NeverSmoked => "never smoked",
    Smokes => "smokes",
    Unknown => "Unknown",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub age: f64,
    pub gender: Gender,
    pub hypertension: bool,
    pub heart_disease: bool,
    pub ever_married: EverMarried,
    pub work_type: WorkType,
    pub residence_type: ResidenceType,
    pub avg_glucose_level: f64,
    pub bmi: f64,
    pub smoking_status: SmokingStatus,
    pub stroke: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldErrorKind {
    Missing,
    NotANumber,
    NotABoolean,
    OutOfRange { min: f64, max: Option<f64> },
    NotAllowed { allowed: &'static [&'static str] },
    Rejected(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: &'static str,
    pub kind: FieldErrorKind,
}

impl FieldError {
    pub fn new(field: &'static str, kind: FieldErrorKind) -> Self {
        Self { field, kind }
    }

    pub fn message(&self) -> String {
        let field = self.field;

        match &self.kind {
            FieldErrorKind::Missing => format!("{field} is required"),
            FieldErrorKind::NotANumber => format!("{field} must be a number"),
            FieldErrorKind::NotABoolean => format!("{field} must be 0 or 1"),
            FieldErrorKind::OutOfRange {
                min,
                max: Some(max),
            } => format!("{field} must be between {min} and {max}"),
            FieldErrorKind::OutOfRange { min, max: None } => {
                format!("{field} must be at least {min}")
            }
            FieldErrorKind::NotAllowed { allowed } => {
                format!("{field} must be one of: {}", allowed.join(", "))
            }
            FieldErrorKind::Rejected(reason) => format!("{field}: {reason}"),
        }
    }
}

impl Serialize for FieldError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FieldError", 2)?;
        state.serialize_field("field", self.field)?;
        state.serialize_field("message", &self.message())?;
        state.end()
    }
}

struct Fields<'a> {
    raw: &'a HashMap<String, String>,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    fn new(raw: &'a HashMap<String, String>) -> Self {
        Self {
            raw,
            errors: Vec::new(),
        }
    }

    fn reject(&mut self, field: &'static str, kind: FieldErrorKind) {
        self.errors.push(FieldError::new(field, kind));
    }

    fn text(&mut self, field: &'static str, aliases: &[&str]) -> Option<&'a str> {
        let raw = self.raw;
        let value = std::iter::once(field)
            .chain(aliases.iter().copied())
            .find_map(|key| raw.get(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());

        if value.is_none() {
            self.reject(field, FieldErrorKind::Missing);
        }

        value
    }

    fn number(&mut self, field: &'static str, min: f64, max: Option<f64>) -> Option<f64> {
        let text = self.text(field, &[])?;

        let value = match text.parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                self.reject(field, FieldErrorKind::NotANumber);
                return None;
            }
        };

        let in_range = value >= min && max.map_or(true, |max| value <= max);
        if !in_range {
            self.reject(field, FieldErrorKind::OutOfRange { min, max });
            return None;
        }

        Some(value)
    }

    fn flag(&mut self, field: &'static str) -> Option<bool> {
        match self.text(field, &[])? {
            "0" => Some(false),
            "1" => Some(true),
            _ => {
                self.reject(field, FieldErrorKind::NotABoolean);
                None
            }
        }
    }

    fn choice<T: Choice>(&mut self, field: &'static str, aliases: &[&str]) -> Option<T> {
        let text = self.text(field, aliases)?;

        let parsed = T::parse(text);
        if parsed.is_none() {
            self.reject(
                field,
                FieldErrorKind::NotAllowed { allowed: T::NAMES },
            );
        }

        parsed
    }
}

pub fn validate(raw: &HashMap<String, String>) -> Result<PatientRecord, Vec<FieldError>> {
    let mut fields = Fields::new(raw);

    let age = fields.number(AGE, AGE_RANGE.0, Some(AGE_RANGE.1));
    let gender = fields.choice::<Gender>(GENDER, &[]);
    let hypertension = fields.flag(HYPERTENSION);
    let heart_disease = fields.flag(HEART_DISEASE);
    let ever_married = fields.choice::<EverMarried>(EVER_MARRIED, &[]);
    let work_type = fields.choice::<WorkType>(WORK_TYPE, &[]);
    let residence_type = fields.choice::<ResidenceType>(RESIDENCE_TYPE, &[RESIDENCE_TYPE_ALIAS]);
    let avg_glucose_level = fields.number(AVG_GLUCOSE_LEVEL, GLUCOSE_MIN, None);
    let bmi = fields.number(BMI, BMI_RANGE.0, Some(BMI_RANGE.1));
    let smoking_status = fields.choice::<SmokingStatus>(SMOKING_STATUS, &[]);
    let stroke = fields.flag(STROKE);

    match (
        age,
        gender,
        hypertension,
        heart_disease,
        ever_married,
        work_type,
        residence_type,
        avg_glucose_level,
        bmi,
        smoking_status,
        stroke,
    ) {
        (
            Some(age),
            Some(gender),
            Some(hypertension),
            Some(heart_disease),
            Some(ever_married),
            Some(work_type),
            Some(residence_type),
            Some(avg_glucose_level),
            Some(bmi),
            Some(smoking_status),
            Some(stroke),
        ) if fields.errors.is_empty() => Ok(PatientRecord {
            age,
            gender,
            hypertension,
            heart_disease,
            ever_married,
            work_type,
            residence_type,
            avg_glucose_level,
            bmi,
            smoking_status,
            stroke,
        }),
        _ => Err(fields.errors),
    }
}
