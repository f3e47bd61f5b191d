//! Unit & coding table
//!
//! Static mapping from a sample kind to its standard terminology code, the
//! unit the source reports it in, and the unit it is emitted in. The match is
//! exhaustive over [`SampleKind`], so adding a kind without a table entry is
//! a compile error.

use crate::types::SampleKind;

/// LOINC terminology system
pub const LOINC_SYSTEM: &str = "http://loinc.org";

/// UCUM unit system
pub const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

/// Observation category code system
pub const CATEGORY_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/observation-category";

/// Conversion factor from mmol/L to mg/dL for blood glucose
pub const GLUCOSE_MMOL_TO_MG_DL: f64 = 18.0;

/// Observation category an entry is filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationCategory {
    VitalSigns,
    Activity,
    Laboratory,
    Procedure,
}

impl ObservationCategory {
    pub fn code(&self) -> &'static str {
        match self {
            ObservationCategory::VitalSigns => "vital-signs",
            ObservationCategory::Activity => "activity",
            ObservationCategory::Laboratory => "laboratory",
            ObservationCategory::Procedure => "procedure",
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            ObservationCategory::VitalSigns => "Vital Signs",
            ObservationCategory::Activity => "Activity",
            ObservationCategory::Laboratory => "Laboratory",
            ObservationCategory::Procedure => "Procedure",
        }
    }
}

/// Emitted unit: human label plus UCUM code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputUnit {
    pub unit: &'static str,
    pub code: &'static str,
}

/// Value conversion applied after reading the source value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Identity,
    Scale(f64),
}

impl Transform {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Transform::Identity => value,
            Transform::Scale(factor) => value * factor,
        }
    }
}

/// One coding-table row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodingEntry {
    pub code: &'static str,
    pub display: &'static str,
    /// Unit the source reports values in
    pub reading_unit: &'static str,
    pub output_unit: OutputUnit,
    pub transform: Transform,
    pub category: ObservationCategory,
}

const BEATS_PER_MINUTE: OutputUnit = OutputUnit {
    unit: "beats/minute",
    code: "/min",
};

const MINUTES: OutputUnit = OutputUnit {
    unit: "min",
    code: "min",
};

/// ECG rhythm strip observation code
pub const ECG_CODE: (&str, &str) = ("131328-4", "ECG rhythm strip");

/// ECG lead voltage component code
pub const ECG_LEAD_VOLTAGE_CODE: (&str, &str) = ("51985-6", "ECG lead I voltage");

/// Code system for the rhythm classification component
pub const ECG_CLASSIFICATION_SYSTEM: &str = "http://hl7.org/fhir/ValueSet/ecg-classification";

/// Heart-rate code, reused for the ECG derived heart-rate component
pub const HEART_RATE_CODE: (&str, &str) = ("8867-4", "Heart rate");

/// Unit used for waveform voltages
pub const MICROVOLT: OutputUnit = OutputUnit {
    unit: "uV",
    code: "uV",
};

/// Heart-rate unit, reused for the ECG derived heart-rate component
pub const HEART_RATE_UNIT: OutputUnit = BEATS_PER_MINUTE;

/// Look up the coding-table row for a kind
pub fn lookup(kind: SampleKind) -> CodingEntry {
    use ObservationCategory::*;

    match kind {
        SampleKind::HeartRate => CodingEntry {
            code: HEART_RATE_CODE.0,
            display: HEART_RATE_CODE.1,
            reading_unit: "count/min",
            output_unit: BEATS_PER_MINUTE,
            transform: Transform::Identity,
            category: VitalSigns,
        },
        SampleKind::RestingHeartRate => CodingEntry {
            code: "40443-4",
            display: "Resting heart rate",
            reading_unit: "count/min",
            output_unit: BEATS_PER_MINUTE,
            transform: Transform::Identity,
            category: VitalSigns,
        },
        SampleKind::OxygenSaturation => CodingEntry {
            code: "59408-5",
            display: "Oxygen saturation",
            reading_unit: "%",
            output_unit: OutputUnit {
                unit: "%",
                code: "%",
            },
            transform: Transform::Identity,
            category: VitalSigns,
        },
        SampleKind::StepCount => CodingEntry {
            code: "41950-7",
            display: "Step count",
            reading_unit: "count",
            output_unit: OutputUnit {
                unit: "count",
                code: "{count}",
            },
            transform: Transform::Identity,
            category: Activity,
        },
        SampleKind::ActiveEnergy => CodingEntry {
            code: "41956-7",
            display: "Active energy burned",
            reading_unit: "kcal",
            output_unit: OutputUnit {
                unit: "kcal",
                code: "kcal",
            },
            transform: Transform::Identity,
            category: Activity,
        },
        SampleKind::ExerciseMinutes => CodingEntry {
            code: "54128-8",
            display: "Exercise duration",
            reading_unit: "min",
            output_unit: MINUTES,
            transform: Transform::Identity,
            category: Activity,
        },
        SampleKind::StandMinutes => CodingEntry {
            code: "55417-6",
            display: "Stand duration",
            reading_unit: "min",
            output_unit: MINUTES,
            transform: Transform::Identity,
            category: Activity,
        },
        SampleKind::BloodGlucose => CodingEntry {
            code: "2339-0",
            display: "Glucose",
            reading_unit: "mmol/L",
            output_unit: OutputUnit {
                unit: "mg/dL",
                code: "mg/dL",
            },
            transform: Transform::Scale(GLUCOSE_MMOL_TO_MG_DL),
            category: Laboratory,
        },
        SampleKind::RespiratoryRate => CodingEntry {
            code: "9279-1",
            display: "Respiratory rate",
            reading_unit: "count/min",
            output_unit: OutputUnit {
                unit: "breaths/minute",
                code: "/min",
            },
            transform: Transform::Identity,
            category: VitalSigns,
        },
        SampleKind::BodyTemperature => CodingEntry {
            code: "8310-5",
            display: "Body temperature",
            reading_unit: "degC",
            output_unit: OutputUnit {
                unit: "C",
                code: "Cel",
            },
            transform: Transform::Identity,
            category: VitalSigns,
        },
        SampleKind::HeartRateVariabilitySdnn => CodingEntry {
            code: "80404-7",
            display: "R-R interval.standard deviation (Heart rate variability)",
            reading_unit: "ms",
            output_unit: OutputUnit {
                unit: "ms",
                code: "ms",
            },
            transform: Transform::Identity,
            category: VitalSigns,
        },
        SampleKind::BodyMass => CodingEntry {
            code: "29463-7",
            display: "Body weight",
            reading_unit: "kg",
            output_unit: OutputUnit {
                unit: "kg",
                code: "kg",
            },
            transform: Transform::Identity,
            category: VitalSigns,
        },
    }
}
