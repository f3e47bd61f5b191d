//! Core types for the heartlink sync pipeline
//!
//! This module defines the data that flows from the platform health source
//! through classification, digitization and mapping: scalar samples, ECG
//! recordings and their digitized form, plus the patient identity every
//! resource is attached to.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Physiologically distinct sample kinds that have a coding-table entry.
///
/// Declaration order is the order in which kinds appear in a transaction
/// bundle, so `Ord` is derived and must stay in sync with [`SampleKind::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    HeartRate,
    RestingHeartRate,
    OxygenSaturation,
    StepCount,
    ActiveEnergy,
    ExerciseMinutes,
    StandMinutes,
    BloodGlucose,
    RespiratoryRate,
    BodyTemperature,
    HeartRateVariabilitySdnn,
    BodyMass,
}

impl SampleKind {
    /// Every known kind, in bundle order
    pub const ALL: [SampleKind; 12] = [
        SampleKind::HeartRate,
        SampleKind::RestingHeartRate,
        SampleKind::OxygenSaturation,
        SampleKind::StepCount,
        SampleKind::ActiveEnergy,
        SampleKind::ExerciseMinutes,
        SampleKind::StandMinutes,
        SampleKind::BloodGlucose,
        SampleKind::RespiratoryRate,
        SampleKind::BodyTemperature,
        SampleKind::HeartRateVariabilitySdnn,
        SampleKind::BodyMass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::HeartRate => "heart_rate",
            SampleKind::RestingHeartRate => "resting_heart_rate",
            SampleKind::OxygenSaturation => "oxygen_saturation",
            SampleKind::StepCount => "step_count",
            SampleKind::ActiveEnergy => "active_energy",
            SampleKind::ExerciseMinutes => "exercise_minutes",
            SampleKind::StandMinutes => "stand_minutes",
            SampleKind::BloodGlucose => "blood_glucose",
            SampleKind::RespiratoryRate => "respiratory_rate",
            SampleKind::BodyTemperature => "body_temperature",
            SampleKind::HeartRateVariabilitySdnn => "heart_rate_variability_sdnn",
            SampleKind::BodyMass => "body_mass",
        }
    }

    /// Platform quantity-type identifier for this kind
    pub fn platform_identifier(&self) -> &'static str {
        match self {
            SampleKind::HeartRate => "HKQuantityTypeIdentifierHeartRate",
            SampleKind::RestingHeartRate => "HKQuantityTypeIdentifierRestingHeartRate",
            SampleKind::OxygenSaturation => "HKQuantityTypeIdentifierOxygenSaturation",
            SampleKind::StepCount => "HKQuantityTypeIdentifierStepCount",
            SampleKind::ActiveEnergy => "HKQuantityTypeIdentifierActiveEnergyBurned",
            SampleKind::ExerciseMinutes => "HKQuantityTypeIdentifierAppleExerciseTime",
            SampleKind::StandMinutes => "HKQuantityTypeIdentifierAppleStandTime",
            SampleKind::BloodGlucose => "HKQuantityTypeIdentifierBloodGlucose",
            SampleKind::RespiratoryRate => "HKQuantityTypeIdentifierRespiratoryRate",
            SampleKind::BodyTemperature => "HKQuantityTypeIdentifierBodyTemperature",
            SampleKind::HeartRateVariabilitySdnn => {
                "HKQuantityTypeIdentifierHeartRateVariabilitySDNN"
            }
            SampleKind::BodyMass => "HKQuantityTypeIdentifierBodyMass",
        }
    }

    /// Resolve a source-reported identifier (snake_case name or platform
    /// identifier). Returns `None` for kinds without a coding-table entry.
    pub fn from_identifier(identifier: &str) -> Option<SampleKind> {
        SampleKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == identifier || kind.platform_identifier() == identifier)
    }
}

/// One scalar reading as delivered by the health source.
///
/// `kind` is kept as the raw identifier so that kinds the coding table does
/// not know yet survive deserialization and are dropped by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Source-reported kind identifier
    pub kind: String,
    /// Value in the kind's native reading unit
    pub value: f64,
    /// Sample start time
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(kind: SampleKind, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            value,
            timestamp,
        }
    }

    pub fn known_kind(&self) -> Option<SampleKind> {
        SampleKind::from_identifier(&self.kind)
    }
}

/// Rhythm classification attached to an ECG recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EcgClassification {
    #[default]
    NotSet,
    SinusRhythm,
    AtrialFibrillation,
    InconclusiveLowRate,
    InconclusiveHighRate,
    InconclusivePoorReading,
    InconclusiveOther,
}

impl EcgClassification {
    /// Numeric code used by the platform for this classification
    pub fn code(&self) -> u8 {
        match self {
            EcgClassification::NotSet => 0,
            EcgClassification::SinusRhythm => 1,
            EcgClassification::AtrialFibrillation => 2,
            EcgClassification::InconclusiveLowRate => 3,
            EcgClassification::InconclusiveHighRate => 4,
            EcgClassification::InconclusivePoorReading => 5,
            EcgClassification::InconclusiveOther => 6,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            EcgClassification::NotSet => "Not Set",
            EcgClassification::SinusRhythm => "Sinus Rhythm",
            EcgClassification::AtrialFibrillation => "Atrial Fibrillation",
            EcgClassification::InconclusiveLowRate => "Inconclusive: Low Heart Rate",
            EcgClassification::InconclusiveHighRate => "Inconclusive: High Heart Rate",
            EcgClassification::InconclusivePoorReading => "Inconclusive: Poor Reading",
            EcgClassification::InconclusiveOther => "Inconclusive: Other Reason",
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, EcgClassification::NotSet)
    }
}

/// One ECG recording. Voltage points are fetched lazily from the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformRecording {
    /// Source reference used to fetch the recording's points
    pub id: String,
    /// Recording start time
    pub start_time: DateTime<Utc>,
    /// Rhythm classification
    #[serde(default)]
    pub classification: EcgClassification,
    /// Average heart rate during the recording (bpm)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_heart_rate: Option<f64>,
    /// Nominal sampling frequency reported by the device (Hz)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_frequency_hz: Option<f64>,
}

/// A single voltage reading inside a recording
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformPoint {
    /// Seconds since the recording started
    pub time_offset_seconds: f64,
    /// Lead voltage (µV)
    pub microvolts: f64,
}

impl WaveformPoint {
    pub fn new(time_offset_seconds: f64, microvolts: f64) -> Self {
        Self {
            time_offset_seconds,
            microvolts,
        }
    }
}

/// Compact, re-expandable encoding of a digitized waveform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledData {
    /// First voltage sample
    pub origin_value: f64,
    /// Mean inter-sample interval in milliseconds
    pub period_milliseconds: f64,
    /// Minimum voltage
    pub lower_limit: f64,
    /// Maximum voltage
    pub upper_limit: f64,
    /// Number of interleaved channels, always 1
    pub dimensions: u32,
    /// Voltages formatted to 3 decimals, space separated, in order
    pub data: String,
}

/// A recording paired with its digitized waveform
#[derive(Debug, Clone, PartialEq)]
pub struct DigitizedRecording {
    pub recording: WaveformRecording,
    pub sampled: SampledData,
}

/// Half-open query window `(start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `instant` lies strictly after `start` and no later than `end`
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant > self.start && instant <= self.end
    }
}

/// Administrative gender as understood by the clinical store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    #[default]
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::Unknown => "unknown",
        }
    }
}

/// Patient id plus the minimal demographic stub sent with every bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientIdentity {
    pub id: String,
    #[serde(default)]
    pub given: Vec<String>,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
}

impl PatientIdentity {
    /// Reference string used as an Observation subject
    pub fn reference(&self) -> String {
        format!("Patient/{}", self.id)
    }

    /// Readable id derived from demographics: `<given>-<family>-<yyyymmdd>`
    pub fn generate_id(given: &[String], family: &str, birth_date: Option<NaiveDate>) -> String {
        let mut parts: Vec<String> = given
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(family))
            .map(|part| part.trim().to_lowercase().replace(char::is_whitespace, "-"))
            .filter(|part| !part.is_empty())
            .collect();
        if let Some(date) = birth_date {
            parts.push(date.format("%Y%m%d").to_string());
        }
        if parts.is_empty() {
            return "anonymous".to_string();
        }
        parts.join("-")
    }
}
