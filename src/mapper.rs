//! Resource mapping
//!
//! Turns a classified sample or a digitized recording into one coded
//! Observation. Both entry points are pure: no network, no persistence.

use crate::coding::{
    self, ObservationCategory, CATEGORY_SYSTEM, ECG_CLASSIFICATION_SYSTEM, ECG_CODE,
    ECG_LEAD_VOLTAGE_CODE, HEART_RATE_CODE, HEART_RATE_UNIT, LOINC_SYSTEM, MICROVOLT, UCUM_SYSTEM,
};
use crate::error::SyncError;
use crate::fhir::{
    CodeableConcept, Coding, Identifier, Observation, ObservationComponent, Quantity, Reference,
    SampledDataValue,
};
use crate::types::{PatientIdentity, Sample, SampleKind, SampledData, WaveformRecording};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Identifier system for deterministic observation identifiers
pub const IDENTIFIER_SYSTEM: &str = "urn:ietf:rfc:3986";

/// Namespace for observation identifiers (UUID v5)
const IDENTIFIER_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_3c2e_9a4d_4e51_8c07_2f5d_a1e3_b904);

const FINAL: &str = "final";

/// Format an instant as ISO-8601 with milliseconds and an explicit UTC offset
pub fn format_effective(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Mapper bound to one patient
#[derive(Debug, Clone)]
pub struct ResourceMapper {
    patient_id: String,
    subject: Reference,
}

impl ResourceMapper {
    pub fn new(patient: &PatientIdentity) -> Self {
        Self {
            patient_id: patient.id.clone(),
            subject: Reference {
                reference: patient.reference(),
            },
        }
    }

    /// Map a scalar sample to a quantity-valued observation.
    ///
    /// Fails with [`SyncError::Mapping`] for values that cannot be encoded
    /// (NaN, infinities); callers skip such samples.
    pub fn map_scalar(&self, kind: SampleKind, sample: &Sample) -> Result<Observation, SyncError> {
        let entry = coding::lookup(kind);
        let value = entry.transform.apply(sample.value);
        if !value.is_finite() {
            return Err(SyncError::Mapping(format!(
                "{} sample at {} has non-finite value",
                kind.as_str(),
                sample.timestamp
            )));
        }

        let effective = format_effective(sample.timestamp);
        let identifier = self.identifier(&[entry.code, &effective, &format!("{value:.6}")]);

        Ok(Observation {
            identifier: vec![identifier],
            status: FINAL.to_string(),
            category: vec![category(entry.category)],
            code: CodeableConcept::single(Coding::new(LOINC_SYSTEM, entry.code, entry.display)),
            subject: self.subject.clone(),
            effective_date_time: effective,
            value_quantity: Some(Quantity {
                value,
                unit: entry.output_unit.unit.to_string(),
                system: UCUM_SYSTEM.to_string(),
                code: entry.output_unit.code.to_string(),
            }),
            component: Vec::new(),
        })
    }

    /// Map a digitized recording to a component-valued observation.
    ///
    /// Components: the sampled waveform, then the rhythm classification when
    /// set, then the average heart rate when present.
    pub fn map_waveform(&self, recording: &WaveformRecording, sampled: &SampledData) -> Observation {
        let effective = format_effective(recording.start_time);
        let identifier = self.identifier(&[ECG_CODE.0, &effective, &recording.id]);

        let mut component = vec![ObservationComponent {
            code: CodeableConcept::single(Coding::new(
                LOINC_SYSTEM,
                ECG_LEAD_VOLTAGE_CODE.0,
                ECG_LEAD_VOLTAGE_CODE.1,
            )),
            value_quantity: None,
            value_string: None,
            value_sampled_data: Some(SampledDataValue {
                origin: Quantity {
                    value: sampled.origin_value,
                    unit: MICROVOLT.unit.to_string(),
                    system: UCUM_SYSTEM.to_string(),
                    code: MICROVOLT.code.to_string(),
                },
                period: sampled.period_milliseconds,
                lower_limit: sampled.lower_limit,
                upper_limit: sampled.upper_limit,
                dimensions: sampled.dimensions,
                data: sampled.data.clone(),
            }),
        }];

        if recording.classification.is_set() {
            let description = recording.classification.description();
            component.push(ObservationComponent {
                code: CodeableConcept::single(Coding::new(
                    ECG_CLASSIFICATION_SYSTEM,
                    &recording.classification.code().to_string(),
                    description,
                )),
                value_quantity: None,
                value_string: Some(description.to_string()),
                value_sampled_data: None,
            });
        }

        if let Some(heart_rate) = recording.average_heart_rate.filter(|hr| hr.is_finite()) {
            component.push(ObservationComponent {
                code: CodeableConcept::single(Coding::new(
                    LOINC_SYSTEM,
                    HEART_RATE_CODE.0,
                    HEART_RATE_CODE.1,
                )),
                value_quantity: Some(Quantity {
                    value: heart_rate,
                    unit: HEART_RATE_UNIT.unit.to_string(),
                    system: UCUM_SYSTEM.to_string(),
                    code: HEART_RATE_UNIT.code.to_string(),
                }),
                value_string: None,
                value_sampled_data: None,
            });
        }

        Observation {
            identifier: vec![identifier],
            status: FINAL.to_string(),
            category: vec![category(ObservationCategory::Procedure)],
            code: CodeableConcept::single(Coding::new(LOINC_SYSTEM, ECG_CODE.0, ECG_CODE.1)),
            subject: self.subject.clone(),
            effective_date_time: effective,
            value_quantity: None,
            component,
        }
    }

    /// Deterministic identifier over the patient and the given parts
    fn identifier(&self, parts: &[&str]) -> Identifier {
        let name = std::iter::once(self.patient_id.as_str())
            .chain(parts.iter().copied())
            .collect::<Vec<_>>()
            .join("|");
        let uuid = Uuid::new_v5(&IDENTIFIER_NAMESPACE, name.as_bytes());
        Identifier {
            system: IDENTIFIER_SYSTEM.to_string(),
            value: format!("urn:uuid:{uuid}"),
        }
    }
}

fn category(category: ObservationCategory) -> CodeableConcept {
    CodeableConcept::single(Coding::new(
        CATEGORY_SYSTEM,
        category.code(),
        category.display(),
    ))
}
