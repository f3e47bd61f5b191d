//! Transaction bundle assembly
//!
//! Entry 0 is always the idempotent patient upsert (`PUT Patient/{id}`).
//! Observations follow as `POST Observation` entries: scalar kinds in their
//! declared order, each kind's samples by timestamp, then ECG observations by
//! recording start time. A batch with nothing to report produces no bundle.

use crate::classifier::ClassifiedBatch;
use crate::fhir::{
    Bundle, BundleEntry, BundleRequest, BundleType, HttpVerb, HumanName, Observation, Patient,
    Resource,
};
use crate::mapper::ResourceMapper;
use crate::types::{DigitizedRecording, PatientIdentity};
use tracing::warn;

/// Builder for transaction bundles of one patient
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    patient: PatientIdentity,
    mapper: ResourceMapper,
    conditional_create: bool,
}

impl BundleBuilder {
    pub fn new(patient: PatientIdentity) -> Self {
        let mapper = ResourceMapper::new(&patient);
        Self {
            patient,
            mapper,
            conditional_create: true,
        }
    }

    /// Toggle `ifNoneExist` on observation entries
    pub fn with_conditional_create(mut self, enabled: bool) -> Self {
        self.conditional_create = enabled;
        self
    }

    pub fn patient(&self) -> &PatientIdentity {
        &self.patient
    }

    /// The patient upsert entry. Identical for identical identities.
    pub fn patient_entry(&self) -> BundleEntry {
        let name = if self.patient.given.is_empty() && self.patient.family.is_empty() {
            Vec::new()
        } else {
            vec![HumanName {
                given: self.patient.given.clone(),
                family: self.patient.family.clone(),
            }]
        };

        BundleEntry {
            request: BundleRequest {
                method: HttpVerb::Put,
                url: format!("Patient/{}", self.patient.id),
                if_none_exist: None,
            },
            resource: Resource::Patient(Patient {
                id: self.patient.id.clone(),
                name,
                gender: self.patient.gender.as_str().to_string(),
                birth_date: self
                    .patient
                    .birth_date
                    .map(|d| d.format("%Y-%m-%d").to_string()),
            }),
        }
    }

    /// Build the bundle, or `None` when there is nothing to send
    pub fn build(&self, batch: &ClassifiedBatch, waveforms: &[DigitizedRecording]) -> Option<Bundle> {
        let mut observations = Vec::with_capacity(batch.scalar_count() + waveforms.len());

        for (kind, samples) in &batch.scalars {
            for sample in samples {
                match self.mapper.map_scalar(*kind, sample) {
                    Ok(observation) => observations.push(observation),
                    Err(e) => warn!(kind = kind.as_str(), error = %e, "skipping sample"),
                }
            }
        }

        let mut ordered: Vec<&DigitizedRecording> = waveforms.iter().collect();
        ordered.sort_by(|a, b| {
            (a.recording.start_time, &a.recording.id).cmp(&(b.recording.start_time, &b.recording.id))
        });
        for digitized in ordered {
            observations.push(
                self.mapper
                    .map_waveform(&digitized.recording, &digitized.sampled),
            );
        }

        if observations.is_empty() {
            return None;
        }

        let mut entry = Vec::with_capacity(observations.len() + 1);
        entry.push(self.patient_entry());
        entry.extend(observations.into_iter().map(|o| self.observation_entry(o)));

        Some(Bundle {
            bundle_type: BundleType::Transaction,
            entry,
        })
    }

    fn observation_entry(&self, observation: Observation) -> BundleEntry {
        let if_none_exist = if self.conditional_create {
            observation
                .identifier
                .first()
                .map(|id| format!("identifier={}|{}", id.system, id.value))
        } else {
            None
        };

        BundleEntry {
            request: BundleRequest {
                method: HttpVerb::Post,
                url: "Observation".to_string(),
                if_none_exist,
            },
            resource: Resource::Observation(observation),
        }
    }
}
