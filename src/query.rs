//! Read-only lookup of recently uploaded observations
//!
//! Used by collaborators (symptom correlation) to reference the patient's
//! latest ECG observations. Not part of the upload path.

use crate::coding::{ECG_CODE, LOINC_SYSTEM};
use crate::error::TransportError;
use crate::transport::{HttpTransport, FHIR_JSON};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error};

/// Reference to an observation held by the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationReference {
    pub id: String,
    pub effective: Option<DateTime<Utc>>,
}

impl ObservationReference {
    /// Relative reference, e.g. `Observation/123`
    pub fn reference(&self) -> String {
        format!("Observation/{}", self.id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchBundle {
    resource_type: String,
    #[serde(rename = "type")]
    bundle_type: Option<String>,
    #[serde(default)]
    entry: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    resource: Option<SearchResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResource {
    id: Option<String>,
    effective_date_time: Option<String>,
}

/// Query facade over the store's Observation search endpoint
#[derive(Debug, Clone)]
pub struct ObservationQuery {
    transport: HttpTransport,
    patient_id: String,
}

impl ObservationQuery {
    pub fn new(transport: HttpTransport, patient_id: impl Into<String>) -> Self {
        Self {
            transport,
            patient_id: patient_id.into(),
        }
    }

    /// Most recent ECG observations, newest first
    pub async fn recent_waveforms(
        &self,
        count: usize,
    ) -> Result<Vec<ObservationReference>, TransportError> {
        self.recent(LOINC_SYSTEM, ECG_CODE.0, count).await
    }

    /// Most recent observations with `system|code`, newest first
    pub async fn recent(
        &self,
        system: &str,
        code: &str,
        count: usize,
    ) -> Result<Vec<ObservationReference>, TransportError> {
        let url = format!("{}/Observation", self.transport.base_url());
        let subject = format!("Patient/{}", self.patient_id);
        let code = format!("{system}|{code}");
        let count = count.to_string();

        debug!(url = %url, subject = %subject, code = %code, "searching observations");

        let response = self
            .transport
            .client()
            .get(&url)
            .header(reqwest::header::ACCEPT, FHIR_JSON)
            .query(&[
                ("subject", subject.as_str()),
                ("code", code.as_str()),
                ("_sort", "-date"),
                ("_count", count.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "observation search failed");
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        parse_search_bundle(&body)
    }
}

fn parse_search_bundle(body: &str) -> Result<Vec<ObservationReference>, TransportError> {
    let bundle: SearchBundle =
        serde_json::from_str(body).map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

    if bundle.resource_type != "Bundle" || bundle.bundle_type.as_deref() != Some("searchset") {
        return Err(TransportError::InvalidResponse(format!(
            "expected searchset Bundle, got {} ({})",
            bundle.resource_type,
            bundle.bundle_type.as_deref().unwrap_or("no type")
        )));
    }

    Ok(bundle
        .entry
        .into_iter()
        .filter_map(|entry| entry.resource)
        .filter_map(|resource| {
            let effective = resource
                .effective_date_time
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            resource.id.map(|id| ObservationReference { id, effective })
        })
        .collect())
}
