//! Transport to the remote clinical store
//!
//! Serializes a transaction bundle, POSTs it to the store's base endpoint and
//! classifies the outcome. Only a 2xx response counts as success; any other
//! status is logged with the response body and reported as a failure.

use crate::error::{SyncError, TransportError};
use crate::fhir::Bundle;
use crate::{PRODUCER_NAME, VERSION};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Content type for clinical resources
pub const FHIR_JSON: &str = "application/fhir+json";

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Successful exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReceipt {
    pub status: u16,
    pub body: String,
}

/// Trait for bundle transports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a serialized transaction bundle
    async fn send(&self, payload: Vec<u8>) -> Result<TransportReceipt, TransportError>;
}

/// Serialize a bundle. On failure the offending entry's resource type is
/// reported so that mapper bugs can be traced.
pub fn encode_bundle(bundle: &Bundle) -> Result<Vec<u8>, SyncError> {
    serde_json::to_vec(bundle).map_err(|source| {
        let resource_type = bundle
            .entry
            .iter()
            .find(|e| serde_json::to_vec(&e.resource).is_err())
            .map(|e| e.resource.resource_type())
            .unwrap_or("Bundle")
            .to_string();
        error!(resource_type = %resource_type, error = %source, "failed to serialize bundle");
        SyncError::Serialization {
            resource_type,
            source,
        }
    })
}

/// HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/{}", PRODUCER_NAME, VERSION))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// POST a questionnaire response payload. The payload is produced by the
    /// questionnaire subsystem and passed through untouched.
    pub async fn upload_questionnaire_response(
        &self,
        response: &serde_json::Value,
    ) -> Result<TransportReceipt, TransportError> {
        let url = format!("{}/QuestionnaireResponse", self.base_url);
        let body = serde_json::to_vec(response)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        self.post(&url, "application/json", body).await
    }

    async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<TransportReceipt, TransportError> {
        debug!(url, bytes = body.len(), "posting payload");

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::ACCEPT, FHIR_JSON)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(status = status.as_u16(), error = %e, "failed to read response body");
                String::new()
            }
        };

        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "server rejected request");
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(status = status.as_u16(), "server accepted request");
        Ok(TransportReceipt {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: Vec<u8>) -> Result<TransportReceipt, TransportError> {
        self.post(&self.base_url, FHIR_JSON, payload).await
    }
}
