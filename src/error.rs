//! Error types for heartlink
//!
//! Mapping problems are recovered locally by skipping the offending item, so
//! they only surface through logs. Everything else fails the sync pass and
//! leaves the watermark where it was.

use thiserror::Error;

/// Errors that can fail a sync pass
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Health source query failed: {0}")]
    Source(#[from] SourceError),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Failed to serialize {resource_type} resource: {source}")]
    Serialization {
        resource_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sync pass cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Local settings error: {0}")]
    State(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Errors raised at the platform health source boundary
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("health source unavailable: {0}")]
    Unavailable(String),

    #[error("access to {0} was denied")]
    Denied(String),

    #[error("unknown waveform recording: {0}")]
    UnknownRecording(String),
}

/// Outcome classification of a failed network exchange
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server rejected request with status {status}")]
    Rejected { status: u16, body: String },

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_builder() {
            TransportError::InvalidUrl(e.to_string())
        } else if e.is_decode() {
            TransportError::InvalidResponse(e.to_string())
        } else {
            TransportError::Connection(e.to_string())
        }
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(e: config::ConfigError) -> Self {
        SyncError::Config(e.to_string())
    }
}

impl From<crate::cancel::Cancelled> for SyncError {
    fn from(_: crate::cancel::Cancelled) -> Self {
        SyncError::Cancelled
    }
}

impl SyncError {
    /// Whether retrying the whole pass later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Source(_) | SyncError::Transport(_) | SyncError::Cancelled
        )
    }
}
