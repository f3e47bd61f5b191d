//! Configuration
//!
//! Settings are an explicit value handed to the sync controller. They are
//! layered from an optional file and `HEARTLINK__*` environment variables,
//! e.g. `HEARTLINK__SERVER__BASE_URL=https://store.example/fhir`.

use crate::error::SyncError;
use crate::settings_store::SettingsStore;
use crate::types::{Gender, PatientIdentity};
use chrono::NaiveDate;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub patient: PatientSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Base endpoint of the clinical store; bundles are POSTed here
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attach `ifNoneExist` to observation entries
    #[serde(default = "default_true")]
    pub conditional_create: bool,
}

impl ServerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientSettings {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub given: Vec<String>,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
}

impl PatientSettings {
    /// Resolve the patient identity: configured id, else the id persisted in
    /// local settings, else one generated from demographics and persisted.
    pub async fn resolve(&self, store: &dyn SettingsStore) -> Result<PatientIdentity, SyncError> {
        let id = match self.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => match store.patient_id().await? {
                Some(id) => id,
                None => {
                    let id = PatientIdentity::generate_id(&self.given, &self.family, self.birth_date);
                    info!(patient_id = %id, "generated patient identifier");
                    store.set_patient_id(&id).await?;
                    id
                }
            },
        };

        Ok(PatientIdentity {
            id,
            given: self.given.clone(),
            family: self.family.clone(),
            gender: self.gender,
            birth_date: self.birth_date,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Local settings file holding the watermark and patient id
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Recordings digitized concurrently
    #[serde(default = "default_digitize_concurrency")]
    pub digitize_concurrency: usize,
    /// Cadence of periodic sync
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            digitize_concurrency: default_digitize_concurrency(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_state_path() -> PathBuf {
    PathBuf::from("heartlink-state.json")
}

fn default_digitize_concurrency() -> usize {
    4
}

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}

/// Load settings from an optional file plus the environment
pub fn load_settings(path: Option<&Path>) -> Result<Settings, SyncError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    let config = builder
        .add_source(
            Environment::with_prefix("HEARTLINK")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    fn validate(&self) -> Result<(), SyncError> {
        let url = self.server.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SyncError::Config(format!(
                "server.base_url must be an http(s) url, got {:?}",
                self.server.base_url
            )));
        }
        if self.server.timeout_secs == 0 {
            return Err(SyncError::Config("server.timeout_secs must be positive".to_string()));
        }
        if self.sync.interval_secs == 0 {
            return Err(SyncError::Config("sync.interval_secs must be positive".to_string()));
        }
        Ok(())
    }
}
