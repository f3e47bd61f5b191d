//! Local settings persistence
//!
//! Two scalar entries survive between runs: the patient identifier and the
//! last-synchronized watermark. An absent watermark means "never synced".

use crate::error::SyncError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Persisted key/value settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl LocalSettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Trait for local settings storage
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<LocalSettings, SyncError>;

    async fn save(&self, settings: &LocalSettings) -> Result<(), SyncError>;

    async fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        Ok(self.load().await?.last_synced_at)
    }

    async fn set_last_synced_at(&self, instant: DateTime<Utc>) -> Result<(), SyncError> {
        let mut settings = self.load().await?;
        settings.last_synced_at = Some(instant);
        self.save(&settings).await
    }

    async fn patient_id(&self) -> Result<Option<String>, SyncError> {
        Ok(self.load().await?.patient_id)
    }

    async fn set_patient_id(&self, patient_id: &str) -> Result<(), SyncError> {
        let mut settings = self.load().await?;
        settings.patient_id = Some(patient_id.to_string());
        self.save(&settings).await
    }
}

/// JSON file store. Writes go to a sibling temp file and are renamed into
/// place so a crash never leaves a half-written watermark.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self) -> Result<LocalSettings, SyncError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(LocalSettings::default()),
            Ok(raw) => LocalSettings::from_json(&raw).map_err(|e| {
                SyncError::State(format!("corrupt settings file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalSettings::default()),
            Err(e) => Err(SyncError::State(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn save(&self, settings: &LocalSettings) -> Result<(), SyncError> {
        let json = settings.to_json()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::State(format!("failed to create {}: {}", parent.display(), e)))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| SyncError::State(format!("failed to write {}: {}", temp.display(), e)))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| SyncError::State(format!("failed to replace {}: {}", self.path.display(), e)))
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<LocalSettings>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: LocalSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<LocalSettings, SyncError> {
        Ok(self.settings.lock().await.clone())
    }

    async fn save(&self, settings: &LocalSettings) -> Result<(), SyncError> {
        *self.settings.lock().await = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-15T08:00:00.123Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_absent_file_means_never_synced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("state.json"));

        assert_eq!(store.last_synced_at().await.unwrap(), None);
        assert_eq!(store.patient_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_round_trip_keeps_both_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("nested").join("state.json"));

        store.set_patient_id("patient-1").await.unwrap();
        store.set_last_synced_at(instant()).await.unwrap();

        let reopened = FileSettingsStore::new(store.path().to_path_buf());
        assert_eq!(reopened.last_synced_at().await.unwrap(), Some(instant()));
        assert_eq!(
            reopened.patient_id().await.unwrap().as_deref(),
            Some("patient-1")
        );
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileSettingsStore::new(path);
        assert!(matches!(store.load().await, Err(SyncError::State(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySettingsStore::new();
        store.set_last_synced_at(instant()).await.unwrap();
        assert_eq!(store.last_synced_at().await.unwrap(), Some(instant()));
    }
}
