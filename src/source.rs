//! Platform health source boundary
//!
//! The platform supplies typed samples and ECG recordings for a time range,
//! and the voltage points of a recording on demand. Point retrieval can be
//! slow, so every method is async and callers wrap it in a cancel token.

use crate::error::{SourceError, SyncError};
use crate::types::{Sample, SampleKind, TimeRange, WaveformPoint, WaveformRecording};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::debug;

/// Trait for platform health sources
#[async_trait]
pub trait HealthSource: Send + Sync {
    /// Samples of one kind whose timestamp falls in `range`
    async fn query_samples(
        &self,
        kind: SampleKind,
        range: TimeRange,
    ) -> Result<Vec<Sample>, SourceError>;

    /// Recordings whose start time falls in `range`
    async fn query_waveforms(&self, range: TimeRange)
        -> Result<Vec<WaveformRecording>, SourceError>;

    /// All voltage points of one recording, ordered by time offset
    async fn query_waveform_points(
        &self,
        recording_id: &str,
    ) -> Result<Vec<WaveformPoint>, SourceError>;
}

/// Recording as it appears in an export, points inline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedWaveform {
    #[serde(flatten)]
    pub recording: WaveformRecording,
    #[serde(default)]
    pub points: Vec<WaveformPoint>,
}

/// Health data export document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthExport {
    #[serde(default)]
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub waveforms: Vec<ExportedWaveform>,
}

impl HealthExport {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// In-memory health source
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    samples: Vec<Sample>,
    recordings: Vec<WaveformRecording>,
    points: HashMap<String, Vec<WaveformPoint>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(mut self, samples: Vec<Sample>) -> Self {
        self.samples.extend(samples);
        self
    }

    pub fn with_recording(mut self, recording: WaveformRecording, points: Vec<WaveformPoint>) -> Self {
        self.points.insert(recording.id.clone(), points);
        self.recordings.push(recording);
        self
    }

    pub fn from_export(export: HealthExport) -> Self {
        export
            .waveforms
            .into_iter()
            .fold(Self::new().with_samples(export.samples), |source, w| {
                source.with_recording(w.recording, w.points)
            })
    }
}

#[async_trait]
impl HealthSource for MemorySource {
    async fn query_samples(
        &self,
        kind: SampleKind,
        range: TimeRange,
    ) -> Result<Vec<Sample>, SourceError> {
        Ok(self
            .samples
            .iter()
            .filter(|s| s.known_kind() == Some(kind) && range.contains(s.timestamp))
            .cloned()
            .collect())
    }

    async fn query_waveforms(
        &self,
        range: TimeRange,
    ) -> Result<Vec<WaveformRecording>, SourceError> {
        Ok(self
            .recordings
            .iter()
            .filter(|r| range.contains(r.start_time))
            .cloned()
            .collect())
    }

    async fn query_waveform_points(
        &self,
        recording_id: &str,
    ) -> Result<Vec<WaveformPoint>, SourceError> {
        self.points
            .get(recording_id)
            .cloned()
            .ok_or_else(|| SourceError::UnknownRecording(recording_id.to_string()))
    }
}

/// Source backed by an export file. The parsed export is cached and
/// re-read only when the file's modification time or length changes, so a
/// long-running process picks up new exports without restarting.
#[derive(Debug, Clone)]
pub struct ExportFileSource {
    path: PathBuf,
    cache: Arc<Mutex<Option<CachedExport>>>,
}

#[derive(Debug)]
struct CachedExport {
    modified: SystemTime,
    len: u64,
    source: Arc<MemorySource>,
}

impl ExportFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The export as an in-memory source, parsed at most once per file version
    pub async fn load(&self) -> Result<Arc<MemorySource>, SourceError> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| self.unavailable(e))?;
        let modified = metadata.modified().map_err(|e| self.unavailable(e))?;
        let len = metadata.len();

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.modified == modified && cached.len == len {
                return Ok(cached.source.clone());
            }
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.unavailable(e))?;
        let export = HealthExport::from_json(&raw).map_err(|e| self.unavailable(e))?;
        let source = Arc::new(MemorySource::from_export(export));
        debug!(path = %self.path.display(), len, "loaded export file");

        *cache = Some(CachedExport {
            modified,
            len,
            source: source.clone(),
        });
        Ok(source)
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> SourceError {
        SourceError::Unavailable(format!("{}: {}", self.path.display(), e))
    }
}

#[async_trait]
impl HealthSource for ExportFileSource {
    async fn query_samples(
        &self,
        kind: SampleKind,
        range: TimeRange,
    ) -> Result<Vec<Sample>, SourceError> {
        self.load().await?.query_samples(kind, range).await
    }

    async fn query_waveforms(
        &self,
        range: TimeRange,
    ) -> Result<Vec<WaveformRecording>, SourceError> {
        self.load().await?.query_waveforms(range).await
    }

    async fn query_waveform_points(
        &self,
        recording_id: &str,
    ) -> Result<Vec<WaveformPoint>, SourceError> {
        self.load().await?.query_waveform_points(recording_id).await
    }
}

/// Load an export file synchronously (CLI helper)
pub fn read_export(path: &Path) -> Result<HealthExport, SyncError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SourceError::Unavailable(format!("{}: {}", path.display(), e)))?;
    Ok(HealthExport::from_json(&raw)?)
}
