//! ECG waveform digitization
//!
//! Turns the irregularly timestamped voltage series of a recording into a
//! [`SampledData`] value:
//! - period from the mean of successive time deltas (never a nominal rate)
//! - origin, lower and upper limits from the voltages
//! - voltages formatted to 3 decimals, space separated, in recorded order

use crate::cancel::CancelToken;
use crate::error::SyncError;
use crate::source::HealthSource;
use crate::types::{DigitizedRecording, SampledData, WaveformPoint, WaveformRecording};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

/// Minimum number of points needed to compute a period
pub const MIN_POINTS: usize = 2;

/// Digitizer for ECG recordings
pub struct EcgDigitizer;

impl EcgDigitizer {
    /// Digitize a point series. Returns `None` when the series cannot be
    /// encoded: fewer than two points, non-increasing offsets or non-finite
    /// values.
    pub fn digitize(points: &[WaveformPoint]) -> Option<SampledData> {
        if points.len() < MIN_POINTS {
            return None;
        }

        if points
            .iter()
            .any(|p| !p.time_offset_seconds.is_finite() || !p.microvolts.is_finite())
        {
            return None;
        }

        let deltas: Vec<f64> = points
            .windows(2)
            .map(|w| w[1].time_offset_seconds - w[0].time_offset_seconds)
            .collect();
        if deltas.iter().any(|d| *d <= 0.0) {
            return None;
        }

        let mean_delta = deltas.iter().sum::<f64>() / deltas.len() as f64;

        let lower_limit = points
            .iter()
            .map(|p| p.microvolts)
            .fold(f64::INFINITY, f64::min);
        let upper_limit = points
            .iter()
            .map(|p| p.microvolts)
            .fold(f64::NEG_INFINITY, f64::max);

        let data = points
            .iter()
            .map(|p| format!("{:.3}", p.microvolts))
            .collect::<Vec<_>>()
            .join(" ");

        Some(SampledData {
            origin_value: points[0].microvolts,
            period_milliseconds: mean_delta * 1000.0,
            lower_limit,
            upper_limit,
            dimensions: 1,
            data,
        })
    }

    /// Fetch the points of one recording and digitize them.
    ///
    /// Undigestable recordings yield `Ok(None)`; source failures and
    /// cancellation fail the call.
    pub async fn digitize_recording(
        source: &dyn HealthSource,
        recording: &WaveformRecording,
        cancel: &CancelToken,
    ) -> Result<Option<SampledData>, SyncError> {
        let points = cancel
            .run(source.query_waveform_points(&recording.id))
            .await??;

        let sampled = Self::digitize(&points);
        match &sampled {
            Some(s) => debug!(
                recording = %recording.id,
                points = points.len(),
                period_ms = s.period_milliseconds,
                "digitized recording"
            ),
            None => warn!(
                recording = %recording.id,
                points = points.len(),
                "skipping recording that cannot be digitized"
            ),
        }
        Ok(sampled)
    }

    /// Digitize independent recordings with up to `concurrency` point fetches
    /// in flight. The result is ordered by recording start time, then id.
    pub async fn digitize_all(
        source: &dyn HealthSource,
        recordings: Vec<WaveformRecording>,
        concurrency: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<DigitizedRecording>, SyncError> {
        let digitized: Vec<Option<DigitizedRecording>> = stream::iter(recordings)
            .map(|recording| async move {
                let sampled = Self::digitize_recording(source, &recording, cancel).await?;
                Ok::<_, SyncError>(sampled.map(|sampled| DigitizedRecording { recording, sampled }))
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;

        let mut digitized: Vec<DigitizedRecording> = digitized.into_iter().flatten().collect();
        digitized.sort_by(|a, b| {
            (a.recording.start_time, &a.recording.id).cmp(&(b.recording.start_time, &b.recording.id))
        });
        Ok(digitized)
    }
}
