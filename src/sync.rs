//! Sync watermark controller
//!
//! One pass walks `Idle → Fetching → Filtering → Uploading → {Confirmed, Failed}`.
//! The persisted watermark is read once at the start of a pass and written at
//! most once, after the store confirmed the whole bundle. Passes are
//! serialized: a trigger while one is in flight is coalesced.

use crate::bundle::BundleBuilder;
use crate::cancel::CancelToken;
use crate::classifier::{ClassifiedBatch, SampleClassifier};
use crate::digitizer::EcgDigitizer;
use crate::error::SyncError;
use crate::fhir::Bundle;
use crate::settings_store::SettingsStore;
use crate::source::HealthSource;
use crate::transport::{encode_bundle, Transport};
use crate::types::{Sample, SampleKind, TimeRange, WaveformRecording};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Default number of recordings digitized concurrently
pub const DEFAULT_DIGITIZE_CONCURRENCY: usize = 4;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Fetching,
    Filtering,
    Uploading,
    Confirmed,
    Failed,
}

/// Snapshot published to observers after every transition
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Result of a completed pass
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The store accepted the bundle and the watermark moved
    Uploaded {
        observations: usize,
        watermark: DateTime<Utc>,
    },
    /// Nothing new since the watermark; no network activity
    NothingToSend,
    /// Another pass was already in flight
    Coalesced,
}

/// Keep only what lies strictly after the watermark and classify it
pub fn select_new(
    samples: Vec<Sample>,
    waveforms: Vec<WaveformRecording>,
    watermark: Option<DateTime<Utc>>,
) -> ClassifiedBatch {
    let is_new = |instant: DateTime<Utc>| watermark.map_or(true, |w| instant > w);

    let samples: Vec<Sample> = samples.into_iter().filter(|s| is_new(s.timestamp)).collect();
    let waveforms: Vec<WaveformRecording> = waveforms
        .into_iter()
        .filter(|w| is_new(w.start_time))
        .collect();

    SampleClassifier::classify(samples, waveforms)
}

/// Drives sync passes for one patient
pub struct SyncController {
    source: Arc<dyn HealthSource>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SettingsStore>,
    builder: BundleBuilder,
    digitize_concurrency: usize,
    in_flight: Mutex<()>,
    status: watch::Sender<SyncStatus>,
}

impl SyncController {
    pub fn new(
        source: Arc<dyn HealthSource>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SettingsStore>,
        builder: BundleBuilder,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            source,
            transport,
            store,
            builder,
            digitize_concurrency: DEFAULT_DIGITIZE_CONCURRENCY,
            in_flight: Mutex::new(()),
            status,
        }
    }

    pub fn with_digitize_concurrency(mut self, concurrency: usize) -> Self {
        self.digitize_concurrency = concurrency.max(1);
        self
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status transition
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Pull pass: query the source for `(watermark, now]` and upload it
    pub async fn sync(&self, cancel: &CancelToken) -> Result<SyncOutcome, SyncError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            info!("sync pass already in flight, coalescing trigger");
            return Ok(SyncOutcome::Coalesced);
        };

        let span = info_span!("sync_pass", pass_id = %Uuid::new_v4(), mode = "pull");
        self.record(self.pull_pass(cancel)).instrument(span).await
    }

    /// Push pass over a batch delivered by the platform
    pub async fn sync_batch(
        &self,
        samples: Vec<Sample>,
        waveforms: Vec<WaveformRecording>,
        cancel: &CancelToken,
    ) -> Result<SyncOutcome, SyncError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            info!("sync pass already in flight, coalescing trigger");
            return Ok(SyncOutcome::Coalesced);
        };

        let span = info_span!("sync_pass", pass_id = %Uuid::new_v4(), mode = "push");
        self.record(self.push_pass(samples, waveforms, cancel))
            .instrument(span)
            .await
    }

    /// Build the bundle the next pull pass would send, without uploading it
    /// or touching the watermark
    pub async fn preview(&self, cancel: &CancelToken) -> Result<Option<Bundle>, SyncError> {
        let span = info_span!("sync_pass", pass_id = %Uuid::new_v4(), mode = "preview");
        self.preview_pass(cancel).instrument(span).await
    }

    /// Run a pull pass on a fixed cadence until cancelled. The first pass
    /// starts immediately; failures are logged and retried at the next tick.
    ///
    /// A zero interval is rejected with [`SyncError::Config`].
    pub async fn run_periodic(
        &self,
        interval: Duration,
        cancel: &CancelToken,
    ) -> Result<(), SyncError> {
        if interval.is_zero() {
            return Err(SyncError::Config(
                "sync interval must be positive".to_string(),
            ));
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sync(cancel).await {
                Ok(outcome) => debug!(?outcome, "periodic sync pass finished"),
                Err(SyncError::Cancelled) => break,
                Err(e) => error!(error = %e, "periodic sync pass failed, retrying next interval"),
            }
        }

        info!("periodic sync stopped");
        Ok(())
    }

    async fn pull_pass(&self, cancel: &CancelToken) -> Result<SyncOutcome, SyncError> {
        let captured = Utc::now();
        let watermark = self.begin(cancel).await?;
        let (samples, waveforms) = self.fetch(watermark, captured, cancel).await?;
        self.upload_new(samples, waveforms, watermark, captured, cancel)
            .await
    }

    async fn preview_pass(&self, cancel: &CancelToken) -> Result<Option<Bundle>, SyncError> {
        let captured = Utc::now();
        let watermark = cancel.run(self.store.last_synced_at()).await??;
        let (samples, waveforms) = self.fetch(watermark, captured, cancel).await?;
        let batch = select_new(samples, waveforms, watermark);
        if batch.is_empty() {
            return Ok(None);
        }
        self.prepare(batch, cancel).await
    }

    async fn push_pass(
        &self,
        samples: Vec<Sample>,
        waveforms: Vec<WaveformRecording>,
        cancel: &CancelToken,
    ) -> Result<SyncOutcome, SyncError> {
        let captured = Utc::now();
        let watermark = self.begin(cancel).await?;
        self.upload_new(samples, waveforms, watermark, captured, cancel)
            .await
    }

    /// Enter `Fetching` and read the watermark
    async fn begin(&self, cancel: &CancelToken) -> Result<Option<DateTime<Utc>>, SyncError> {
        self.transition(SyncState::Fetching);
        let watermark = cancel.run(self.store.last_synced_at()).await??;
        self.status.send_modify(|s| s.last_synced_at = watermark);
        debug!(watermark = ?watermark, "read watermark");
        Ok(watermark)
    }

    async fn fetch(
        &self,
        watermark: Option<DateTime<Utc>>,
        captured: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<(Vec<Sample>, Vec<WaveformRecording>), SyncError> {
        let range = TimeRange::new(watermark.unwrap_or(DateTime::<Utc>::MIN_UTC), captured);

        let mut samples = Vec::new();
        for kind in SampleKind::ALL {
            samples.extend(cancel.run(self.source.query_samples(kind, range)).await??);
        }
        let waveforms = cancel.run(self.source.query_waveforms(range)).await??;

        debug!(
            samples = samples.len(),
            waveforms = waveforms.len(),
            "fetched from health source"
        );
        Ok((samples, waveforms))
    }

    /// Digitize the batch's recordings and assemble the bundle
    async fn prepare(
        &self,
        mut batch: ClassifiedBatch,
        cancel: &CancelToken,
    ) -> Result<Option<Bundle>, SyncError> {
        let recordings = std::mem::take(&mut batch.waveforms);
        let digitized = EcgDigitizer::digitize_all(
            self.source.as_ref(),
            recordings,
            self.digitize_concurrency,
            cancel,
        )
        .await?;

        Ok(self.builder.build(&batch, &digitized))
    }

    async fn upload_new(
        &self,
        samples: Vec<Sample>,
        waveforms: Vec<WaveformRecording>,
        watermark: Option<DateTime<Utc>>,
        captured: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<SyncOutcome, SyncError> {
        self.transition(SyncState::Filtering);
        let batch = select_new(samples, waveforms, watermark);
        if batch.dropped > 0 {
            debug!(dropped = batch.dropped, "dropped samples of unknown kind");
        }

        if batch.is_empty() {
            info!("nothing new since watermark");
            self.confirm_empty();
            return Ok(SyncOutcome::NothingToSend);
        }

        let Some(bundle) = self.prepare(batch, cancel).await? else {
            info!("no mappable observations in batch");
            self.confirm_empty();
            return Ok(SyncOutcome::NothingToSend);
        };

        self.transition(SyncState::Uploading);
        let observations = bundle.observation_count();
        let payload = encode_bundle(&bundle)?;
        let receipt = cancel.run(self.transport.send(payload)).await??;

        // The pass captured `now` before fetching, so late samples stamped
        // after that instant are picked up by the next pass.
        let advanced = watermark.map_or(captured, |old| old.max(captured));
        self.store.set_last_synced_at(advanced).await?;

        self.status.send_modify(|s| {
            s.state = SyncState::Confirmed;
            s.last_synced_at = Some(advanced);
            s.last_error = None;
        });
        info!(
            observations,
            status = receipt.status,
            watermark = %advanced,
            "sync pass confirmed"
        );

        Ok(SyncOutcome::Uploaded {
            observations,
            watermark: advanced,
        })
    }

    async fn record<F>(&self, pass: F) -> Result<SyncOutcome, SyncError>
    where
        F: Future<Output = Result<SyncOutcome, SyncError>>,
    {
        let result = pass.await;
        if let Err(e) = &result {
            error!(error = %e, retryable = e.is_retryable(), "sync pass failed");
            self.status.send_modify(|s| {
                s.state = SyncState::Failed;
                s.last_error = Some(e.to_string());
            });
        }
        result
    }

    fn transition(&self, state: SyncState) {
        debug!(?state, "sync state");
        self.status.send_modify(|s| s.state = state);
    }

    /// A pass with nothing to upload still succeeded, so any earlier error is stale
    fn confirm_empty(&self) {
        debug!(state = ?SyncState::Confirmed, "sync state");
        self.status.send_modify(|s| {
            s.state = SyncState::Confirmed;
            s.last_error = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SourceError, TransportError};
    use crate::settings_store::{LocalSettings, MemorySettingsStore};
    use crate::source::MemorySource;
    use crate::transport::TransportReceipt;
    use crate::types::{EcgClassification, Gender, PatientIdentity, WaveformPoint};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingTransport {
        payloads: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<serde_json::Value> {
            self.payloads
                .lock()
                .unwrap()
                .iter()
                .map(|p| serde_json::from_slice(p).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, payload: Vec<u8>) -> Result<TransportReceipt, TransportError> {
            self.payloads.lock().unwrap().push(payload);
            Ok(TransportReceipt {
                status: 200,
                body: String::new(),
            })
        }
    }

    struct RejectingTransport;

    #[async_trait]
    impl Transport for RejectingTransport {
        async fn send(&self, _payload: Vec<u8>) -> Result<TransportReceipt, TransportError> {
            Err(TransportError::Rejected {
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    /// Signals when a send starts and answers only once released
    #[derive(Default)]
    struct GatedTransport {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn send(&self, _payload: Vec<u8>) -> Result<TransportReceipt, TransportError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(TransportReceipt {
                status: 201,
                body: String::new(),
            })
        }
    }

    struct UnavailableSource;

    #[async_trait]
    impl HealthSource for UnavailableSource {
        async fn query_samples(
            &self,
            _kind: SampleKind,
            _range: TimeRange,
        ) -> Result<Vec<Sample>, SourceError> {
            Err(SourceError::Denied("heart_rate".to_string()))
        }

        async fn query_waveforms(
            &self,
            _range: TimeRange,
        ) -> Result<Vec<WaveformRecording>, SourceError> {
            Ok(vec![])
        }

        async fn query_waveform_points(
            &self,
            recording_id: &str,
        ) -> Result<Vec<WaveformPoint>, SourceError> {
            Err(SourceError::UnknownRecording(recording_id.to_string()))
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-15T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn patient() -> PatientIdentity {
        PatientIdentity {
            id: "patient-1".to_string(),
            given: vec!["Ada".to_string()],
            family: "Lovelace".to_string(),
            gender: Gender::Female,
            birth_date: None,
        }
    }

    fn recording(id: &str, start: DateTime<Utc>) -> WaveformRecording {
        WaveformRecording {
            id: id.to_string(),
            start_time: start,
            classification: EcgClassification::SinusRhythm,
            average_heart_rate: Some(64.0),
            sampling_frequency_hz: Some(512.0),
        }
    }

    fn source() -> MemorySource {
        MemorySource::new()
            .with_samples(vec![
                Sample::new(SampleKind::HeartRate, 72.0, t0()),
                Sample::new(SampleKind::StepCount, 120.0, t0() + ChronoDuration::minutes(1)),
            ])
            .with_recording(
                recording("ecg-1", t0() + ChronoDuration::minutes(2)),
                vec![
                    WaveformPoint::new(0.0, 1.0),
                    WaveformPoint::new(0.5, 2.0),
                    WaveformPoint::new(1.0, 1.0),
                ],
            )
    }

    fn controller(
        source: impl HealthSource + 'static,
        transport: Arc<dyn Transport>,
        store: Arc<MemorySettingsStore>,
    ) -> SyncController {
        SyncController::new(Arc::new(source), transport, store, BundleBuilder::new(patient()))
    }

    fn store_at(watermark: Option<DateTime<Utc>>) -> Arc<MemorySettingsStore> {
        Arc::new(MemorySettingsStore::with_settings(LocalSettings {
            patient_id: None,
            last_synced_at: watermark,
        }))
    }

    #[test]
    fn test_select_new_is_strict() {
        let samples = vec![
            Sample::new(SampleKind::HeartRate, 70.0, t0()),
            Sample::new(SampleKind::HeartRate, 71.0, t0() + ChronoDuration::seconds(1)),
        ];
        let waveforms = vec![recording("at", t0()), recording("after", t0() + ChronoDuration::seconds(1))];

        let batch = select_new(samples, waveforms, Some(t0()));

        assert_eq!(batch.scalar_count(), 1);
        assert_eq!(batch.scalars[&SampleKind::HeartRate][0].value, 71.0);
        assert_eq!(batch.waveforms.len(), 1);
        assert_eq!(batch.waveforms[0].id, "after");
    }

    #[test]
    fn test_select_new_without_watermark_keeps_everything() {
        let samples = vec![Sample::new(SampleKind::HeartRate, 70.0, DateTime::<Utc>::MIN_UTC + ChronoDuration::seconds(1))];
        assert_eq!(select_new(samples, vec![], None).scalar_count(), 1);
    }

    #[tokio::test]
    async fn test_first_pass_uploads_and_advances_watermark() {
        let transport = Arc::new(RecordingTransport::default());
        let store = store_at(None);
        let controller = controller(source(), transport.clone(), store.clone());

        let outcome = controller.sync(&CancelToken::new()).await.unwrap();

        let watermark = store.last_synced_at().await.unwrap().unwrap();
        assert!(watermark > t0());
        assert_eq!(
            outcome,
            SyncOutcome::Uploaded {
                observations: 3,
                watermark
            }
        );

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let entries = sent[0]["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0]["request"]["method"], "PUT");
        assert_eq!(entries[3]["resource"]["code"]["coding"][0]["code"], "131328-4");

        let status = controller.status();
        assert_eq!(status.state, SyncState::Confirmed);
        assert_eq!(status.last_synced_at, Some(watermark));
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn test_second_pass_resends_nothing() {
        let transport = Arc::new(RecordingTransport::default());
        let store = store_at(None);
        let controller = controller(source(), transport.clone(), store.clone());
        let cancel = CancelToken::new();

        controller.sync(&cancel).await.unwrap();
        let watermark = store.last_synced_at().await.unwrap();

        assert_eq!(controller.sync(&cancel).await.unwrap(), SyncOutcome::NothingToSend);
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(store.last_synced_at().await.unwrap(), watermark);
    }

    #[tokio::test]
    async fn test_sample_at_watermark_is_not_resent() {
        let transport = Arc::new(RecordingTransport::default());
        let store = store_at(Some(t0()));
        let controller = controller(source(), transport.clone(), store);

        let outcome = controller.sync(&CancelToken::new()).await.unwrap();

        // Heart rate sits exactly on the watermark; steps and the ECG are newer
        assert!(matches!(outcome, SyncOutcome::Uploaded { observations: 2, .. }));
        let codes: Vec<String> = transport.sent()[0]["entry"]
            .as_array()
            .unwrap()
            .iter()
            .skip(1)
            .map(|e| e["resource"]["code"]["coding"][0]["code"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(codes, vec!["41950-7", "131328-4"]);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_network_call() {
        let transport = Arc::new(RecordingTransport::default());
        let store = store_at(None);
        let controller = controller(MemorySource::new(), transport.clone(), store.clone());

        let outcome = controller.sync(&CancelToken::new()).await.unwrap();

        assert_eq!(outcome, SyncOutcome::NothingToSend);
        assert!(transport.sent().is_empty());
        assert_eq!(store.last_synced_at().await.unwrap(), None);
        assert_eq!(controller.status().state, SyncState::Confirmed);
    }

    #[tokio::test]
    async fn test_rejected_upload_keeps_watermark() {
        let store = store_at(Some(t0() - ChronoDuration::days(1)));
        let controller = controller(source(), Arc::new(RejectingTransport), store.clone());

        let result = controller.sync(&CancelToken::new()).await;

        assert!(matches!(
            result,
            Err(SyncError::Transport(TransportError::Rejected { status: 500, .. }))
        ));
        assert_eq!(
            store.last_synced_at().await.unwrap(),
            Some(t0() - ChronoDuration::days(1))
        );
        let status = controller.status();
        assert_eq!(status.state, SyncState::Failed);
        assert!(status.last_error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_empty_pass_clears_previous_error() {
        let controller = controller(source(), Arc::new(RejectingTransport), store_at(None));
        let cancel = CancelToken::new();

        assert!(controller.sync(&cancel).await.is_err());
        assert!(controller.status().last_error.is_some());

        let outcome = controller.sync_batch(vec![], vec![], &cancel).await.unwrap();

        assert_eq!(outcome, SyncOutcome::NothingToSend);
        let status = controller.status();
        assert_eq!(status.state, SyncState::Confirmed);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn test_source_error_fails_before_network() {
        let transport = Arc::new(RecordingTransport::default());
        let store = store_at(None);
        let controller = controller(UnavailableSource, transport.clone(), store.clone());

        let result = controller.sync(&CancelToken::new()).await;

        assert!(matches!(result, Err(SyncError::Source(SourceError::Denied(_)))));
        assert!(transport.sent().is_empty());
        assert_eq!(store.last_synced_at().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_kinds_do_not_fail_the_pass() {
        let transport = Arc::new(RecordingTransport::default());
        let controller = controller(MemorySource::new(), transport.clone(), store_at(None));
        let unknown = Sample {
            kind: "HKQuantityTypeIdentifierMindfulMinutes".to_string(),
            value: 10.0,
            timestamp: t0(),
        };

        let outcome = controller
            .sync_batch(
                vec![unknown.clone(), Sample::new(SampleKind::HeartRate, 70.0, t0())],
                vec![],
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Uploaded { observations: 1, .. }));

        let outcome = controller
            .sync_batch(vec![unknown], vec![], &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::NothingToSend);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_watermark_never_moves_backwards() {
        let future = Utc::now() + ChronoDuration::days(365);
        let store = store_at(Some(future));
        let controller = controller(
            MemorySource::new(),
            Arc::new(RecordingTransport::default()),
            store.clone(),
        );

        let outcome = controller
            .sync_batch(
                vec![Sample::new(SampleKind::HeartRate, 70.0, future + ChronoDuration::hours(1))],
                vec![],
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SyncOutcome::Uploaded { .. }));
        assert_eq!(store.last_synced_at().await.unwrap(), Some(future));
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_coalesced() {
        let transport = Arc::new(GatedTransport::default());
        let controller = Arc::new(controller(source(), transport.clone(), store_at(None)));

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.sync(&CancelToken::new()).await }
        });
        transport.started.notified().await;

        let second = controller.sync(&CancelToken::new()).await.unwrap();
        assert_eq!(second, SyncOutcome::Coalesced);

        transport.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, SyncOutcome::Uploaded { .. }));
    }

    #[tokio::test]
    async fn test_cancel_during_upload_keeps_watermark() {
        let transport = Arc::new(GatedTransport::default());
        let store = store_at(None);
        let controller = Arc::new(controller(source(), transport.clone(), store.clone()));
        let cancel = CancelToken::new();

        let pass = tokio::spawn({
            let controller = controller.clone();
            let cancel = cancel.clone();
            async move { controller.sync(&cancel).await }
        });
        transport.started.notified().await;
        cancel.cancel();

        assert!(matches!(pass.await.unwrap(), Err(SyncError::Cancelled)));
        assert_eq!(store.last_synced_at().await.unwrap(), None);
        assert_eq!(controller.status().state, SyncState::Failed);
    }

    #[tokio::test]
    async fn test_preview_leaves_watermark_alone() {
        let transport = Arc::new(RecordingTransport::default());
        let store = store_at(None);
        let controller = controller(source(), transport.clone(), store.clone());

        let bundle = controller.preview(&CancelToken::new()).await.unwrap().unwrap();

        assert_eq!(bundle.observation_count(), 3);
        assert!(transport.sent().is_empty());
        assert_eq!(store.last_synced_at().await.unwrap(), None);
        assert_eq!(controller.status().state, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_run_periodic_rejects_zero_interval() {
        let transport = Arc::new(RecordingTransport::default());
        let controller = controller(source(), transport.clone(), store_at(None));

        let result = controller
            .run_periodic(Duration::ZERO, &CancelToken::new())
            .await;

        assert!(matches!(result, Err(SyncError::Config(_))));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_run_periodic_stops_on_cancel() {
        let transport = Arc::new(RecordingTransport::default());
        let controller = Arc::new(controller(source(), transport.clone(), store_at(None)));
        let cancel = CancelToken::new();
        let mut status = controller.subscribe();

        let worker = tokio::spawn({
            let controller = controller.clone();
            let cancel = cancel.clone();
            async move {
                controller
                    .run_periodic(Duration::from_secs(3600), &cancel)
                    .await
            }
        });

        status
            .wait_for(|s| s.state == SyncState::Confirmed)
            .await
            .unwrap();
        cancel.cancel();
        worker.await.unwrap().unwrap();

        assert_eq!(transport.sent().len(), 1);
    }
}
