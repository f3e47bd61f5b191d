//! Sample classification
//!
//! Buckets an unordered collection of samples by kind. Samples whose kind has
//! no coding-table entry are dropped so that new platform kinds never break a
//! sync pass; they are simply not synced until the table learns about them.

use crate::types::{Sample, SampleKind, WaveformRecording};
use std::collections::BTreeMap;
use tracing::debug;

/// Samples bucketed by kind plus the recordings of the same batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedBatch {
    /// Samples per kind, each list ordered by timestamp. Iteration follows
    /// the declared kind order.
    pub scalars: BTreeMap<SampleKind, Vec<Sample>>,
    /// Recordings, unchanged
    pub waveforms: Vec<WaveformRecording>,
    /// Number of samples dropped for an unknown kind
    pub dropped: usize,
}

impl ClassifiedBatch {
    pub fn scalar_count(&self) -> usize {
        self.scalars.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.scalar_count() == 0 && self.waveforms.is_empty()
    }
}

/// Classifier for incoming sample batches
pub struct SampleClassifier;

impl SampleClassifier {
    /// Classify samples by kind. Has no side effects beyond debug logging.
    pub fn classify(samples: Vec<Sample>, waveforms: Vec<WaveformRecording>) -> ClassifiedBatch {
        let mut scalars: BTreeMap<SampleKind, Vec<Sample>> = BTreeMap::new();
        let mut dropped = 0;

        for sample in samples {
            match sample.known_kind() {
                Some(kind) => scalars.entry(kind).or_default().push(sample),
                None => {
                    debug!(kind = %sample.kind, "dropping sample of unknown kind");
                    dropped += 1;
                }
            }
        }

        // Ties on timestamp are broken by value so that order never depends
        // on how the source delivered the batch
        for bucket in scalars.values_mut() {
            bucket.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.value.total_cmp(&b.value))
            });
        }

        ClassifiedBatch {
            scalars,
            waveforms,
            dropped,
        }
    }
}
