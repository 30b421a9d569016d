//! One pull: list, scan, dedup, persist, aggregate

use super::aggregate::{dedup_key, DetectionStore};
use super::scanner::Scanner;
use super::sink::ImageSink;
use crate::store::ObjectStore;
use anyhow::{Context, Result};
use oceanwatch_shared::FrameMetadata;
use tracing::{debug, info, warn};

/// What one pull found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub objects_listed: usize,
    pub frames_found: usize,
    pub new_detections: usize,
    pub duplicates: usize,
    /// Start tokens with too few metadata fields
    pub malformed_frames: usize,
    /// Open frames replaced by a later start token or cut off by the listing
    pub abandoned_frames: usize,
    pub corrupt_frames: usize,
    /// New frames whose metadata fields did not parse; the image is still kept
    pub invalid_metadata: usize,
    pub most_recent: Option<String>,
}

/// Owns the store handles and everything derived from them
pub struct Ingestor<S: ObjectStore, K: ImageSink> {
    store: S,
    sink: K,
    scanner: Scanner,
    detections: DetectionStore,
}

impl<S: ObjectStore, K: ImageSink> Ingestor<S, K> {
    pub fn new(store: S, sink: K) -> Self {
        Self {
            store,
            sink,
            scanner: Scanner::new(),
            detections: DetectionStore::new(),
        }
    }

    pub fn detections(&self) -> &DetectionStore {
        &self.detections
    }

    /// Run one full rescan of the store
    ///
    /// A listing failure aborts the pull before anything is processed.
    pub async fn pull(&mut self) -> Result<PullReport> {
        let objects = self
            .store
            .list_objects()
            .await
            .with_context(|| format!("Failed to list {}", self.store.name()))?;

        let outcome = self.scanner.scan(&objects);
        debug!("Scan #{} over {} objects", self.scanner.scans(), objects.len());
        let mut report = PullReport {
            objects_listed: objects.len(),
            frames_found: outcome.candidates.len(),
            malformed_frames: outcome.stats.malformed_frames,
            abandoned_frames: outcome.stats.abandoned_frames + usize::from(outcome.unterminated),
            corrupt_frames: outcome.stats.corrupt_chunks,
            ..Default::default()
        };

        for candidate in &outcome.candidates {
            let key = dedup_key(candidate.arrived);

            if self.detections.is_processed(&key) {
                report.duplicates += 1;
            } else {
                self.sink.save(&key, &candidate.payload).await?;

                let metadata = match FrameMetadata::from_fields(&candidate.fields) {
                    Ok(metadata) => Some(metadata),
                    Err(e) => {
                        warn!("Frame {} has unusable metadata: {}", key, e);
                        report.invalid_metadata += 1;
                        None
                    }
                };
                self.detections.admit(&key, candidate.arrived, metadata);
                report.new_detections += 1;
            }

            self.detections.touch(&key);
        }

        report.most_recent = self.detections.most_recent().map(str::to_owned);
        info!(
            "Pulled {} objects: {} frames, {} new, {} malformed",
            report.objects_listed, report.frames_found, report.new_detections, report.malformed_frames
        );
        Ok(report)
    }
}
