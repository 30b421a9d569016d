//! Dedup & aggregation store
//!
//! Holds everything derived from the uplink for the lifetime of the
//! process: which arrivals were already processed, the detection records,
//! hourly detection counts and the most recent image key.

use chrono::{DateTime, Utc};
use oceanwatch_shared::FrameMetadata;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Format of dedup keys and image file stems
pub const DEDUP_KEY_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Dedup key for an arrival time, at one-second resolution
pub fn dedup_key(arrived: DateTime<Utc>) -> String {
    arrived.format(DEDUP_KEY_FORMAT).to_string()
}

/// Round to the nearest hour; half past rounds up
pub fn round_to_hour(time: DateTime<Utc>) -> DateTime<Utc> {
    let secs = time.timestamp();
    let into_hour = secs.rem_euclid(3600);
    let floor = secs - into_hour;
    let rounded = if into_hour >= 1800 { floor + 3600 } else { floor };
    DateTime::from_timestamp(rounded, 0).unwrap_or(time)
}

/// One processed detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    /// Dedup key, also the image file stem
    pub key: String,
    pub arrived: DateTime<Utc>,
    pub cluster_count: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub capture_label: String,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Marker size for the map
    pub size: u32,
}

impl DetectionRecord {
    pub fn new(key: String, arrived: DateTime<Utc>, metadata: FrameMetadata) -> Self {
        Self {
            key,
            arrived,
            cluster_count: metadata.cluster_count,
            latitude: metadata.latitude,
            longitude: metadata.longitude,
            capture_label: metadata.capture_label,
            temperature: metadata.temperature,
            humidity: metadata.humidity,
            pressure: metadata.pressure,
            pitch: metadata.pitch,
            roll: metadata.roll,
            yaw: metadata.yaw,
            sequence: metadata.sequence,
            size: metadata.cluster_count.saturating_add(1),
        }
    }
}

/// Detections in one hour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourlyBucket {
    pub hour: DateTime<Utc>,
    pub count: u64,
}

#[derive(Debug, Default)]
pub struct DetectionStore {
    processed: HashSet<String>,
    records: Vec<DetectionRecord>,
    hourly: BTreeMap<DateTime<Utc>, u64>,
    most_recent: Option<String>,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.processed.contains(key)
    }

    /// Mark an arrival processed and count it in its hour
    ///
    /// Returns false if the key was already processed, in which case
    /// nothing changes.
    pub fn admit(&mut self, key: &str, arrived: DateTime<Utc>, metadata: Option<FrameMetadata>) -> bool {
        if !self.processed.insert(key.to_string()) {
            return false;
        }
        if let Some(metadata) = metadata {
            self.records
                .push(DetectionRecord::new(key.to_string(), arrived, metadata));
        }
        *self.hourly.entry(round_to_hour(arrived)).or_insert(0) += 1;
        true
    }

    /// Point "most recent" at `key`, processed or not
    pub fn touch(&mut self, key: &str) {
        self.most_recent = Some(key.to_string());
    }

    pub fn records(&self) -> &[DetectionRecord] {
        &self.records
    }

    #[cfg(test)]
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Hourly counts, oldest first
    pub fn hourly(&self) -> Vec<HourlyBucket> {
        self.hourly
            .iter()
            .map(|(&hour, &count)| HourlyBucket { hour, count })
            .collect()
    }

    pub fn most_recent(&self) -> Option<&str> {
        self.most_recent.as_deref()
    }
}
