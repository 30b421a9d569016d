//! JSON snapshot of the aggregated detections for the dashboard

use super::aggregate::{DetectionRecord, DetectionStore, HourlyBucket};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize)]
pub struct Snapshot<'a> {
    pub generated_at: DateTime<Utc>,
    pub most_recent: Option<&'a str>,
    pub records: &'a [DetectionRecord],
    pub hourly: Vec<HourlyBucket>,
}

impl<'a> Snapshot<'a> {
    pub fn of(store: &'a DetectionStore, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            most_recent: store.most_recent(),
            records: store.records(),
            hourly: store.hourly(),
        }
    }
}

/// Write the snapshot next to `path` and move it into place
pub async fn write_snapshot(path: &Path, store: &DetectionStore) -> Result<()> {
    let json = serde_json::to_vec_pretty(&Snapshot::of(store, Utc::now()))
        .context("Failed to serialize snapshot")?;

    let staging = path.with_extension("json.tmp");
    fs::write(&staging, json)
        .await
        .with_context(|| format!("Failed to write {}", staging.display()))?;
    fs::rename(&staging, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use oceanwatch_shared::FrameMetadata;

    #[test]
    fn test_snapshot_shape() {
        let arrived = Utc.with_ymd_and_hms(2021, 5, 19, 10, 15, 30).unwrap();
        let mut store = DetectionStore::new();
        store.admit(
            "2021-05-19-10-15-30",
            arrived,
            Some(FrameMetadata {
                latitude: 53.5,
                longitude: -20.0,
                cluster_count: 2,
                capture_label: "10-15-20_19-05-21".into(),
                temperature: 11.0,
                humidity: 90.0,
                pressure: 998.0,
                pitch: 0.0,
                roll: 0.0,
                yaw: 0.0,
                sequence: Some(7),
            }),
        );
        store.touch("2021-05-19-10-15-30");

        let value = serde_json::to_value(Snapshot::of(&store, arrived)).expect("serialize");
        assert_eq!(value["most_recent"], "2021-05-19-10-15-30");
        assert_eq!(value["records"][0]["size"], 3);
        assert_eq!(value["records"][0]["sequence"], 7);
        assert_eq!(value["hourly"][0]["hour"], "2021-05-19T10:00:00Z");
        assert_eq!(value["hourly"][0]["count"], 1);
    }

    #[tokio::test]
    async fn test_write_snapshot_replaces_file() {
        let path = std::env::temp_dir().join(format!("oceanwatch-snapshot-{}.json", std::process::id()));
        let store = DetectionStore::new();
        write_snapshot(&path, &store).await.expect("write");

        let text = std::fs::read_to_string(&path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert!(value["records"].as_array().expect("array").is_empty());
        assert!(value["most_recent"].is_null());
        let _ = std::fs::remove_file(&path);
    }
}
