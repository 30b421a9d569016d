mod ingest;
mod store;

use anyhow::Result;
use clap::Parser;
use ingest::{write_snapshot, DirectoryImageSink, ImageSink, Ingestor};
use std::path::PathBuf;
use std::time::Duration;
use store::{DirectoryStore, ObjectStore};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Rebuild detections from uplinked frame objects
#[derive(Parser, Debug)]
#[command(name = "oceanwatch-ingest", version)]
struct Cli {
    /// Directory holding the uplinked objects (one file per object)
    #[arg(long, default_value = "./bucket")]
    store_dir: PathBuf,

    /// Where reconstructed images are written
    #[arg(long, default_value = "./assets")]
    assets_dir: PathBuf,

    /// Write a JSON snapshot here after every pull
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Seconds between pulls
    #[arg(long, default_value_t = 120)]
    interval_secs: u64,

    /// Pull once and exit
    #[arg(long)]
    once: bool,

    /// Delete every stored object before the first pull
    #[arg(long)]
    flush_store: bool,
}

/// Receiver settings
#[derive(Debug, Clone)]
struct IngestConfig {
    store_dir: PathBuf,
    assets_dir: PathBuf,
    snapshot: Option<PathBuf>,
    interval: Duration,
    once: bool,
    flush_store: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./bucket"),
            assets_dir: PathBuf::from("./assets"),
            snapshot: None,
            interval: Duration::from_secs(120),
            once: false,
            flush_store: false,
        }
    }
}

impl From<Cli> for IngestConfig {
    fn from(cli: Cli) -> Self {
        Self {
            store_dir: cli.store_dir,
            assets_dir: cli.assets_dir,
            snapshot: cli.snapshot,
            // A zero period would make the ticker panic
            interval: Duration::from_secs(cli.interval_secs.max(1)),
            once: cli.once,
            flush_store: cli.flush_store,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = IngestConfig::from(Cli::parse());
    info!("Ingest starting: store {}", config.store_dir.display());
    info!("  assets: {}", config.assets_dir.display());

    let store = DirectoryStore::new(&config.store_dir);
    if config.flush_store {
        let removed = store.clear().await?;
        warn!("Flushed {} objects from {}", removed, store.name());
    }
    let sink = DirectoryImageSink::create(&config.assets_dir).await?;

    run(Ingestor::new(store, sink), &config).await
}

async fn run<S: ObjectStore, K: ImageSink>(mut ingestor: Ingestor<S, K>, config: &IngestConfig) -> Result<()> {
    let mut ticker = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }

        match ingestor.pull().await {
            Ok(report) => {
                if let Some(key) = &report.most_recent {
                    info!("Most recent detection: {}", key);
                }
                if let Some(path) = &config.snapshot {
                    if let Err(e) = write_snapshot(path, ingestor.detections()).await {
                        error!("Snapshot failed: {:#}", e);
                    }
                }
            }
            Err(e) if config.once => return Err(e),
            Err(e) => error!("Pull failed: {:#}", e),
        }

        if config.once {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::MemoryImageSink;
    use store::{MemoryStore, StoredObject};

    #[test]
    fn test_cli_defaults() {
        let config = IngestConfig::from(Cli::parse_from(["oceanwatch-ingest"]));
        let defaults = IngestConfig::default();
        assert_eq!(config.interval, defaults.interval);
        assert_eq!(config.store_dir, defaults.store_dir);
        assert!(!config.flush_store);
    }

    #[tokio::test]
    async fn test_run_once_writes_snapshot() {
        let store = MemoryStore::new();
        let stamp = chrono::Utc::now();
        for body in ["{Image Start,1,2,3,x,5,6,7,8,9,10}", "ffd8", "{Image End}"] {
            store.insert(StoredObject::new(body, body.to_string(), stamp));
        }

        let snapshot = std::env::temp_dir().join(format!("oceanwatch-run-{}.json", std::process::id()));
        let config = IngestConfig {
            snapshot: Some(snapshot.clone()),
            once: true,
            ..Default::default()
        };
        let sink = MemoryImageSink::new();
        run(Ingestor::new(store, sink.clone()), &config).await.expect("run");

        assert_eq!(sink.keys().len(), 1);
        let text = std::fs::read_to_string(&snapshot).expect("snapshot");
        assert!(text.contains("\"cluster_count\": 3"));
        let _ = std::fs::remove_file(&snapshot);
    }

    #[tokio::test]
    async fn test_run_once_propagates_listing_failure() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let config = IngestConfig {
            once: true,
            ..Default::default()
        };
        assert!(run(Ingestor::new(store, MemoryImageSink::new()), &config).await.is_err());
    }
}
