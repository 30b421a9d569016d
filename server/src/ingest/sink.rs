//! Where reconstructed images are written

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;

/// Persists one image per dedup key
#[async_trait]
pub trait ImageSink: Send + Sync {
    async fn save(&self, key: &str, image: &Bytes) -> Result<()>;
}

/// Writes `<key>.jpg` files into an assets directory
pub struct DirectoryImageSink {
    dir: PathBuf,
}

impl DirectoryImageSink {
    /// Create the directory if it does not exist yet
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.jpg"))
    }
}

#[async_trait]
impl ImageSink for DirectoryImageSink {
    async fn save(&self, key: &str, image: &Bytes) -> Result<()> {
        let path = self.path_for(key);
        fs::write(&path, image)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[cfg(test)]
pub use memory::MemoryImageSink;

#[cfg(test)]
mod memory {
    use super::ImageSink;
    use anyhow::Result;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// Keeps images in memory
    #[derive(Debug, Clone, Default)]
    pub struct MemoryImageSink {
        images: Arc<Mutex<BTreeMap<String, Bytes>>>,
        writes: Arc<Mutex<usize>>,
    }

    impl MemoryImageSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get(&self, key: &str) -> Option<Bytes> {
            self.images
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(key)
                .cloned()
        }

        pub fn keys(&self) -> Vec<String> {
            self.images
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .keys()
                .cloned()
                .collect()
        }

        /// Total saves, including overwrites
        pub fn writes(&self) -> usize {
            *self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    #[async_trait]
    impl ImageSink for MemoryImageSink {
        async fn save(&self, key: &str, image: &Bytes) -> Result<()> {
            self.images
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(key.to_string(), image.clone());
            *self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_sink_writes_jpg() {
        let dir = std::env::temp_dir().join(format!("oceanwatch-assets-{}", std::process::id()));
        let sink = DirectoryImageSink::create(&dir).await.expect("create");

        sink.save("2021-05-19-10-15-30", &Bytes::from_static(b"\xff\xd8\xff"))
            .await
            .expect("save");

        let written = std::fs::read(dir.join("2021-05-19-10-15-30.jpg")).expect("read back");
        assert_eq!(written, b"\xff\xd8\xff");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
