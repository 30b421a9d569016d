//! Object store backed by a local directory (e.g. a synced bucket)

use super::{ObjectStore, StoredObject};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Every regular file in `root` is one object, keyed by file name
pub struct DirectoryStore {
    root: PathBuf,
    name: String,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = format!("dir:{}", root.display());
        Self { root, name }
    }

    async fn file_paths(&self) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to list {}", self.root.display()))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl ObjectStore for DirectoryStore {
    async fn list_objects(&self) -> Result<Vec<StoredObject>> {
        let mut objects = Vec::new();
        for path in self.file_paths().await? {
            let body = fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let modified = fs::metadata(&path).await?.modified()?;
            let key = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            objects.push(StoredObject::new(key, body, DateTime::<Utc>::from(modified)));
        }

        // Listed in key order, like a bucket listing
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        debug!("Listed {} objects from {}", objects.len(), self.name);
        Ok(objects)
    }

    async fn clear(&self) -> Result<usize> {
        let paths = self.file_paths().await?;
        for path in &paths {
            fs::remove_file(path)
                .await
                .with_context(|| format!("Failed to delete {}", path.display()))?;
        }
        Ok(paths.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "oceanwatch-store-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[tokio::test]
    async fn test_lists_files_in_key_order_and_clears() {
        let dir = scratch_dir("list");
        std::fs::write(dir.join("0002"), "00ff").expect("write");
        std::fs::write(dir.join("0001"), "{Image Start}").expect("write");
        std::fs::create_dir(dir.join("nested")).expect("mkdir");

        let store = DirectoryStore::new(&dir);
        let objects = store.list_objects().await.expect("list");
        let keys: Vec<&str> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["0001", "0002"]);
        assert_eq!(objects[1].text(), "00ff");

        assert_eq!(store.clear().await.expect("clear"), 2);
        assert!(store.list_objects().await.expect("list").is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_missing_directory_fails_listing() {
        let store = DirectoryStore::new(std::env::temp_dir().join("oceanwatch-store-missing-dir"));
        assert!(store.list_objects().await.is_err());
    }
}
