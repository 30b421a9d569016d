//! Object store access
//!
//! The uplink publishes every token as its own object. The store only has
//! to enumerate everything it holds; ordering is whatever the backend
//! returns and is not guaranteed to match publish order.

mod directory;
#[cfg(test)]
mod memory;

pub use directory::DirectoryStore;
#[cfg(test)]
pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One stored object
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub body: Bytes,
    /// When the backend last wrote the object; used as the arrival time
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    pub fn new(key: impl Into<String>, body: impl Into<Bytes>, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            last_modified,
        }
    }

    /// Body as text; token bodies are ASCII
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// A store of uplinked objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Enumerate every object, or fail without returning a partial listing
    async fn list_objects(&self) -> Result<Vec<StoredObject>>;

    /// Delete every object, returning how many were removed
    async fn clear(&self) -> Result<usize>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}
