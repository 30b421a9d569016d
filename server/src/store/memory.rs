//! In-memory object store

use super::{ObjectStore, StoredObject};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Objects held in insertion order, listed as inserted
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<Vec<StoredObject>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, object: StoredObject) {
        self.lock().push(object);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Make listings fail, as when the backend is unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StoredObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_objects(&self) -> Result<Vec<StoredObject>> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("Object store unavailable");
        }
        Ok(self.lock().clone())
    }

    async fn clear(&self) -> Result<usize> {
        let mut objects = self.lock();
        let removed = objects.len();
        objects.clear();
        Ok(removed)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
