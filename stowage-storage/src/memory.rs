//! In-memory storage backend.
//!
//! Used by tests and by embedders that do not need persistence. Supports
//! explicit modification times and simulated outages.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use stowage_core::{StorageError, StorageObject};

use crate::{relative_to, StorageBackend};

#[derive(Debug, Clone)]
struct StoredBlob {
    content: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Thread-safe in-memory object store keyed by full path.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<BTreeMap<String, StoredBlob>>,
    unavailable: AtomicBool,
    injected_failures: AtomicU32,
}

fn lock_poisoned(operation: &str) -> StorageError {
    StorageError::unavailable(operation, "storage lock poisoned")
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object with an explicit modification time.
    pub fn insert_with_mtime(
        &self,
        path: &str,
        content: impl Into<Vec<u8>>,
        last_modified: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut objects = self.objects.write().map_err(|_| lock_poisoned("put"))?;
        objects.insert(
            path.to_string(),
            StoredBlob {
                content: content.into(),
                last_modified,
            },
        );
        Ok(())
    }

    /// Change an object's modification time without touching its bytes.
    pub fn touch(&self, path: &str, last_modified: DateTime<Utc>) -> Result<(), StorageError> {
        let mut objects = self.objects.write().map_err(|_| lock_poisoned("touch"))?;
        let blob = objects
            .get_mut(path)
            .ok_or_else(|| StorageError::not_found(path))?;
        blob.last_modified = last_modified;
        Ok(())
    }

    /// Make every subsequent call fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` calls fail with `Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self, operation: &str) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(operation, "simulated outage"));
        }
        let injected = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StorageError::unavailable(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StorageObject>, StorageError> {
        self.check_available("list")?;
        let objects = self.objects.read().map_err(|_| lock_poisoned("list"))?;
        Ok(objects
            .iter()
            .filter_map(|(path, blob)| {
                relative_to(path, prefix).map(|rel| StorageObject::new(rel, blob.last_modified))
            })
            .collect())
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.check_available("get")?;
        let objects = self.objects.read().map_err(|_| lock_poisoned("get"))?;
        objects
            .get(path)
            .map(|blob| blob.content.clone())
            .ok_or_else(|| StorageError::not_found(path))
    }

    async fn put_object(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        self.check_available("put")?;
        let mut objects = self.objects.write().map_err(|_| lock_poisoned("put"))?;
        // Rewrites must always move the modification time forward.
        let mut last_modified = Utc::now();
        if let Some(previous) = objects.get(path) {
            if last_modified <= previous.last_modified {
                last_modified = previous.last_modified + ChronoDuration::milliseconds(1);
            }
        }
        objects.insert(
            path.to_string(),
            StoredBlob {
                content: content.to_vec(),
                last_modified,
            },
        );
        Ok(())
    }

    async fn delete_object(&self, path: &str) -> Result<(), StorageError> {
        self.check_available("delete")?;
        let mut objects = self.objects.write().map_err(|_| lock_poisoned("delete"))?;
        objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(path))
    }
}
