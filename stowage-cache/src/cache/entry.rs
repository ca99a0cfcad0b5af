//! Per-tenant cache entry and its regeneration lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stowage_core::StorageObject;
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::index::ArtifactIndex;

/// State guarded by the entry's regeneration lock.
#[derive(Debug)]
pub struct EntryState {
    /// Last committed index. Clean once anything has been published.
    pub(crate) index: Arc<ArtifactIndex>,
    /// Indexable objects as of the last successful regeneration.
    pub(crate) known_objects: Vec<StorageObject>,
    /// Whether statefile bootstrap has been attempted.
    pub(crate) initialized: bool,
}

impl EntryState {
    pub fn index(&self) -> &Arc<ArtifactIndex> {
        &self.index
    }

    pub fn known_objects(&self) -> &[StorageObject] {
        &self.known_objects
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// One tenant's cache.
///
/// The mutex serializes bootstrap, listing, diffing and regeneration for the
/// tenant. Published snapshots are read without taking it.
#[derive(Debug)]
pub struct CacheEntry {
    tenant: String,
    state: Mutex<EntryState>,
    published: watch::Sender<Option<Arc<ArtifactIndex>>>,
    regenerating: AtomicBool,
}

impl CacheEntry {
    pub fn new(tenant: impl Into<String>, index: ArtifactIndex) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            tenant: tenant.into(),
            state: Mutex::new(EntryState {
                index: Arc::new(index),
                known_objects: Vec::new(),
                initialized: false,
            }),
            published,
            regenerating: AtomicBool::new(false),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Take the regeneration lock.
    pub async fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().await
    }

    /// The last published index, if any refresh has completed.
    pub fn snapshot(&self) -> Option<Arc<ArtifactIndex>> {
        self.published.borrow().clone()
    }

    /// Watch published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ArtifactIndex>>> {
        self.published.subscribe()
    }

    pub fn is_regenerating(&self) -> bool {
        self.regenerating.load(Ordering::Acquire)
    }

    pub(crate) fn begin_regeneration(&self) -> RegeneratingFlag<'_> {
        self.regenerating.store(true, Ordering::Release);
        RegeneratingFlag(&self.regenerating)
    }

    pub(crate) fn publish(&self, index: Arc<ArtifactIndex>) {
        self.published.send_replace(Some(index));
    }
}

/// Clears the entry's regenerating flag when dropped.
pub(crate) struct RegeneratingFlag<'a>(&'a AtomicBool);

impl Drop for RegeneratingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nothing_published_until_publish() {
        let entry = CacheEntry::new("org1", ArtifactIndex::new("org1", 0, None));
        assert!(entry.snapshot().is_none());

        let mut index = ArtifactIndex::new("org1", 0, None);
        index.regenerate().unwrap();
        let index = Arc::new(index);
        entry.publish(index.clone());

        let snapshot = entry.snapshot().unwrap();
        assert!(Arc::ptr_eq(&snapshot, &index));
    }

    #[tokio::test]
    async fn test_subscribers_see_new_snapshots() {
        let entry = CacheEntry::new("org1", ArtifactIndex::new("org1", 0, None));
        let mut rx = entry.subscribe();

        let mut index = ArtifactIndex::new("org1", 0, None);
        index.regenerate().unwrap();
        entry.publish(Arc::new(index));

        rx.changed().await.unwrap();
        assert!(rx.borrow().is_some());
    }

    #[test]
    fn test_regenerating_flag_resets_on_drop() {
        let entry = CacheEntry::new("org1", ArtifactIndex::new("org1", 0, None));
        {
            let _flag = entry.begin_regeneration();
            assert!(entry.is_regenerating());
        }
        assert!(!entry.is_regenerating());
    }

    #[tokio::test]
    async fn test_state_starts_uninitialized() {
        let entry = CacheEntry::new("org1", ArtifactIndex::new("org1", 0, None));
        let state = entry.lock().await;
        assert!(!state.is_initialized());
        assert!(state.known_objects().is_empty());
        assert!(state.index().is_dirty());
    }
}
