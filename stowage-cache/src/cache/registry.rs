//! Process-wide tenant -> cache entry map.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::entry::CacheEntry;
use crate::index::ArtifactIndex;

/// Registry of per-tenant cache entries.
///
/// Shard locks only guard entry creation. Each entry's own mutex is taken
/// separately, after the shard lock is released.
#[derive(Debug)]
pub struct CacheRegistry {
    entries: DashMap<String, Arc<CacheEntry>>,
    version_cap: usize,
    download_url_prefix: Option<String>,
}

impl CacheRegistry {
    pub fn new(version_cap: usize, download_url_prefix: Option<String>) -> Self {
        Self {
            entries: DashMap::new(),
            version_cap,
            download_url_prefix,
        }
    }

    /// Find the tenant's entry, creating an empty one atomically on first use.
    pub fn get_or_create(&self, tenant: &str) -> Arc<CacheEntry> {
        if let Some(entry) = self.entries.get(tenant) {
            return entry.value().clone();
        }
        self.entries
            .entry(tenant.to_string())
            .or_insert_with(|| {
                debug!(tenant = %tenant, "Creating cache entry");
                Arc::new(CacheEntry::new(
                    tenant,
                    ArtifactIndex::new(tenant, self.version_cap, self.download_url_prefix.clone()),
                ))
            })
            .value()
            .clone()
    }

    pub fn get(&self, tenant: &str) -> Option<Arc<CacheEntry>> {
        self.entries.get(tenant).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tenants with an entry, sorted.
    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        tenants.sort();
        tenants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_returns_same_entry() {
        let registry = CacheRegistry::new(0, None);
        let a = registry.get_or_create("org1");
        let b = registry.get_or_create("org1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("org2").is_none());
    }

    #[test]
    fn test_tenants_sorted() {
        let registry = CacheRegistry::new(0, None);
        registry.get_or_create("org2");
        registry.get_or_create("");
        registry.get_or_create("org1/team1");
        assert_eq!(registry.tenants(), vec!["", "org1/team1", "org2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_shares_entry() {
        let registry = Arc::new(CacheRegistry::new(2, None));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_create("org1") })
            })
            .collect();

        let mut entries = Vec::new();
        for handle in handles {
            entries.push(handle.await.unwrap());
        }
        assert!(entries.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
        assert_eq!(entries[0].lock().await.index().version_cap(), 2);
    }
}
