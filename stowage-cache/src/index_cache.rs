//! Index cache orchestrator.
//!
//! Every read lists the tenant's prefix, diffs the listing against what the
//! entry already knows, and regenerates only when something changed. The
//! tenant's entry lock is held for the whole sequence, so concurrent readers
//! of the same tenant never parse the same object twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use stowage_core::{
    ArtifactParser, IndexConfig, StorageError, StorageObject, StowageError, StowageResult,
};
use stowage_storage::{diff_objects, RetryingStorage, StorageBackend};
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheRegistry, EntryState, Regeneration, RegenerationReport};
use crate::index::ArtifactIndex;
use crate::statefile;

/// Result of a read, carrying how it was produced.
///
/// When the refresh failed and stale serving is enabled, `index` is the last
/// good snapshot and `stale_error` holds the failure.
#[derive(Debug, Clone)]
pub struct IndexRead {
    index: Arc<ArtifactIndex>,
    report: Option<RegenerationReport>,
    stale_error: Option<StowageError>,
    read_at: DateTime<Utc>,
}

impl IndexRead {
    /// A read backed by a successful refresh.
    pub fn fresh(index: Arc<ArtifactIndex>, report: Option<RegenerationReport>) -> Self {
        Self {
            index,
            report,
            stale_error: None,
            read_at: Utc::now(),
        }
    }

    /// A read served from the last good snapshot after a failed refresh.
    pub fn stale(index: Arc<ArtifactIndex>, error: StowageError) -> Self {
        Self {
            index,
            report: None,
            stale_error: Some(error),
            read_at: Utc::now(),
        }
    }

    pub fn index(&self) -> &Arc<ArtifactIndex> {
        &self.index
    }

    /// The rendered index bytes.
    pub fn raw(&self) -> &[u8] {
        self.index.raw()
    }

    /// Whether this read ran the regeneration worker.
    pub fn was_regenerated(&self) -> bool {
        self.report.is_some()
    }

    pub fn report(&self) -> Option<&RegenerationReport> {
        self.report.as_ref()
    }

    pub fn is_stale(&self) -> bool {
        self.stale_error.is_some()
    }

    pub fn stale_error(&self) -> Option<&StowageError> {
        self.stale_error.as_ref()
    }

    pub fn read_at(&self) -> DateTime<Utc> {
        self.read_at
    }
}

/// Outcome of one refresh under the entry lock.
#[derive(Debug, Clone)]
pub struct Refresh {
    pub index: Arc<ArtifactIndex>,
    /// `None` when the listing matched the known objects.
    pub report: Option<RegenerationReport>,
}

/// Owns storage, parser, configuration and the tenant registry.
pub struct IndexCache {
    storage: Arc<dyn StorageBackend>,
    parser: Arc<dyn ArtifactParser>,
    config: IndexConfig,
    registry: CacheRegistry,
}

fn normalize_tenant(tenant: &str) -> &str {
    tenant.trim_matches('/')
}

impl IndexCache {
    /// Create a cache over `storage`. The configuration is validated first.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        parser: Arc<dyn ArtifactParser>,
        config: IndexConfig,
    ) -> StowageResult<Self> {
        config.validate()?;
        let registry = CacheRegistry::new(config.version_cap, config.download_url_prefix.clone());
        Ok(Self {
            storage,
            parser,
            config,
            registry,
        })
    }

    /// Create a cache over `backend`, wrapped in the configured retry policy.
    pub fn from_backend<B>(
        backend: B,
        parser: Arc<dyn ArtifactParser>,
        config: IndexConfig,
    ) -> StowageResult<Self>
    where
        B: StorageBackend + 'static,
    {
        let storage = Arc::new(RetryingStorage::new(backend, config.retry));
        Self::new(storage, parser, config)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn parser(&self) -> &Arc<dyn ArtifactParser> {
        &self.parser
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    /// Read the tenant's index, regenerating it if storage changed.
    pub async fn get_index(&self, tenant: &str) -> StowageResult<IndexRead> {
        match self.refresh(tenant).await {
            Ok(refresh) => Ok(IndexRead::fresh(refresh.index, refresh.report)),
            Err(e) if e.is_infrastructure() && self.config.serve_stale_on_error => {
                match self.snapshot(tenant) {
                    Some(index) => {
                        warn!(tenant = %normalize_tenant(tenant), error = %e, "Serving stale index");
                        Ok(IndexRead::stale(index, e))
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// The last published index for a tenant, without touching storage.
    pub fn snapshot(&self, tenant: &str) -> Option<Arc<ArtifactIndex>> {
        self.registry
            .get(normalize_tenant(tenant))
            .and_then(|entry| entry.snapshot())
    }

    /// Bring the tenant's index up to date with storage.
    pub async fn refresh(&self, tenant: &str) -> StowageResult<Refresh> {
        let tenant = normalize_tenant(tenant);
        let entry = self.registry.get_or_create(tenant);
        let mut state = entry.lock().await;

        if !state.initialized {
            self.bootstrap(tenant, &mut state).await;
            state.initialized = true;
        }

        let current: Vec<StorageObject> = self
            .list_tenant_objects(tenant)
            .await?
            .into_iter()
            .filter(|object| self.is_indexable(object))
            .collect();
        let diff = diff_objects(&state.known_objects, &current);

        if diff.is_empty() && !state.index.is_dirty() {
            debug!(tenant = %tenant, objects = current.len(), "Index up to date");
            return Ok(Refresh {
                index: state.index.clone(),
                report: None,
            });
        }

        debug!(
            tenant = %tenant,
            added = diff.added.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            "Storage changed, regenerating"
        );

        let worker = Regeneration {
            storage: self.storage.as_ref(),
            parser: self.parser.as_ref(),
            config: &self.config,
            tenant,
        };
        let (index, report) = worker.run(&entry, &mut state, &diff, current).await?;

        if self.config.use_statefile && report.has_changes() {
            statefile::store(self.storage.as_ref(), tenant, &index, &state.known_objects).await;
        }

        Ok(Refresh {
            index,
            report: Some(report),
        })
    }

    /// List everything under the tenant prefix, honoring the listing deadline.
    pub async fn list_tenant_objects(&self, tenant: &str) -> StowageResult<Vec<StorageObject>> {
        let tenant = normalize_tenant(tenant);
        let request = self.storage.list_objects(tenant);
        let objects = match self.config.list_timeout {
            Some(after) => tokio::time::timeout(after, request).await.map_err(|_| {
                StorageError::Timeout {
                    operation: "list".to_string(),
                    path: tenant.to_string(),
                    after,
                }
            })??,
            None => request.await?,
        };
        Ok(objects)
    }

    /// Top-level objects with the artifact extension.
    pub fn is_indexable(&self, object: &StorageObject) -> bool {
        object.is_top_level() && object.has_extension(&self.config.artifact_extension)
    }

    /// Seed a cold entry from the statefile, if enabled and readable.
    async fn bootstrap(&self, tenant: &str, state: &mut EntryState) {
        if !self.config.use_statefile {
            return;
        }
        let Some(statefile) = statefile::load(self.storage.as_ref(), tenant).await else {
            return;
        };

        let (index, known) = statefile.into_parts(
            tenant,
            self.config.version_cap,
            self.config.download_url_prefix.clone(),
        );
        state.index = Arc::new(index);
        state.known_objects = known
            .into_iter()
            .filter(|object| self.is_indexable(object))
            .collect();
    }

    /// The entry for a tenant, if it has been read before.
    pub fn entry(&self, tenant: &str) -> Option<Arc<CacheEntry>> {
        self.registry.get(normalize_tenant(tenant))
    }
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("config", &self.config)
            .field("tenants", &self.registry.len())
            .finish_non_exhaustive()
    }
}
