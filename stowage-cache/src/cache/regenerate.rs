//! The regeneration worker.
//!
//! Applies one listing diff to a scratch copy of the tenant's index, then
//! renders and publishes it in a single step. Per-object failures are
//! skipped and reported; only storage infrastructure failures abort.

use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use stowage_core::{
    join_path, ArtifactParser, ArtifactVersionEntry, IndexConfig, ParseError, StorageError,
    StorageObject, StowageResult,
};
use stowage_storage::{ObjectSetDiff, StorageBackend};
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, EntryState};
use crate::index::ArtifactIndex;
use crate::telemetry;

/// An object left out of the index, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedObject {
    pub path: String,
    pub reason: String,
    /// The object could not be read this time. It is not remembered as
    /// known, so the next read tries it again. Objects that fail to parse
    /// are remembered until they change.
    pub transient: bool,
}

/// What one regeneration did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegenerationReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: Vec<SkippedObject>,
}

impl RegenerationReport {
    /// Whether any version entered or left the index.
    pub fn has_changes(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }

    /// Paths to leave out of the known object set.
    fn retry_paths(&self) -> HashSet<&str> {
        self.skipped
            .iter()
            .filter(|skipped| skipped.transient)
            .map(|skipped| skipped.path.as_str())
            .collect()
    }
}

/// Everything a regeneration needs besides the entry itself.
pub(crate) struct Regeneration<'a> {
    pub storage: &'a dyn StorageBackend,
    pub parser: &'a dyn ArtifactParser,
    pub config: &'a IndexConfig,
    pub tenant: &'a str,
}

impl Regeneration<'_> {
    /// Apply `diff`, publish the result and record metrics.
    ///
    /// On success the entry's state holds the new index and `current`, less
    /// any object that could not be read, becomes the known object set. On
    /// error the state and the published snapshot are left untouched.
    pub(crate) async fn run(
        &self,
        entry: &CacheEntry,
        state: &mut EntryState,
        diff: &ObjectSetDiff,
        current: Vec<StorageObject>,
    ) -> StowageResult<(Arc<ArtifactIndex>, RegenerationReport)> {
        let _flag = entry.begin_regeneration();
        let started = Instant::now();
        let result = self.apply(&state.index, diff).await;
        let elapsed = started.elapsed().as_secs_f64();

        let (index, report) = match result {
            Ok(applied) => applied,
            Err(e) => {
                if let Some(metrics) = telemetry::metrics() {
                    metrics.record_regeneration(self.tenant, false, 0, elapsed);
                }
                warn!(tenant = %self.tenant, error = %e, "Regeneration aborted");
                return Err(e);
            }
        };

        let retry = report.retry_paths();
        let snapshot = Arc::new(index);
        state.index = snapshot.clone();
        state.known_objects = current
            .into_iter()
            .filter(|object| !retry.contains(object.path.as_str()))
            .collect();
        entry.publish(snapshot.clone());

        if let Some(metrics) = telemetry::metrics() {
            metrics.set_index_size(
                self.tenant,
                snapshot.artifact_count(),
                snapshot.version_count(),
            );
            metrics.record_regeneration(self.tenant, true, report.skipped.len(), elapsed);
        }

        info!(
            tenant = %self.tenant,
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            skipped = report.skipped.len(),
            retry = retry.len(),
            versions = snapshot.version_count(),
            duration_ms = (elapsed * 1000.0) as u64,
            "Index regenerated"
        );

        Ok((snapshot, report))
    }

    async fn apply(
        &self,
        committed: &ArtifactIndex,
        diff: &ObjectSetDiff,
    ) -> StowageResult<(ArtifactIndex, RegenerationReport)> {
        let mut scratch = committed.clone();
        let mut report = RegenerationReport::default();

        for object in &diff.removed {
            if scratch.is_indexed(&object.path) {
                scratch.remove_path(&object.path);
                report.removed += 1;
            }
        }
        for object in &diff.updated {
            scratch.remove_path(&object.path);
        }

        let pending = diff
            .added
            .iter()
            .map(|object| (object, false))
            .chain(diff.updated.iter().map(|object| (object, true)));

        // `buffered` keeps diff order, so the outcome does not depend on
        // timing. Package bytes are dropped as soon as each object is parsed.
        let mut loaded = pin!(stream::iter(pending)
            .map(|(object, is_update)| async move { (object, is_update, self.load(object).await) })
            .buffered(self.config.fetch_concurrency.max(1))
            .boxed());

        while let Some((object, is_update, result)) = loaded.next().await {
            match result? {
                Ok(entry) => {
                    debug!(
                        tenant = %self.tenant,
                        path = %object.path,
                        name = %entry.name,
                        version = %entry.version,
                        "Indexed object"
                    );
                    scratch.add_entry(&object.path, entry);
                    if is_update {
                        report.updated += 1;
                    } else {
                        report.added += 1;
                    }
                }
                Err(skipped) => {
                    warn!(
                        tenant = %self.tenant,
                        path = %object.path,
                        reason = %skipped.reason,
                        transient = skipped.transient,
                        "Skipping object"
                    );
                    report.skipped.push(skipped);
                }
            }
        }

        scratch.regenerate()?;
        Ok((scratch, report))
    }

    /// Fetch and parse one object.
    ///
    /// Missing and timed-out objects are transient skips, parse failures are
    /// permanent ones. Any other storage failure aborts the regeneration.
    async fn load(
        &self,
        object: &StorageObject,
    ) -> StowageResult<Result<ArtifactVersionEntry, SkippedObject>> {
        let content = match self.fetch(object).await {
            Ok(content) => content,
            Err(e @ (StorageError::NotFound { .. } | StorageError::Timeout { .. })) => {
                return Ok(Err(SkippedObject {
                    path: object.path.clone(),
                    reason: e.to_string(),
                    transient: true,
                }));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(self
            .parse(object, &content)
            .map_err(|e| SkippedObject {
                path: object.path.clone(),
                reason: e.to_string(),
                transient: false,
            }))
    }

    async fn fetch(&self, object: &StorageObject) -> Result<Vec<u8>, StorageError> {
        let path = join_path(self.tenant, &object.path);
        let request = self.storage.get_object(&path);
        match self.config.fetch_timeout {
            Some(after) => tokio::time::timeout(after, request)
                .await
                .map_err(|_| StorageError::Timeout {
                    operation: "get".to_string(),
                    path: path.clone(),
                    after,
                })?,
            None => request.await,
        }
    }

    fn parse(
        &self,
        object: &StorageObject,
        content: &[u8],
    ) -> Result<ArtifactVersionEntry, ParseError> {
        let mut entry = self.parser.parse(content)?;
        entry.validate()?;
        entry.stamp(object, content);
        Ok(entry)
    }
}
