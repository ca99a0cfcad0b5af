//! STOWAGE Test Utilities
//!
//! Shared test infrastructure for the STOWAGE workspace:
//! - A YAML manifest parser standing in for real package parsing
//! - Instrumented storage that counts calls and injects latency
//! - Proptest generators for object listings
//! - Package fixtures and assertions

pub use stowage_core::{
    join_path, ArtifactMetadata, ArtifactParser, ArtifactVersionEntry, IndexConfig, ParseError,
    RetryPolicy, StorageError, StorageObject, StowageError, StowageResult,
};
pub use stowage_storage::{MemoryStorage, StorageBackend};

pub use fixtures::{corrupt_package, fixture_package, package_for_path, seed_package, timestamp};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

// ============================================================================
// FIXTURE PARSER
// ============================================================================

#[derive(Deserialize)]
struct Manifest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(flatten)]
    metadata: ArtifactMetadata,
}

/// Parses fixture packages: a YAML manifest with `name`, `version` and
/// optional metadata fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureParser;

impl ArtifactParser for FixtureParser {
    fn parse(&self, content: &[u8]) -> Result<ArtifactVersionEntry, ParseError> {
        let manifest: Manifest =
            serde_yaml::from_slice(content).map_err(|e| ParseError::Malformed {
                reason: e.to_string(),
            })?;
        if manifest.name.is_empty() {
            return Err(ParseError::MissingField {
                field: "name".to_string(),
            });
        }
        if manifest.version.is_empty() {
            return Err(ParseError::MissingField {
                field: "version".to_string(),
            });
        }
        Ok(ArtifactVersionEntry::new(manifest.name, manifest.version).with_metadata(manifest.metadata))
    }
}

// ============================================================================
// INSTRUMENTED STORAGE
// ============================================================================

/// Storage wrapper that counts calls and can slow them down.
#[derive(Debug, Default)]
pub struct CountingStorage<S> {
    inner: S,
    lists: AtomicUsize,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    fetched: Mutex<Vec<String>>,
    list_delay: Option<Duration>,
    fetch_delay: Option<Duration>,
    slow_listings: HashMap<String, Duration>,
    slow_objects: Mutex<HashMap<String, Duration>>,
}

impl<S: StorageBackend> CountingStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            lists: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
            list_delay: None,
            fetch_delay: None,
            slow_listings: HashMap::new(),
            slow_objects: Mutex::new(HashMap::new()),
        }
    }

    /// Delay every listing.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    /// Delay every fetch.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Delay listings of one prefix, overriding the global list delay.
    pub fn with_slow_listing(mut self, prefix: impl Into<String>, delay: Duration) -> Self {
        self.slow_listings.insert(prefix.into(), delay);
        self
    }

    /// Delay fetches of one full path, overriding the global fetch delay.
    pub fn with_slow_object(self, path: impl Into<String>, delay: Duration) -> Self {
        if let Ok(mut slow) = self.slow_objects.lock() {
            slow.insert(path.into(), delay);
        }
        self
    }

    /// Serve every object at normal speed again.
    pub fn clear_slow_objects(&self) {
        if let Ok(mut slow) = self.slow_objects.lock() {
            slow.clear();
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Full paths passed to `get_object`, in call order.
    pub fn fetched_paths(&self) -> Vec<String> {
        self.fetched.lock().map(|paths| paths.clone()).unwrap_or_default()
    }

    /// Fetches of paths ending with `extension`.
    pub fn fetches_with_extension(&self, extension: &str) -> usize {
        self.fetched_paths()
            .iter()
            .filter(|path| path.ends_with(extension))
            .count()
    }

    pub fn reset(&self) {
        self.lists.store(0, Ordering::SeqCst);
        self.gets.store(0, Ordering::SeqCst);
        self.puts.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
        if let Ok(mut paths) = self.fetched.lock() {
            paths.clear();
        }
    }
}

#[async_trait]
impl<S: StorageBackend> StorageBackend for CountingStorage<S> {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StorageObject>, StorageError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.slow_listings.get(prefix).copied().or(self.list_delay) {
            tokio::time::sleep(delay).await;
        }
        self.inner.list_objects(prefix).await
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut paths) = self.fetched.lock() {
            paths.push(path.to_string());
        }
        let slow = self
            .slow_objects
            .lock()
            .ok()
            .and_then(|slow| slow.get(path).copied());
        if let Some(delay) = slow.or(self.fetch_delay) {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_object(path).await
    }

    async fn put_object(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_object(path, content).await
    }

    async fn delete_object(&self, path: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_object(path).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for STOWAGE value types.

    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    /// Generate a timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    /// Generate a listing with unique `{name}-{version}.tgz` paths.
    ///
    /// Names are short, so different paths often share a first letter.
    pub fn arb_object_set(max: usize) -> impl Strategy<Value = Vec<StorageObject>> {
        prop::collection::btree_map("[a-z]{1,6}-[0-9]\\.[0-9]\\.[0-9]\\.tgz", arb_timestamp(), 0..max)
            .prop_map(|objects| {
                objects
                    .into_iter()
                    .map(|(path, modified)| StorageObject::new(path, modified))
                    .collect()
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Package fixtures and seeded storage.

    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    /// A fixed point in time offset by `secs`.
    pub fn timestamp(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Bytes of a valid package for [`FixtureParser`].
    pub fn fixture_package(name: &str, version: &str) -> Vec<u8> {
        format!(
            "name: {}\nversion: \"{}\"\ndescription: Fixture package {}\nkeywords:\n- fixture\n",
            name, version, name
        )
        .into_bytes()
    }

    /// Package bytes for a `{name}-{version}.tgz` path, packaged under the
    /// first letter of the name. Paths sharing that letter and version hold
    /// the same artifact version.
    pub fn package_for_path(path: &str) -> Vec<u8> {
        let stem = path.trim_end_matches(".tgz");
        let (name, version) = stem.rsplit_once('-').unwrap_or((stem, "0.0.0"));
        fixture_package(name.get(..1).unwrap_or(name), version)
    }

    /// Bytes that [`FixtureParser`] rejects.
    pub fn corrupt_package() -> Vec<u8> {
        b"\x00\x01 definitely not a package: [".to_vec()
    }

    /// Store a fixture package at `{tenant}/{name}-{version}.tgz` with a
    /// fixed modification time. Returns the path relative to the tenant.
    pub fn seed_package(
        storage: &MemoryStorage,
        tenant: &str,
        name: &str,
        version: &str,
        secs: i64,
    ) -> Result<String, StorageError> {
        let filename = format!("{}-{}.tgz", name, version);
        storage.insert_with_mtime(
            &join_path(tenant, &filename),
            fixture_package(name, version),
            timestamp(secs),
        )?;
        Ok(filename)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for STOWAGE error variants.

    use super::*;

    /// Assert that a result is an index `NotFound`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &StowageResult<T>) {
        match result {
            Err(StowageError::NotFound { .. }) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert that a result is a storage-layer error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &StowageResult<T>) {
        match result {
            Err(StowageError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_parser_accepts_fixture() {
        let entry = FixtureParser.parse(&fixture_package("mychart", "0.1.0")).unwrap();
        assert_eq!(entry.name, "mychart");
        assert_eq!(entry.version, "0.1.0");
        assert_eq!(entry.metadata.keywords, vec!["fixture".to_string()]);
    }

    #[test]
    fn test_fixture_parser_rejects_corrupt_and_incomplete() {
        assert!(FixtureParser.parse(&corrupt_package()).is_err());
        assert_eq!(
            FixtureParser.parse(b"name: mychart\n").unwrap_err(),
            ParseError::MissingField {
                field: "version".to_string()
            }
        );
    }

    #[test]
    fn test_package_for_path_shares_versions_by_initial() {
        let first = FixtureParser.parse(&package_for_path("abc-1.2.3.tgz")).unwrap();
        let second = FixtureParser.parse(&package_for_path("axe-1.2.3.tgz")).unwrap();
        assert_eq!((first.name.as_str(), first.version.as_str()), ("a", "1.2.3"));
        assert_eq!(first.name, second.name);
        assert_eq!(first.version, second.version);
    }

    #[tokio::test]
    async fn test_counting_storage_counts() {
        let storage = CountingStorage::new(MemoryStorage::new());
        storage.put_object("org1/a.tgz", b"a").await.unwrap();
        storage.get_object("org1/a.tgz").await.unwrap();
        storage.list_objects("org1").await.unwrap();

        assert_eq!(storage.put_count(), 1);
        assert_eq!(storage.fetch_count(), 1);
        assert_eq!(storage.list_count(), 1);
        assert_eq!(storage.fetches_with_extension(".tgz"), 1);

        storage.reset();
        assert_eq!(storage.fetch_count(), 0);
        assert!(storage.fetched_paths().is_empty());
    }
}
