//! The artifact index served to clients.
//!
//! An [`ArtifactIndex`] maps artifact names to their versions, newest first,
//! and carries its own canonical YAML rendering. Mutations mark the index
//! dirty; [`ArtifactIndex::regenerate`] re-renders it. Only clean indexes are
//! ever published.
//!
//! With a version cap, versions past the cap are held as overflow: they are
//! not rendered, but they keep their object paths and move back into the
//! rendered list when a newer version goes away. The rendered index is
//! therefore a function of what is in storage, not of the order changes
//! arrived in.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use stowage_core::{file_name, ArtifactVersionEntry, StowageError, StowageResult};
use tracing::debug;

use crate::version::newest_first;

/// `apiVersion` written into every rendered index.
pub const INDEX_API_VERSION: &str = "v1";

/// `(name, version)` of an indexed artifact version.
pub type VersionKey = (String, String);

/// The rendered index document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    pub api_version: String,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ArtifactVersionEntry>>,
    #[serde(default = "unix_epoch")]
    pub generated: DateTime<Utc>,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl IndexDocument {
    pub fn from_yaml(raw: &[u8]) -> StowageResult<Self> {
        serde_yaml::from_slice(raw).map_err(|e| StowageError::Serialization {
            reason: format!("invalid index document: {}", e),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexDocumentRef<'a> {
    api_version: &'a str,
    entries: &'a BTreeMap<String, Vec<ArtifactVersionEntry>>,
    generated: DateTime<Utc>,
}

/// Per-tenant artifact index.
#[derive(Debug, Clone)]
pub struct ArtifactIndex {
    tenant: String,
    /// Rendered versions, newest first, at most `version_cap` per name.
    entries: BTreeMap<String, Vec<ArtifactVersionEntry>>,
    /// Versions past the cap, newest first. Not rendered.
    overflow: BTreeMap<String, Vec<ArtifactVersionEntry>>,
    by_path: HashMap<String, VersionKey>,
    /// Every object backing a version, oldest contribution first. The
    /// indexed entry is the last one.
    sources: HashMap<VersionKey, Vec<(String, ArtifactVersionEntry)>>,
    generated_at: DateTime<Utc>,
    raw: Vec<u8>,
    version_cap: usize,
    download_url_prefix: Option<String>,
    dirty: bool,
}

impl ArtifactIndex {
    /// An empty, dirty index. It must be regenerated before it is published.
    pub fn new(
        tenant: impl Into<String>,
        version_cap: usize,
        download_url_prefix: Option<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            entries: BTreeMap::new(),
            overflow: BTreeMap::new(),
            by_path: HashMap::new(),
            sources: HashMap::new(),
            generated_at: DateTime::UNIX_EPOCH,
            raw: Vec::new(),
            version_cap,
            download_url_prefix: download_url_prefix
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            dirty: true,
        }
    }

    /// Rebuild an index from persisted entries and the objects backing them.
    ///
    /// URLs are taken as already prefixed. Backing paths whose version is not
    /// among `entries` are ignored. A version with no backing path is mapped
    /// to the file name of its first URL, which is how statefiles without
    /// per-object versions are read.
    pub fn from_entries(
        tenant: impl Into<String>,
        version_cap: usize,
        download_url_prefix: Option<String>,
        entries: impl IntoIterator<Item = ArtifactVersionEntry>,
        backing: impl IntoIterator<Item = (String, VersionKey)>,
    ) -> Self {
        let mut index = Self::new(tenant, version_cap, download_url_prefix);
        let mut restored = BTreeMap::new();
        for entry in entries {
            restored.insert((entry.name.clone(), entry.version.clone()), entry.clone());
            index.place(entry);
        }

        for (path, key) in backing {
            if index.by_path.contains_key(&path) {
                continue;
            }
            if let Some(entry) = restored.get(&key) {
                index.attach(path, key, entry.clone());
            }
        }

        for (key, entry) in restored {
            if index.sources.contains_key(&key) {
                continue;
            }
            let Some(path) = entry.urls.first().map(|url| file_name(url).to_string()) else {
                continue;
            };
            if !index.by_path.contains_key(&path) {
                index.attach(path, key, entry);
            }
        }
        index
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn entries(&self) -> &BTreeMap<String, Vec<ArtifactVersionEntry>> {
        &self.entries
    }

    /// Versions held back by the cap, per name, newest first.
    pub fn overflow(&self) -> &BTreeMap<String, Vec<ArtifactVersionEntry>> {
        &self.overflow
    }

    /// Versions of one artifact, newest first.
    pub fn versions(&self, name: &str) -> Option<&[ArtifactVersionEntry]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn get_version(&self, name: &str, version: &str) -> Option<&ArtifactVersionEntry> {
        self.versions(name)?.iter().find(|e| e.version == version)
    }

    pub fn latest(&self, name: &str) -> Option<&ArtifactVersionEntry> {
        self.versions(name)?.first()
    }

    /// The object path the indexed entry of a version was loaded from.
    ///
    /// Covers overflow versions too.
    pub fn path_of(&self, name: &str, version: &str) -> Option<&str> {
        self.sources
            .get(&(name.to_string(), version.to_string()))?
            .last()
            .map(|(path, _)| path.as_str())
    }

    /// Every object path backing a version.
    pub fn paths_of(&self, name: &str, version: &str) -> Vec<&str> {
        self.sources
            .get(&(name.to_string(), version.to_string()))
            .map(|sources| sources.iter().map(|(path, _)| path.as_str()).collect())
            .unwrap_or_default()
    }

    /// The version an object path contributes, if any.
    pub fn version_at(&self, path: &str) -> Option<&VersionKey> {
        self.by_path.get(path)
    }

    /// Number of distinct artifact names.
    pub fn artifact_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of rendered versions across all names.
    pub fn version_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// The canonical YAML rendering as of the last regeneration.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn version_cap(&self) -> usize {
        self.version_cap
    }

    pub fn download_url_prefix(&self) -> Option<&str> {
        self.download_url_prefix.as_deref()
    }

    /// Insert the entry loaded from `path`.
    ///
    /// Whatever `path` contributed before is dropped first. An existing entry
    /// with the same name and version is replaced, and the path it came from
    /// keeps backing the version.
    pub fn add_entry(&mut self, path: &str, mut entry: ArtifactVersionEntry) {
        self.remove_path(path);
        self.apply_url_prefix(&mut entry);
        let key = (entry.name.clone(), entry.version.clone());
        self.attach(path.to_string(), key, entry.clone());
        self.place(entry);
    }

    /// Replace whatever `path` previously contributed with `entry`.
    pub fn update_entry(&mut self, path: &str, entry: ArtifactVersionEntry) {
        self.add_entry(path, entry);
    }

    /// Whether `path` backs an indexed version.
    pub fn is_indexed(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    /// Drop `path` as a source. Unknown paths are a no-op.
    ///
    /// Returns the removed entry when `path` was the version's last backing
    /// object. Otherwise the version stays, indexed from a remaining object.
    pub fn remove_path(&mut self, path: &str) -> Option<ArtifactVersionEntry> {
        let key = self.by_path.remove(path)?;
        let survivor = self.sources.get_mut(&key).and_then(|sources| {
            sources.retain(|(source, _)| source != path);
            sources.last().map(|(_, entry)| entry.clone())
        });

        match survivor {
            Some(entry) => {
                debug!(
                    tenant = %self.tenant,
                    name = %key.0,
                    version = %key.1,
                    path = %path,
                    "Version still backed by another object"
                );
                self.place(entry);
                None
            }
            None => {
                self.sources.remove(&key);
                self.remove_version(&key.0, &key.1)
            }
        }
    }

    /// Remove a version and forget every object backing it.
    pub fn remove_entry(&mut self, name: &str, version: &str) -> Option<ArtifactVersionEntry> {
        let key = (name.to_string(), version.to_string());
        for (path, _) in self.sources.remove(&key).unwrap_or_default() {
            self.by_path.remove(&path);
        }
        self.remove_version(name, version)
    }

    /// Re-render the index and stamp `generated` to the current second.
    pub fn regenerate(&mut self) -> StowageResult<()> {
        let generated = Utc::now().trunc_subsecs(0);
        let document = IndexDocumentRef {
            api_version: INDEX_API_VERSION,
            entries: &self.entries,
            generated,
        };
        let raw = serde_yaml::to_string(&document).map_err(|e| StowageError::Serialization {
            reason: format!("failed to render index for {}: {}", self.tenant, e),
        })?;

        self.raw = raw.into_bytes();
        self.generated_at = generated;
        self.dirty = false;
        Ok(())
    }

    fn apply_url_prefix(&self, entry: &mut ArtifactVersionEntry) {
        let Some(prefix) = &self.download_url_prefix else {
            return;
        };
        for url in &mut entry.urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                *url = format!("{}/{}", prefix, url.trim_start_matches('/'));
            }
        }
    }

    fn attach(&mut self, path: String, key: VersionKey, entry: ArtifactVersionEntry) {
        self.by_path.insert(path.clone(), key.clone());
        self.sources.entry(key).or_default().push((path, entry));
    }

    /// Put `entry` in its sorted position, replacing the same version.
    fn place(&mut self, entry: ArtifactVersionEntry) {
        let name = entry.name.clone();
        let mut all = self.take_versions(&name);
        all.retain(|e| e.version != entry.version);
        let at = all.partition_point(|e| newest_first(&e.version, &entry.version) != Ordering::Greater);
        all.insert(at, entry);
        self.store_versions(name, all);
    }

    fn remove_version(&mut self, name: &str, version: &str) -> Option<ArtifactVersionEntry> {
        let mut all = self.take_versions(name);
        let removed = all
            .iter()
            .position(|e| e.version == version)
            .map(|position| all.remove(position));
        self.store_versions(name.to_string(), all);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Rendered and overflow versions of `name` as one newest-first list.
    fn take_versions(&mut self, name: &str) -> Vec<ArtifactVersionEntry> {
        let mut all = self.entries.remove(name).unwrap_or_default();
        all.extend(self.overflow.remove(name).unwrap_or_default());
        all
    }

    /// Split a newest-first list at the cap and store both halves.
    fn store_versions(&mut self, name: String, mut all: Vec<ArtifactVersionEntry>) {
        if all.is_empty() {
            return;
        }
        if self.version_cap > 0 && all.len() > self.version_cap {
            let held = all.split_off(self.version_cap);
            debug!(
                tenant = %self.tenant,
                name = %name,
                held = held.len(),
                cap = self.version_cap,
                "Versions over cap held back"
            );
            self.overflow.insert(name.clone(), held);
        }
        self.entries.insert(name, all);
        self.dirty = true;
    }
}
