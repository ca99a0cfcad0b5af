//! Persisted cache state.
//!
//! The statefile is the rendered index plus the known object set, stored at
//! `{tenant}/index-cache.yaml`. A cold cache entry seeds itself from it so a
//! restart does not re-fetch every package.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_core::{
    file_name, join_path, ArtifactVersionEntry, StorageObject, StowageError, StowageResult,
};
use stowage_storage::StorageBackend;
use tracing::{debug, info, warn};

use crate::index::{ArtifactIndex, VersionKey, INDEX_API_VERSION};

/// File name of the statefile inside a tenant prefix.
pub const STATEFILE_NAME: &str = "index-cache.yaml";

/// Full storage path of a tenant's statefile.
pub fn statefile_path(tenant: &str) -> String {
    join_path(tenant, STATEFILE_NAME)
}

/// One known object and the version it was indexed as.
///
/// `name` and `version` are absent for objects that did not parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownObject {
    pub path: String,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl KnownObject {
    fn version_key(&self) -> Option<VersionKey> {
        Some((self.name.clone()?, self.version.clone()?))
    }
}

impl From<&KnownObject> for StorageObject {
    fn from(object: &KnownObject) -> Self {
        StorageObject::new(object.path.clone(), object.last_modified)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statefile {
    pub api_version: String,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ArtifactVersionEntry>>,
    #[serde(default = "unix_epoch")]
    pub generated: DateTime<Utc>,
    /// Versions held back by the version cap.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overflow: BTreeMap<String, Vec<ArtifactVersionEntry>>,
    /// Known object set. Older statefiles omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects: Option<Vec<KnownObject>>,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl Statefile {
    pub fn capture(index: &ArtifactIndex, known_objects: &[StorageObject]) -> Self {
        let objects = known_objects
            .iter()
            .map(|object| {
                let key = index.version_at(&object.path);
                KnownObject {
                    path: object.path.clone(),
                    last_modified: object.last_modified,
                    name: key.map(|(name, _)| name.clone()),
                    version: key.map(|(_, version)| version.clone()),
                }
            })
            .collect();

        Self {
            api_version: INDEX_API_VERSION.to_string(),
            entries: index.entries().clone(),
            generated: index.generated_at(),
            overflow: index.overflow().clone(),
            objects: Some(objects),
        }
    }

    pub fn to_yaml(&self) -> StowageResult<Vec<u8>> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| StowageError::Serialization {
                reason: format!("failed to render statefile: {}", e),
            })
    }

    pub fn from_yaml(raw: &[u8]) -> StowageResult<Self> {
        serde_yaml::from_slice(raw).map_err(|e| StowageError::Serialization {
            reason: format!("invalid statefile: {}", e),
        })
    }

    /// The known object set, derived from the entries when not persisted.
    ///
    /// A derived object's path is the file name of the entry's first URL and
    /// its modification time is the entry's `created`.
    pub fn known_objects(&self) -> Vec<StorageObject> {
        if let Some(objects) = &self.objects {
            return objects.iter().map(StorageObject::from).collect();
        }
        self.entries
            .values()
            .chain(self.overflow.values())
            .flatten()
            .filter_map(|entry| {
                let url = entry.urls.first()?;
                Some(StorageObject::new(file_name(url), entry.created))
            })
            .collect()
    }

    /// Split into a dirty index and the known object set.
    ///
    /// Object paths are mapped to the versions recorded with them. Versions
    /// with no recorded object fall back to their first URL's file name.
    pub fn into_parts(
        self,
        tenant: &str,
        version_cap: usize,
        download_url_prefix: Option<String>,
    ) -> (ArtifactIndex, Vec<StorageObject>) {
        let known = self.known_objects();
        let backing: Vec<_> = self
            .objects
            .iter()
            .flatten()
            .filter_map(|object| Some((object.path.clone(), object.version_key()?)))
            .collect();
        let entries = self
            .entries
            .into_values()
            .chain(self.overflow.into_values())
            .flatten();
        let index =
            ArtifactIndex::from_entries(tenant, version_cap, download_url_prefix, entries, backing);
        (index, known)
    }
}

/// Read a tenant's statefile.
///
/// Returns `None` for a cold start: missing, unreadable and unparsable
/// statefiles are all treated the same way.
pub async fn load(storage: &dyn StorageBackend, tenant: &str) -> Option<Statefile> {
    let path = statefile_path(tenant);
    let raw = match storage.get_object(&path).await {
        Ok(raw) => raw,
        Err(e) if e.is_not_found() => {
            debug!(tenant = %tenant, path = %path, "No statefile, starting cold");
            return None;
        }
        Err(e) => {
            warn!(tenant = %tenant, path = %path, error = %e, "Could not read statefile, starting cold");
            return None;
        }
    };

    match Statefile::from_yaml(&raw) {
        Ok(statefile) => {
            info!(
                tenant = %tenant,
                versions = statefile.entries.values().map(Vec::len).sum::<usize>(),
                "Loaded index from statefile"
            );
            Some(statefile)
        }
        Err(e) => {
            warn!(tenant = %tenant, path = %path, error = %e, "Unparsable statefile, starting cold");
            None
        }
    }
}

/// Write a tenant's statefile. Failures are logged and swallowed.
pub async fn store(
    storage: &dyn StorageBackend,
    tenant: &str,
    index: &ArtifactIndex,
    known_objects: &[StorageObject],
) {
    let path = statefile_path(tenant);
    let raw = match Statefile::capture(index, known_objects).to_yaml() {
        Ok(raw) => raw,
        Err(e) => {
            warn!(tenant = %tenant, error = %e, "Could not render statefile");
            return;
        }
    };

    match storage.put_object(&path, &raw).await {
        Ok(()) => debug!(tenant = %tenant, path = %path, bytes = raw.len(), "Wrote statefile"),
        Err(e) => warn!(tenant = %tenant, path = %path, error = %e, "Could not write statefile"),
    }
}
