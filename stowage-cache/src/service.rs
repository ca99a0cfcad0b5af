//! Repository operations for an API layer.
//!
//! Thin operations over [`IndexCache`]: every read refreshes the tenant's
//! index first, and writes go straight to storage so the next read sees them.

use std::collections::BTreeMap;
use std::sync::Arc;

use stowage_core::{
    join_path, ArtifactVersionEntry, ParseError, StorageObject, StowageError, StowageResult,
};
use tracing::{debug, info, warn};

use crate::index_cache::{IndexCache, IndexRead};

/// Version selector meaning "the newest version".
pub const LATEST_VERSION: &str = "latest";

/// Artifact listing keyed by name, versions newest first.
pub type ArtifactListing = BTreeMap<String, Vec<ArtifactVersionEntry>>;

#[derive(Debug, Clone)]
pub struct RepositoryService {
    cache: Arc<IndexCache>,
}

impl RepositoryService {
    pub fn new(cache: Arc<IndexCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }

    /// The rendered index, refreshed against storage.
    pub async fn index(&self, tenant: &str) -> StowageResult<IndexRead> {
        self.cache.get_index(tenant).await
    }

    pub async fn list_artifacts(&self, tenant: &str) -> StowageResult<ArtifactListing> {
        let read = self.cache.get_index(tenant).await?;
        Ok(read.index().entries().clone())
    }

    /// All versions of one artifact, newest first.
    pub async fn get_artifact(
        &self,
        tenant: &str,
        name: &str,
    ) -> StowageResult<Vec<ArtifactVersionEntry>> {
        let read = self.cache.get_index(tenant).await?;
        read.index()
            .versions(name)
            .map(<[ArtifactVersionEntry]>::to_vec)
            .ok_or_else(|| StowageError::NotFound {
                name: name.to_string(),
                version: None,
            })
    }

    /// One version of an artifact. `latest` selects the newest.
    pub async fn get_artifact_version(
        &self,
        tenant: &str,
        name: &str,
        version: &str,
    ) -> StowageResult<ArtifactVersionEntry> {
        let read = self.cache.get_index(tenant).await?;
        let index = read.index();
        let found = if version == LATEST_VERSION {
            index.latest(name)
        } else {
            index.get_version(name, version)
        };
        found.cloned().ok_or_else(|| StowageError::NotFound {
            name: name.to_string(),
            version: Some(version.to_string()),
        })
    }

    /// Download a stored package or provenance file.
    pub async fn get_object(&self, tenant: &str, filename: &str) -> StowageResult<Vec<u8>> {
        let not_found = || StowageError::NotFound {
            name: filename.to_string(),
            version: None,
        };
        if filename.contains('/') || !self.is_repository_file(filename) {
            return Err(not_found());
        }

        let path = join_path(tenant, filename);
        match self.cache.storage().get_object(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.is_not_found() => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse and store a package as `{name}-{version}{artifact_extension}`.
    ///
    /// Returns the stored file name.
    pub async fn upload_package(&self, tenant: &str, content: &[u8]) -> StowageResult<String> {
        let filename = self.package_file_name(content)?;
        self.validate_write(tenant, &filename).await?;
        self.put(tenant, &filename, content).await?;
        Ok(filename)
    }

    /// Store a provenance file under the given name.
    pub async fn upload_provenance(
        &self,
        tenant: &str,
        filename: &str,
        content: &[u8],
    ) -> StowageResult<String> {
        self.check_provenance_name(filename)?;
        self.validate_write(tenant, filename).await?;
        self.put(tenant, filename, content).await?;
        Ok(filename.to_string())
    }

    /// Store a package and its provenance file together.
    ///
    /// Both writes are validated before either is performed. If the second
    /// write fails the first is rolled back. Returns the stored file names.
    pub async fn upload_package_and_provenance(
        &self,
        tenant: &str,
        package: &[u8],
        provenance: &[u8],
    ) -> StowageResult<(String, String)> {
        let package_name = self.package_file_name(package)?;
        let provenance_name = self.provenance_file_name(&package_name);

        self.validate_write(tenant, &package_name).await?;
        self.validate_write(tenant, &provenance_name).await?;

        self.put(tenant, &package_name, package).await?;
        if let Err(e) = self.put(tenant, &provenance_name, provenance).await {
            let path = join_path(tenant, &package_name);
            if let Err(cleanup) = self.cache.storage().delete_object(&path).await {
                warn!(tenant = %tenant, path = %path, error = %cleanup, "Rollback of package upload failed");
            }
            return Err(e);
        }
        Ok((package_name, provenance_name))
    }

    /// Delete one version's packages and, if present, their provenance files.
    ///
    /// Every object backing the version is deleted, including versions held
    /// back by the version cap.
    pub async fn delete_artifact_version(
        &self,
        tenant: &str,
        name: &str,
        version: &str,
    ) -> StowageResult<()> {
        let read = self.cache.get_index(tenant).await?;
        let not_found = || StowageError::NotFound {
            name: name.to_string(),
            version: Some(version.to_string()),
        };
        let filenames: Vec<String> = read
            .index()
            .paths_of(name, version)
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut deleted = 0;
        for filename in &filenames {
            if self.delete_package(tenant, filename).await? {
                deleted += 1;
            }
        }
        if deleted == 0 {
            return Err(not_found());
        }
        info!(tenant = %tenant, name = %name, version = %version, objects = deleted, "Deleted version");
        Ok(())
    }

    /// Delete one package object and its provenance file.
    ///
    /// Returns `false` when the package was already gone.
    async fn delete_package(&self, tenant: &str, filename: &str) -> StowageResult<bool> {
        let path = join_path(tenant, filename);
        match self.cache.storage().delete_object(&path).await {
            Ok(()) => debug!(tenant = %tenant, path = %path, "Deleted package"),
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let provenance = join_path(tenant, &self.provenance_file_name(filename));
        match self.cache.storage().delete_object(&provenance).await {
            Ok(()) => debug!(tenant = %tenant, path = %provenance, "Deleted provenance file"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(tenant = %tenant, path = %provenance, error = %e, "Could not delete provenance file"),
        }
        Ok(true)
    }

    /// The artifact listing as JSON, for API adapters.
    pub async fn artifacts_json(&self, tenant: &str) -> StowageResult<String> {
        let listing = self.list_artifacts(tenant).await?;
        serde_json::to_string(&listing).map_err(|e| StowageError::Serialization {
            reason: format!("failed to encode artifact listing: {}", e),
        })
    }

    /// Reject writes that would clobber an object or exceed the tenant cap.
    ///
    /// Overwriting an existing object is never blocked by the cap.
    ///
    /// The check is best-effort. It reads a listing and the write happens
    /// later, so two concurrent uploads of the same file can both pass the
    /// conflict check, and concurrent uploads near the cap can both pass the
    /// capacity check. Storage has no conditional put to close the gap.
    pub async fn validate_write(&self, tenant: &str, filename: &str) -> StowageResult<()> {
        let config = self.cache.config();
        let objects = self.cache.list_tenant_objects(tenant).await?;
        let exists = objects.iter().any(|o| o.path == filename);

        if exists {
            if !config.allow_overwrite {
                return Err(StowageError::Conflict {
                    path: join_path(tenant, filename),
                });
            }
            return Ok(());
        }

        if config.max_objects_per_tenant > 0 {
            let stored = objects
                .iter()
                .filter(|o| o.is_top_level() && self.is_repository_object(o))
                .count();
            if stored >= config.max_objects_per_tenant {
                return Err(StowageError::CapacityExceeded {
                    tenant: tenant.to_string(),
                    limit: config.max_objects_per_tenant,
                });
            }
        }
        Ok(())
    }

    fn package_file_name(&self, content: &[u8]) -> StowageResult<String> {
        let entry = self.cache.parser().parse(content)?;
        entry.validate()?;
        Ok(entry.package_file_name(&self.cache.config().artifact_extension))
    }

    /// `{package}{provenance_extension}`, e.g. `mychart-0.1.0.tgz.prov`.
    fn provenance_file_name(&self, package_name: &str) -> String {
        format!("{}{}", package_name, self.cache.config().provenance_extension)
    }

    fn check_provenance_name(&self, filename: &str) -> Result<(), ParseError> {
        let extension = &self.cache.config().provenance_extension;
        if filename.contains('/') || !filename.ends_with(extension.as_str()) || filename == extension {
            return Err(ParseError::Malformed {
                reason: format!("{} is not a {} file", filename, extension),
            });
        }
        Ok(())
    }

    fn is_repository_file(&self, filename: &str) -> bool {
        let config = self.cache.config();
        filename.ends_with(&config.artifact_extension)
            || filename.ends_with(&config.provenance_extension)
    }

    fn is_repository_object(&self, object: &StorageObject) -> bool {
        self.is_repository_file(&object.path)
    }

    async fn put(&self, tenant: &str, filename: &str, content: &[u8]) -> StowageResult<()> {
        let path = join_path(tenant, filename);
        self.cache.storage().put_object(&path, content).await?;
        info!(tenant = %tenant, path = %path, bytes = content.len(), "Stored object");
        Ok(())
    }
}
