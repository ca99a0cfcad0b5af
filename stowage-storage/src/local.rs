//! Local filesystem storage backend.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stowage_core::{StorageError, StorageObject};
use tracing::debug;

use crate::StorageBackend;

/// Stores objects as files under a root directory.
///
/// Object paths map directly to relative file paths. A prefix whose directory
/// does not exist lists as empty.
#[derive(Debug, Clone)]
pub struct LocalFilesystemStorage {
    root: PathBuf,
}

fn io_error(operation: &str, path: &str, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::not_found(path)
    } else {
        StorageError::unavailable(operation, format!("{}: {}", path, err))
    }
}

impl LocalFilesystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object path under the root, refusing anything that escapes it.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StorageError::not_found(path));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageBackend for LocalFilesystemStorage {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StorageObject>, StorageError> {
        let base = match self.resolve(prefix.trim_matches('/')) {
            Ok(base) => base,
            Err(_) => return Ok(Vec::new()),
        };

        let mut objects = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_error("list", &dir.to_string_lossy(), err)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error("list", &dir.to_string_lossy(), e))?
            {
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|e| io_error("list", &entry.path().to_string_lossy(), e))?;
                let file_path = entry.path();

                if metadata.is_dir() {
                    pending.push(file_path);
                    continue;
                }

                let Ok(relative) = file_path.strip_prefix(&base) else {
                    continue;
                };
                let relative = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let modified = metadata
                    .modified()
                    .map_err(|e| io_error("list", &relative, e))?;

                objects.push(StorageObject::new(relative, DateTime::<Utc>::from(modified)));
            }
        }

        objects.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(prefix = %prefix, count = objects.len(), "Listed local objects");
        Ok(objects)
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let file = self.resolve(path)?;
        tokio::fs::read(&file)
            .await
            .map_err(|e| io_error("get", path, e))
    }

    async fn put_object(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("put", path, e))?;
        }
        tokio::fs::write(&file, content)
            .await
            .map_err(|e| io_error("put", path, e))
    }

    async fn delete_object(&self, path: &str) -> Result<(), StorageError> {
        let file = self.resolve(path)?;
        tokio::fs::remove_file(&file)
            .await
            .map_err(|e| io_error("delete", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_prefix_lists_empty() {
        let dir = TempDir::new().unwrap();
        let storage = LocalFilesystemStorage::new(dir.path());
        assert!(storage.list_objects("org1/team1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_roundtrip_and_relative_listing() {
        let dir = TempDir::new().unwrap();
        let storage = LocalFilesystemStorage::new(dir.path());

        storage.put_object("org1/a-0.1.0.tgz", b"a").await.unwrap();
        storage.put_object("org1/nested/b-0.1.0.tgz", b"b").await.unwrap();
        storage.put_object("other/c-0.1.0.tgz", b"c").await.unwrap();

        let listed = storage.list_objects("org1").await.unwrap();
        let paths: Vec<&str> = listed.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(paths, vec!["a-0.1.0.tgz", "nested/b-0.1.0.tgz"]);

        assert_eq!(storage.get_object("org1/a-0.1.0.tgz").await.unwrap(), b"a");

        storage.delete_object("org1/a-0.1.0.tgz").await.unwrap();
        let err = storage.get_object("org1/a-0.1.0.tgz").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let storage = LocalFilesystemStorage::new(dir.path());
        assert!(storage.get_object("../etc/passwd").await.is_err());
        assert!(storage.put_object("a/../../x", b"x").await.is_err());
    }
}
