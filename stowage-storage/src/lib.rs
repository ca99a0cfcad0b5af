//! STOWAGE Storage - Object Storage Port and Backends
//!
//! Defines the storage abstraction the index cache lists and fetches through,
//! the pure diff between two listings, and the bundled backends.

pub mod diff;
pub mod local;
pub mod memory;
pub mod retrying;

pub use diff::{diff_objects, ObjectSetDiff};
pub use local::LocalFilesystemStorage;
pub use memory::MemoryStorage;
pub use retrying::RetryingStorage;

use std::sync::Arc;

use async_trait::async_trait;
use stowage_core::{StorageError, StorageObject};

/// Object storage port.
///
/// Paths passed to `get_object`, `put_object` and `delete_object` are full
/// paths from the storage root. `list_objects` returns every object below
/// `prefix` (recursively) with paths relative to `prefix`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// List all objects under a prefix. A missing prefix lists as empty.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StorageObject>, StorageError>;

    /// Fetch the bytes of one object.
    async fn get_object(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or replace one object.
    async fn put_object(&self, path: &str, content: &[u8]) -> Result<(), StorageError>;

    /// Delete one object. Deleting a missing object is `NotFound`.
    async fn delete_object(&self, path: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StorageObject>, StorageError> {
        (**self).list_objects(prefix).await
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        (**self).get_object(path).await
    }

    async fn put_object(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        (**self).put_object(path, content).await
    }

    async fn delete_object(&self, path: &str) -> Result<(), StorageError> {
        (**self).delete_object(path).await
    }
}

/// Strip `prefix/` from a full path, or `None` if the path is outside it.
///
/// An empty prefix matches every path.
pub(crate) fn relative_to<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Some(path);
    }
    path.strip_prefix(prefix)?.strip_prefix('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_to_respects_segment_boundary() {
        assert_eq!(relative_to("org1/a.tgz", "org1"), Some("a.tgz"));
        assert_eq!(relative_to("org1/team/a.tgz", "org1/"), Some("team/a.tgz"));
        assert_eq!(relative_to("org10/a.tgz", "org1"), None);
        assert_eq!(relative_to("a.tgz", ""), Some("a.tgz"));
    }
}
