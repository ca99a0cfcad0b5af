//! Stored object identity and path helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored blob as reported by a storage listing.
///
/// Identity is `path`. Two objects with the same path and the same
/// `last_modified` are the same object; a different `last_modified` for the
/// same path means the object was rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageObject {
    /// Path relative to the prefix the object was listed under.
    pub path: String,
    pub last_modified: DateTime<Utc>,
}

impl StorageObject {
    pub fn new(path: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            last_modified,
        }
    }

    /// The final path segment.
    pub fn file_name(&self) -> &str {
        file_name(&self.path)
    }

    /// True when the object sits directly under the listed prefix.
    pub fn is_top_level(&self) -> bool {
        !self.path.trim_start_matches('/').contains('/')
    }

    pub fn has_extension(&self, extension: &str) -> bool {
        !extension.is_empty() && self.path.ends_with(extension)
    }
}

/// The final segment of a slash-separated path or URL.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a tenant prefix and a relative path with exactly one separator.
///
/// An empty tenant is the storage root.
pub fn join_path(tenant: &str, path: &str) -> String {
    let tenant = tenant.trim_matches('/');
    let path = path.trim_start_matches('/');
    if tenant.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", tenant, path)
    }
}
