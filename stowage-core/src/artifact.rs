//! Artifact version entries and the parser port.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ParseError;
use crate::object::StorageObject;

/// A person responsible for an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Descriptive metadata extracted from a package.
///
/// Everything here is optional; only `name` and `version` on the entry itself
/// are required.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// One version of one artifact as listed in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactVersionEntry {
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub metadata: ArtifactMetadata,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "unix_epoch")]
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl ArtifactVersionEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            metadata: ArtifactMetadata::default(),
            urls: Vec::new(),
            created: DateTime::UNIX_EPOCH,
            digest: String::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: ArtifactMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    /// Reject entries that cannot be placed in an index.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.name.trim().is_empty() {
            return Err(ParseError::MissingField {
                field: "name".to_string(),
            });
        }
        if self.version.trim().is_empty() {
            return Err(ParseError::MissingField {
                field: "version".to_string(),
            });
        }
        if self.name.contains('/') {
            return Err(ParseError::Malformed {
                reason: format!("artifact name {} contains a path separator", self.name),
            });
        }
        Ok(())
    }

    /// Fill in the fields that come from storage rather than from the package.
    ///
    /// `created` always tracks the object's modification time so the known
    /// object set can be rebuilt from a persisted index.
    pub fn stamp(&mut self, object: &StorageObject, content: &[u8]) {
        self.created = object.last_modified;
        if self.digest.is_empty() {
            self.digest = compute_digest(content);
        }
        if self.urls.is_empty() {
            self.urls.push(object.file_name().to_string());
        }
    }

    /// The storage file name for this version.
    pub fn package_file_name(&self, extension: &str) -> String {
        package_file_name(&self.name, &self.version, extension)
    }
}

/// `{name}-{version}{extension}`, the conventional package file name.
pub fn package_file_name(name: &str, version: &str, extension: &str) -> String {
    format!("{}-{}{}", name, version, extension)
}

/// Lowercase hex SHA-256 of the package bytes.
pub fn compute_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Extracts an index entry from raw package bytes.
///
/// Implementations must be deterministic and must not depend on anything
/// other than the bytes they are given.
pub trait ArtifactParser: Send + Sync {
    fn parse(&self, content: &[u8]) -> Result<ArtifactVersionEntry, ParseError>;
}

impl<F> ArtifactParser for F
where
    F: Fn(&[u8]) -> Result<ArtifactVersionEntry, ParseError> + Send + Sync,
{
    fn parse(&self, content: &[u8]) -> Result<ArtifactVersionEntry, ParseError> {
        self(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validate_rejects_missing_fields() {
        let err = ArtifactVersionEntry::new("", "1.0.0").validate().unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingField {
                field: "name".to_string()
            }
        );

        let err = ArtifactVersionEntry::new("mychart", " ").validate().unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingField {
                field: "version".to_string()
            }
        );

        assert!(ArtifactVersionEntry::new("a/b", "1.0.0").validate().is_err());
        assert!(ArtifactVersionEntry::new("mychart", "1.0.0").validate().is_ok());
    }

    #[test]
    fn test_stamp_fills_storage_fields() {
        let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let object = StorageObject::new("mychart-0.1.0.tgz", modified);
        let mut entry = ArtifactVersionEntry::new("mychart", "0.1.0");

        entry.stamp(&object, b"content");

        assert_eq!(entry.created, modified);
        assert_eq!(entry.urls, vec!["mychart-0.1.0.tgz".to_string()]);
        assert_eq!(entry.digest, compute_digest(b"content"));
        assert_eq!(entry.digest.len(), 64);
    }

    #[test]
    fn test_stamp_keeps_parser_supplied_digest_and_urls() {
        let object = StorageObject::new("x.tgz", Utc::now());
        let mut entry = ArtifactVersionEntry::new("x", "1.0.0")
            .with_urls(vec!["custom/x.tgz".to_string()]);
        entry.digest = "abc".to_string();

        entry.stamp(&object, b"bytes");

        assert_eq!(entry.urls, vec!["custom/x.tgz".to_string()]);
        assert_eq!(entry.digest, "abc");
    }

    #[test]
    fn test_closure_parser() {
        let parser = |content: &[u8]| -> Result<ArtifactVersionEntry, ParseError> {
            let text = std::str::from_utf8(content).map_err(|e| ParseError::Malformed {
                reason: e.to_string(),
            })?;
            let (name, version) = text.split_once('@').ok_or(ParseError::Malformed {
                reason: "expected name@version".to_string(),
            })?;
            Ok(ArtifactVersionEntry::new(name, version))
        };

        let entry = ArtifactParser::parse(&parser, b"mychart@1.2.3").unwrap();
        assert_eq!(entry.name, "mychart");
        assert_eq!(entry.version, "1.2.3");
        assert!(ArtifactParser::parse(&parser, b"garbage").is_err());
    }

    #[test]
    fn test_entry_yaml_flattens_metadata() {
        let mut metadata = ArtifactMetadata::default();
        metadata.description = Some("A chart".to_string());
        metadata.app_version = Some("2.0".to_string());
        let entry = ArtifactVersionEntry::new("mychart", "0.1.0").with_metadata(metadata);

        let yaml = serde_yaml::to_string(&entry).unwrap();
        assert!(yaml.contains("description: A chart"));
        assert!(yaml.contains("appVersion:"));
        assert!(!yaml.contains("keywords"));

        let back: ArtifactVersionEntry = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_entry_without_created_defaults_to_epoch() {
        let yaml = "name: acs-engine-autoscaler\nversion: 2.1.2\nurls:\n- charts/acs-engine-autoscaler-2.1.2.tgz\n";
        let entry: ArtifactVersionEntry = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(entry.created, DateTime::UNIX_EPOCH);
        assert!(entry.digest.is_empty());
    }
}
