//! STOWAGE Core - Value Types
//!
//! Storage object identity, artifact index entries, the parser port, the
//! error taxonomy and configuration. All other crates depend on this.

pub mod artifact;
pub mod config;
pub mod error;
pub mod object;
pub mod retry;

pub use artifact::{
    compute_digest, package_file_name, ArtifactMetadata, ArtifactParser, ArtifactVersionEntry,
    Maintainer,
};
pub use config::{
    IndexConfig, DEFAULT_ARTIFACT_EXTENSION, DEFAULT_FETCH_CONCURRENCY,
    DEFAULT_PROVENANCE_EXTENSION,
};
pub use error::{ConfigError, ParseError, StorageError, StowageError, StowageResult};
pub use object::{file_name, join_path, StorageObject};
pub use retry::RetryPolicy;

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
