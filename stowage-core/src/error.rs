//! Error types for STOWAGE operations

use std::time::Duration;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The backend could not be reached or failed at the transport level.
    #[error("Storage unavailable during {operation}: {reason}")]
    Unavailable { operation: String, reason: String },

    #[error("Object not found: {path}")]
    NotFound { path: String },

    #[error("Storage {operation} on {path} timed out after {after:?}")]
    Timeout {
        operation: String,
        path: String,
        after: Duration,
    },

    #[error("Storage {operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<StorageError>,
    },
}

impl StorageError {
    /// Build an `Unavailable` error for the given operation.
    pub fn unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Build a `NotFound` error for the given path.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Whether this is a missing-object error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Artifact package parse errors.
///
/// These are always scoped to a single object and never fail a regeneration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid version {version}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Malformed package: {reason}")]
    Malformed { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for all STOWAGE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StowageError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// An index lookup miss. Surfaced to callers as a 404, not an internal error.
    #[error("{}", not_found_message(name, version.as_deref()))]
    NotFound {
        name: String,
        version: Option<String>,
    },

    #[error("Tenant {tenant} has reached its object limit of {limit}")]
    CapacityExceeded { tenant: String, limit: usize },

    #[error("{path} already exists")]
    Conflict { path: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    /// Metrics registration or subscriber installation failed.
    #[error("Telemetry error: {reason}")]
    Telemetry { reason: String },
}

fn not_found_message(name: &str, version: Option<&str>) -> String {
    match version {
        Some(version) => format!("Artifact {} version {} not found", name, version),
        None => format!("Artifact {} not found", name),
    }
}

impl StowageError {
    /// Whether this error came from the storage backend itself.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for STOWAGE operations.
pub type StowageResult<T> = Result<T, StowageError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_unavailable() {
        let err = StorageError::unavailable("list", "connection refused");
        let msg = format!("{}", err);
        assert!(msg.contains("Storage unavailable"));
        assert!(msg.contains("list"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_storage_error_display_retries_exhausted() {
        let err = StorageError::RetriesExhausted {
            operation: "get".to_string(),
            attempts: 3,
            last: Box::new(StorageError::unavailable("get", "503")),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(StorageError::unavailable("put", "reset").is_retryable());
        assert!(!StorageError::not_found("a.tgz").is_retryable());
        assert!(!StorageError::Timeout {
            operation: "get".to_string(),
            path: "a.tgz".to_string(),
            after: Duration::from_millis(10),
        }
        .is_retryable());
    }

    #[test]
    fn test_not_found_display_with_and_without_version() {
        let err = StowageError::NotFound {
            name: "mychart".to_string(),
            version: Some("0.1.0".to_string()),
        };
        assert_eq!(err.to_string(), "Artifact mychart version 0.1.0 not found");

        let err = StowageError::NotFound {
            name: "mychart".to_string(),
            version: None,
        };
        assert_eq!(err.to_string(), "Artifact mychart not found");
    }

    #[test]
    fn test_stowage_error_from_variants() {
        let storage = StowageError::from(StorageError::not_found("x"));
        assert!(matches!(storage, StowageError::Storage(_)));
        assert!(storage.is_infrastructure());

        let parse = StowageError::from(ParseError::MissingField {
            field: "name".to_string(),
        });
        assert!(matches!(parse, StowageError::Parse(_)));
        assert!(!parse.is_infrastructure());

        let config = StowageError::from(ConfigError::InvalidValue {
            field: "fetch_concurrency".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
        assert!(matches!(config, StowageError::Config(_)));
    }

    #[test]
    fn test_capacity_exceeded_display() {
        let err = StowageError::CapacityExceeded {
            tenant: "org1/team1".to_string(),
            limit: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("org1/team1"));
        assert!(msg.contains('2'));
    }
}
