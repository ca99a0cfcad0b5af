//! Index cache configuration.
//!
//! Loaded from environment variables with defaults suitable for development.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Default extension of indexable package objects.
pub const DEFAULT_ARTIFACT_EXTENSION: &str = ".tgz";

/// Default extension of provenance files stored next to packages.
pub const DEFAULT_PROVENANCE_EXTENSION: &str = ".prov";

/// Default number of object fetches in flight during one regeneration.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Configuration for the repository index cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Maximum versions kept per artifact name in the index. 0 = unlimited.
    pub version_cap: usize,

    /// Prefix applied to every relative download URL.
    pub download_url_prefix: Option<String>,

    /// Seed cold entries from, and write through to, the tenant statefile.
    pub use_statefile: bool,

    /// Maximum artifact and provenance objects per tenant. 0 = unlimited.
    pub max_objects_per_tenant: usize,

    /// Whether uploads may replace an existing object.
    pub allow_overwrite: bool,

    pub artifact_extension: String,
    pub provenance_extension: String,

    /// Deadline for a tenant listing. A timeout aborts the refresh.
    pub list_timeout: Option<Duration>,

    /// Deadline for a single object fetch. A timeout skips the object.
    pub fetch_timeout: Option<Duration>,

    pub fetch_concurrency: usize,

    /// Return the last good snapshot alongside the error when storage fails.
    pub serve_stale_on_error: bool,

    pub retry: RetryPolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            version_cap: 0,
            download_url_prefix: None,
            use_statefile: false,
            max_objects_per_tenant: 0,
            allow_overwrite: false,
            artifact_extension: DEFAULT_ARTIFACT_EXTENSION.to_string(),
            provenance_extension: DEFAULT_PROVENANCE_EXTENSION.to_string(),
            list_timeout: None,
            fetch_timeout: None,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            serve_stale_on_error: false,
            retry: RetryPolicy::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
}

impl IndexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create IndexConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STOWAGE_VERSION_CAP`: Versions kept per name (default: 0, unlimited)
    /// - `STOWAGE_DOWNLOAD_URL_PREFIX`: Prefix for download URLs (default: unset)
    /// - `STOWAGE_USE_STATEFILE`: "true" or "false" (default: false)
    /// - `STOWAGE_MAX_OBJECTS_PER_TENANT`: Object cap per tenant (default: 0, unlimited)
    /// - `STOWAGE_ALLOW_OVERWRITE`: "true" or "false" (default: false)
    /// - `STOWAGE_LIST_TIMEOUT_MS`: Listing deadline in milliseconds (default: unset)
    /// - `STOWAGE_FETCH_TIMEOUT_MS`: Per-object fetch deadline in milliseconds (default: unset)
    /// - `STOWAGE_FETCH_CONCURRENCY`: Parallel fetches per regeneration (default: 8)
    /// - `STOWAGE_SERVE_STALE_ON_ERROR`: "true" or "false" (default: false)
    /// - `STOWAGE_RETRY_MAX_ATTEMPTS`: Attempts per storage call (default: 1)
    /// - `STOWAGE_RETRY_DELAY_MS`: Delay between attempts (default: 100)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let download_url_prefix = std::env::var("STOWAGE_DOWNLOAD_URL_PREFIX")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let retry = RetryPolicy::new(
            env_parse::<u64>("STOWAGE_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.delay),
            env_parse("STOWAGE_RETRY_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts),
        );

        Self {
            version_cap: env_parse("STOWAGE_VERSION_CAP").unwrap_or(defaults.version_cap),
            download_url_prefix,
            use_statefile: env_flag("STOWAGE_USE_STATEFILE").unwrap_or(defaults.use_statefile),
            max_objects_per_tenant: env_parse("STOWAGE_MAX_OBJECTS_PER_TENANT")
                .unwrap_or(defaults.max_objects_per_tenant),
            allow_overwrite: env_flag("STOWAGE_ALLOW_OVERWRITE")
                .unwrap_or(defaults.allow_overwrite),
            list_timeout: env_parse::<u64>("STOWAGE_LIST_TIMEOUT_MS").map(Duration::from_millis),
            fetch_timeout: env_parse::<u64>("STOWAGE_FETCH_TIMEOUT_MS").map(Duration::from_millis),
            fetch_concurrency: env_parse("STOWAGE_FETCH_CONCURRENCY")
                .unwrap_or(defaults.fetch_concurrency),
            serve_stale_on_error: env_flag("STOWAGE_SERVE_STALE_ON_ERROR")
                .unwrap_or(defaults.serve_stale_on_error),
            retry,
            ..defaults
        }
    }

    pub fn with_version_cap(mut self, cap: usize) -> Self {
        self.version_cap = cap;
        self
    }

    pub fn with_download_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.download_url_prefix = Some(prefix.into());
        self
    }

    pub fn with_statefile(mut self, enabled: bool) -> Self {
        self.use_statefile = enabled;
        self
    }

    pub fn with_max_objects(mut self, max: usize) -> Self {
        self.max_objects_per_tenant = max;
        self
    }

    pub fn with_overwrite(mut self, allowed: bool) -> Self {
        self.allow_overwrite = allowed;
        self
    }

    pub fn with_artifact_extension(mut self, extension: impl Into<String>) -> Self {
        self.artifact_extension = extension.into();
        self
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = Some(timeout);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency;
        self
    }

    pub fn with_stale_on_error(mut self, enabled: bool) -> Self {
        self.serve_stale_on_error = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - fetch_concurrency > 0
    /// - artifact_extension is non-empty and differs from provenance_extension
    /// - timeouts, when set, are positive
    /// - the download URL prefix does not end with a slash
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fetch_concurrency".to_string(),
                value: self.fetch_concurrency.to_string(),
                reason: "fetch_concurrency must be greater than 0".to_string(),
            });
        }

        if self.artifact_extension.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "artifact_extension".to_string(),
                value: String::new(),
                reason: "artifact_extension must not be empty".to_string(),
            });
        }

        if self.artifact_extension == self.provenance_extension {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "artifact_extension".to_string(),
                option_b: "provenance_extension".to_string(),
            });
        }

        for (field, timeout) in [
            ("list_timeout", self.list_timeout),
            ("fetch_timeout", self.fetch_timeout),
        ] {
            if let Some(timeout) = timeout {
                if timeout.is_zero() {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        value: format!("{:?}", timeout),
                        reason: format!("{} must be positive", field),
                    });
                }
            }
        }

        if let Some(prefix) = &self.download_url_prefix {
            if prefix.ends_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "download_url_prefix".to_string(),
                    value: prefix.clone(),
                    reason: "download_url_prefix must not end with '/'".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IndexConfig::default();
        assert_eq!(config.version_cap, 0);
        assert!(config.download_url_prefix.is_none());
        assert!(!config.use_statefile);
        assert_eq!(config.max_objects_per_tenant, 0);
        assert!(!config.allow_overwrite);
        assert_eq!(config.artifact_extension, ".tgz");
        assert_eq!(config.provenance_extension, ".prov");
        assert_eq!(config.fetch_concurrency, DEFAULT_FETCH_CONCURRENCY);
        assert!(!config.serve_stale_on_error);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = IndexConfig::new()
            .with_version_cap(2)
            .with_download_url_prefix("https://charts.example.com")
            .with_statefile(true)
            .with_max_objects(10)
            .with_overwrite(true)
            .with_list_timeout(Duration::from_secs(5))
            .with_fetch_timeout(Duration::from_secs(1))
            .with_fetch_concurrency(4)
            .with_stale_on_error(true)
            .with_retry(RetryPolicy::new(Duration::from_millis(10), 3));

        assert_eq!(config.version_cap, 2);
        assert_eq!(
            config.download_url_prefix.as_deref(),
            Some("https://charts.example.com")
        );
        assert!(config.use_statefile);
        assert_eq!(config.max_objects_per_tenant, 10);
        assert!(config.allow_overwrite);
        assert_eq!(config.list_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.fetch_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.fetch_concurrency, 4);
        assert!(config.serve_stale_on_error);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = IndexConfig::new().with_fetch_concurrency(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "fetch_concurrency"
        ));
    }

    #[test]
    fn test_validate_rejects_same_extensions() {
        let config = IndexConfig::new().with_artifact_extension(".prov");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompatibleOptions { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_trailing_slash() {
        let config = IndexConfig::new().with_fetch_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = IndexConfig::new().with_download_url_prefix("https://x/");
        assert!(config.validate().is_err());
    }
}
