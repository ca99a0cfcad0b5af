//! STOWAGE Cache - Per-Tenant Repository Index
//!
//! Keeps each tenant's `index.yaml` consistent with object storage by
//! listing and diffing on every read, and re-parsing only objects that
//! changed.
//!
//! # Layers
//!
//! - [`index`]: the versioned, capped artifact index and its rendering
//! - [`cache`]: per-tenant entries, the registry and the regeneration worker
//! - [`statefile`]: persisted state for warm restarts
//! - [`index_cache`]: the orchestrator tying storage, parser and entries
//! - [`service`]: repository operations for an API layer
//! - [`telemetry`]: Prometheus metrics and tracing setup

pub mod cache;
pub mod index;
pub mod index_cache;
pub mod service;
pub mod statefile;
pub mod telemetry;
pub mod version;

pub use cache::{CacheEntry, CacheRegistry, EntryState, RegenerationReport, SkippedObject};
pub use index::{ArtifactIndex, IndexDocument, VersionKey, INDEX_API_VERSION};
pub use index_cache::{IndexCache, IndexRead, Refresh};
pub use service::{ArtifactListing, RepositoryService, LATEST_VERSION};
pub use statefile::{statefile_path, KnownObject, Statefile, STATEFILE_NAME};
pub use telemetry::{gather_text, init_tracing, StowageMetrics, METRICS};
pub use version::{newest_first, parse_version};
