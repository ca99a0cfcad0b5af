//! Per-tenant cache entries, their registry and the regeneration worker.

pub mod entry;
pub mod regenerate;
pub mod registry;

pub use entry::{CacheEntry, EntryState};
pub use regenerate::{RegenerationReport, SkippedObject};
pub use registry::CacheRegistry;

pub(crate) use regenerate::Regeneration;
