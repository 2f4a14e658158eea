//! Cache module - reference-counted metadata caches with a transaction
//! safety net

pub mod metadata_cache;

pub use metadata_cache::{CacheStats, MetadataCache, PinTracker, PinnedCache};
