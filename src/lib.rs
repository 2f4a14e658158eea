//! spandb - metadata layer for partitioned logical tables
//!
//! A logical table looks like one table but is physically many independent
//! partitions. This crate keeps the metadata side of that illusion honest:
//!
//! ## Architecture
//! - Cache layer: reference-counted descriptor cache with a unit-of-work
//!   safety net (no stale pointers, no leaked pins, abort-safe)
//! - Catalog layer: durable logical-table and partition records + the
//!   descriptor registry
//! - Dispatch layer: pre/post hooks around every schema-modification
//!   statement, validating against partitioning invariants and fanning
//!   structural changes out to every partition
//! - Reorganizer: CLUSTER-style rewrites that give each partition its own
//!   unit of work
//!
//! The host environment supplies parsing, physical storage, and name
//! resolution through the `host` collaborator traits.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod extension;
pub mod host;
pub mod sql;
pub mod txn;
pub mod types;

mod error;

pub use cache::{CacheStats, MetadataCache, PinTracker};
pub use catalog::{Catalog, LogicalTableRegistry};
pub use config::{EngineConfig, LeakPolicy};
pub use dispatch::{
    CommandDispatcher, DimensionCoverageVerifier, HookOutcome, MultiTransactionReorganizer,
};
pub use error::{MetaError, Result};
pub use extension::{ExtensionTracker, InstallProbe, InstallState};
pub use host::{MemoryHost, PartitionBackend, PartitionEnumerator};
pub use sql::SchemaStatement;
pub use txn::Session;
pub use types::{Dimension, DimensionKind, LogicalTable, PartitionRef, RelationId};
