//! Host-environment collaborators
//!
//! The metadata layer validates and fans out schema commands; the physical
//! work (and the name resolution behind it) belongs to the host. These
//! traits are that boundary. `memory` provides an in-process reference host
//! used by embedded callers and the test suite.

pub mod memory;

pub use memory::{MemoryHost, SideEffect};

use crate::error::Result;
use crate::sql::{AlterTableCmd, CreateIndexStmt, ObjectAddress, VacuumStmt};
use crate::types::{
    LogicalTable, PartitionRef, QualifiedName, RelationId, RoutingPoint, Row, TriggerDef,
};

/// Enumerates the current partitions of a logical table. Zero partitions is
/// an empty Vec, never an error.
pub trait PartitionEnumerator: Send + Sync {
    fn partitions_of(&self, table: &LogicalTable) -> Result<Vec<PartitionRef>>;
}

/// Checks a proposed constraint/index key against a logical table's
/// partitioning dimensions.
pub trait ConstraintVerifier: Send + Sync {
    fn verify_columns(&self, table: &LogicalTable, columns: &[String]) -> Result<()>;
}

/// Restores the previous effective identity when dropped, on every exit
/// path including errors.
pub struct IdentityGuard {
    restore: Option<Box<dyn FnOnce() + Send>>,
}

impl IdentityGuard {
    pub fn new(restore: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            restore: Some(restore),
        }
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        if let Some(restore) = self.restore.take() {
            restore();
        }
    }
}

/// Switches the effective identity used for internal metadata writes on
/// partitions, which commonly live in a restricted namespace.
pub trait IdentityManager: Send + Sync {
    fn elevate(&self) -> Result<IdentityGuard>;
}

/// Physical side of the host: name resolution plus the per-partition
/// operations the dispatcher replays. Mirrors the upcall surface of the
/// original catalog procedures.
pub trait PartitionBackend: Send + Sync {
    // resolution
    fn resolve_relation(&self, name: &QualifiedName) -> Option<RelationId>;
    /// Table a given index belongs to.
    fn index_table(&self, index: RelationId) -> Option<RelationId>;
    /// Index relation id by name within a table's namespace.
    fn resolve_index_name(&self, table: RelationId, name: &str) -> Option<RelationId>;
    /// Name of an arbitrary object, for constraints created without one.
    fn object_name(&self, object: RelationId) -> Option<String>;
    fn current_user_owns(&self, table: RelationId) -> Result<bool>;

    // whole-table upcalls
    fn truncate_partitions(&self, table: &LogicalTable, cascade: bool) -> Result<()>;
    fn drop_logical_table_metadata(&self, table: &LogicalTable, cascade: bool) -> Result<()>;
    fn rename_partition_indexes(
        &self,
        table: &LogicalTable,
        index: RelationId,
        new_name: &str,
    ) -> Result<()>;
    fn drop_partition_indexes_of(
        &self,
        table: &LogicalTable,
        index: RelationId,
        drop_physical: bool,
    ) -> Result<()>;
    fn recreate_dimension_constraints(
        &self,
        table: &LogicalTable,
        dimension_column: &str,
    ) -> Result<()>;
    fn set_partition_index_tablespace(
        &self,
        table: &LogicalTable,
        index: RelationId,
        tablespace: &str,
    ) -> Result<()>;

    // per-partition operations
    fn drop_partition(&self, partition: &PartitionRef, cascade: bool) -> Result<()>;
    fn create_index_on_partition(
        &self,
        partition: &PartitionRef,
        stmt: &CreateIndexStmt,
        parent_index: ObjectAddress,
    ) -> Result<()>;
    fn delete_partition_index_metadata(
        &self,
        partition: &PartitionRef,
        index: RelationId,
    ) -> Result<()>;
    /// Rename an index that lives directly on one partition.
    fn rename_partition_index(
        &self,
        partition: &PartitionRef,
        index: RelationId,
        new_name: &str,
    ) -> Result<()>;
    fn create_trigger_on_partition(&self, partition: &PartitionRef, trigger: &str) -> Result<()>;
    fn drop_trigger_on_partition(&self, partition: &PartitionRef, trigger: &str) -> Result<()>;
    fn add_constraint_on_partition(&self, partition: &PartitionRef, name: &str) -> Result<()>;
    fn drop_constraint_on_partition(&self, partition: &PartitionRef, name: &str) -> Result<()>;
    fn change_partition_owner(&self, partition: &PartitionRef, new_owner: &str) -> Result<()>;
    fn alter_partition(&self, partition: &PartitionRef, cmd: &AlterTableCmd) -> Result<()>;
    fn vacuum_partition(&self, partition: &PartitionRef, stmt: &VacuumStmt) -> Result<()>;
    fn reindex_partition(&self, partition: &PartitionRef) -> Result<()>;

    // triggers and constraints on the logical table itself
    fn trigger_on(&self, table: RelationId, name: &str) -> Option<TriggerDef>;
    /// Backing index of a named constraint, when it has one.
    fn constraint_index(&self, table: RelationId, constraint: &str) -> Option<RelationId>;

    // reorganize support
    fn find_clustered_index(&self, table: RelationId) -> Result<Option<RelationId>>;
    fn partition_index_mappings(
        &self,
        table: &LogicalTable,
        index: RelationId,
    ) -> Result<Vec<(PartitionRef, RelationId)>>;
    fn mark_index_clustered(&self, partition: &PartitionRef, index: RelationId) -> Result<()>;
    fn cluster_partition(
        &self,
        partition: &PartitionRef,
        index: RelationId,
        verbose: bool,
    ) -> Result<()>;

    // copy routing
    fn partition_for_point(
        &self,
        table: &LogicalTable,
        point: &RoutingPoint,
    ) -> Result<PartitionRef>;
    fn insert_rows(&self, partition: &PartitionRef, rows: Vec<Row>) -> Result<u64>;
    /// Rows routed by re-entrant executions since the counter was last
    /// taken. Drains the counter.
    fn take_additional_rows_processed(&self) -> u64;
}
