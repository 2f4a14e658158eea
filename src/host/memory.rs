//! In-memory reference host
//!
//! Implements every collaborator trait against process-local maps. Embedded
//! callers use it as a self-contained host; the test suite uses it to
//! observe the exact sequence of physical actions the dispatcher requests.

use crate::catalog::Catalog;
use crate::error::{MetaError, Result};
use crate::extension::{InstallProbe, InstallState, CRATE_VERSION};
use crate::host::{IdentityGuard, IdentityManager, PartitionBackend, PartitionEnumerator};
use crate::sql::{AlterTableCmd, CreateIndexStmt, ObjectAddress, VacuumStmt};
use crate::types::{
    Dimension, IndexDef, LogicalTable, PartitionRef, QualifiedName, RelationId, RoutingCoord,
    RoutingPoint, Row, TriggerDef,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity the host switches to for internal metadata writes
const INTERNAL_USER: &str = "spandb_internal";

/// One recorded physical action, in the order the dispatcher requested it
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    PartitionsTruncated { table: String, cascade: bool },
    PartitionDropped { partition: String },
    MetadataDropped { table: String },
    IndexCreated { partition: String, index: String },
    IndexMetadataDeleted { partition: String },
    PartitionIndexesDropped { table: String, physical: bool },
    PartitionIndexesRenamed { table: String, new_name: String },
    PartitionIndexRenamed { partition: String, new_name: String },
    TriggerCreated { partition: String, trigger: String },
    TriggerDropped { partition: String, trigger: String },
    ConstraintAdded { partition: String, constraint: String },
    ConstraintDropped { partition: String, constraint: String },
    DimensionConstraintsRecreated { table: String, column: String },
    OwnerChanged { partition: String, owner: String },
    PartitionAltered { partition: String },
    Vacuumed { partition: String, analyze: bool },
    Reindexed { partition: String },
    TablespaceSet { table: String, tablespace: String },
    MarkedClustered { partition: String },
    Clustered { partition: String },
    RowsInserted { partition: String, count: u64 },
    IdentityElevated,
    IdentityRestored,
}

/// Process-local host implementation.
pub struct MemoryHost {
    catalog: Arc<Catalog>,
    names: DashMap<QualifiedName, RelationId>,
    /// Index relation id -> definition (IndexDef.relation = owning table)
    indexes: DashMap<RelationId, IndexDef>,
    triggers: DashMap<(RelationId, String), TriggerDef>,
    /// (table, constraint name) -> backing index, when index-backed
    constraints: DashMap<(RelationId, String), Option<RelationId>>,
    /// Table relation -> index currently marked clustered
    clustered: DashMap<RelationId, RelationId>,
    owners: DashMap<RelationId, String>,
    object_names: DashMap<RelationId, String>,
    current_user: Arc<RwLock<String>>,
    effects: Arc<Mutex<Vec<SideEffect>>>,
    next_relation: AtomicU64,
    extra_copy_rows: AtomicU64,
    /// Partition relation whose cluster step should fail, for tests
    fail_cluster_on: Mutex<Option<RelationId>>,
    install_state: RwLock<InstallState>,
}

impl MemoryHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            catalog: Arc::new(Catalog::in_memory()),
            names: DashMap::new(),
            indexes: DashMap::new(),
            triggers: DashMap::new(),
            constraints: DashMap::new(),
            clustered: DashMap::new(),
            owners: DashMap::new(),
            object_names: DashMap::new(),
            current_user: Arc::new(RwLock::new("app".to_string())),
            effects: Arc::new(Mutex::new(Vec::new())),
            next_relation: AtomicU64::new(1000),
            extra_copy_rows: AtomicU64::new(0),
            fail_cluster_on: Mutex::new(None),
            install_state: RwLock::new(InstallState::Installed),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn mint_relation(&self) -> RelationId {
        RelationId(self.next_relation.fetch_add(1, Ordering::SeqCst))
    }

    pub fn register_name(&self, name: QualifiedName, relation: RelationId) {
        self.names.insert(name, relation);
    }

    /// Create a logical table with `partition_count` partitions, wiring up
    /// catalog records and name resolution.
    pub fn create_logical_table(
        &self,
        schema: &str,
        name: &str,
        dimensions: Vec<Dimension>,
        partition_count: usize,
    ) -> Result<LogicalTable> {
        let root = self.mint_relation();
        let table = self
            .catalog
            .create_logical_table(schema, name, root, dimensions)?;
        self.register_name(QualifiedName::new(schema, name), root);
        self.register_name(QualifiedName::bare(name), root);
        self.owners.insert(root, self.current_user.read().clone());
        self.object_names.insert(root, name.to_string());

        for _ in 0..partition_count {
            self.add_partition(&table)?;
        }
        Ok(table)
    }

    /// Attach one more partition to an existing logical table.
    pub fn add_partition(&self, table: &LogicalTable) -> Result<PartitionRef> {
        let relation = self.mint_relation();
        let index = self.catalog.partitions_of_table(table.id).len();
        let partition_name = format!("{}_p{index}", table.table_name);
        let partition =
            self.catalog
                .add_partition(table.id, relation, "_spandb_internal", &partition_name)?;
        self.register_name(
            QualifiedName::new("_spandb_internal", &partition_name),
            relation,
        );
        self.register_name(QualifiedName::bare(&partition_name), relation);
        self.object_names.insert(relation, partition_name);
        Ok(partition)
    }

    /// Register an index on a table (logical or plain).
    pub fn define_index(
        &self,
        table: RelationId,
        name: &str,
        columns: Vec<String>,
        unique: bool,
    ) -> RelationId {
        let relation = self.mint_relation();
        self.indexes.insert(
            relation,
            IndexDef {
                name: name.to_string(),
                relation: table,
                columns,
                unique,
            },
        );
        self.register_name(QualifiedName::bare(name), relation);
        self.object_names.insert(relation, name.to_string());
        relation
    }

    pub fn define_trigger(&self, table: RelationId, name: &str, for_each_row: bool) {
        self.triggers.insert(
            (table, name.to_string()),
            TriggerDef {
                name: name.to_string(),
                relation: table,
                for_each_row,
            },
        );
    }

    /// Register a constraint, optionally backed by an index. Returns the
    /// constraint's object id.
    pub fn define_constraint(
        &self,
        table: RelationId,
        name: &str,
        backing_index: Option<RelationId>,
    ) -> RelationId {
        let relation = self.mint_relation();
        self.constraints
            .insert((table, name.to_string()), backing_index);
        self.object_names.insert(relation, name.to_string());
        relation
    }

    pub fn set_clustered(&self, table: RelationId, index: RelationId) {
        self.clustered.insert(table, index);
    }

    pub fn set_table_owner(&self, relation: RelationId, owner: &str) {
        self.owners.insert(relation, owner.to_string());
    }

    pub fn set_current_user(&self, user: &str) {
        *self.current_user.write() = user.to_string();
    }

    pub fn set_install_state(&self, state: InstallState) {
        *self.install_state.write() = state;
    }

    /// Make the cluster step fail for one partition.
    pub fn fail_cluster_on(&self, partition: RelationId) {
        *self.fail_cluster_on.lock() = Some(partition);
    }

    /// Pretend a re-entrant execution routed `rows` extra rows.
    pub fn add_reentrant_copy_rows(&self, rows: u64) {
        self.extra_copy_rows.fetch_add(rows, Ordering::SeqCst);
    }

    /// Snapshot of the recorded physical actions.
    pub fn effects(&self) -> Vec<SideEffect> {
        self.effects.lock().clone()
    }

    pub fn clear_effects(&self) {
        self.effects.lock().clear();
    }

    fn record(&self, effect: SideEffect) {
        self.effects.lock().push(effect);
    }
}

impl PartitionEnumerator for MemoryHost {
    fn partitions_of(&self, table: &LogicalTable) -> Result<Vec<PartitionRef>> {
        self.catalog.partitions_of(table)
    }
}

impl IdentityManager for MemoryHost {
    fn elevate(&self) -> Result<IdentityGuard> {
        let previous = {
            let mut user = self.current_user.write();
            std::mem::replace(&mut *user, INTERNAL_USER.to_string())
        };
        self.record(SideEffect::IdentityElevated);

        let current_user = Arc::clone(&self.current_user);
        let effects = Arc::clone(&self.effects);
        Ok(IdentityGuard::new(Box::new(move || {
            *current_user.write() = previous;
            effects.lock().push(SideEffect::IdentityRestored);
        })))
    }
}

impl InstallProbe for MemoryHost {
    fn current_state(&self) -> InstallState {
        *self.install_state.read()
    }

    fn installed_version(&self) -> Option<String> {
        Some(CRATE_VERSION.to_string())
    }

    fn proxy_relation(&self) -> Option<RelationId> {
        Some(RelationId(1))
    }
}

impl PartitionBackend for MemoryHost {
    fn resolve_relation(&self, name: &QualifiedName) -> Option<RelationId> {
        self.names.get(name).map(|r| *r)
    }

    fn index_table(&self, index: RelationId) -> Option<RelationId> {
        self.indexes.get(&index).map(|def| def.relation)
    }

    fn resolve_index_name(&self, table: RelationId, name: &str) -> Option<RelationId> {
        self.indexes
            .iter()
            .find(|entry| entry.value().relation == table && entry.value().name == name)
            .map(|entry| *entry.key())
    }

    fn object_name(&self, object: RelationId) -> Option<String> {
        self.object_names.get(&object).map(|n| n.clone())
    }

    fn current_user_owns(&self, table: RelationId) -> Result<bool> {
        let user = self.current_user.read().clone();
        Ok(self
            .owners
            .get(&table)
            .map(|owner| *owner == user || user == INTERNAL_USER)
            .unwrap_or(false))
    }

    fn truncate_partitions(&self, table: &LogicalTable, cascade: bool) -> Result<()> {
        self.record(SideEffect::PartitionsTruncated {
            table: table.table_name.clone(),
            cascade,
        });
        Ok(())
    }

    fn drop_logical_table_metadata(&self, table: &LogicalTable, _cascade: bool) -> Result<()> {
        self.catalog.drop_logical_table(table.root_relation)?;
        self.record(SideEffect::MetadataDropped {
            table: table.table_name.clone(),
        });
        Ok(())
    }

    fn rename_partition_indexes(
        &self,
        table: &LogicalTable,
        index: RelationId,
        new_name: &str,
    ) -> Result<()> {
        if let Some(mut def) = self.indexes.get_mut(&index) {
            def.name = new_name.to_string();
        }
        self.record(SideEffect::PartitionIndexesRenamed {
            table: table.table_name.clone(),
            new_name: new_name.to_string(),
        });
        Ok(())
    }

    fn drop_partition_indexes_of(
        &self,
        table: &LogicalTable,
        _index: RelationId,
        drop_physical: bool,
    ) -> Result<()> {
        self.record(SideEffect::PartitionIndexesDropped {
            table: table.table_name.clone(),
            physical: drop_physical,
        });
        Ok(())
    }

    fn recreate_dimension_constraints(
        &self,
        table: &LogicalTable,
        dimension_column: &str,
    ) -> Result<()> {
        self.record(SideEffect::DimensionConstraintsRecreated {
            table: table.table_name.clone(),
            column: dimension_column.to_string(),
        });
        Ok(())
    }

    fn set_partition_index_tablespace(
        &self,
        table: &LogicalTable,
        _index: RelationId,
        tablespace: &str,
    ) -> Result<()> {
        self.record(SideEffect::TablespaceSet {
            table: table.table_name.clone(),
            tablespace: tablespace.to_string(),
        });
        Ok(())
    }

    fn drop_partition(&self, partition: &PartitionRef, _cascade: bool) -> Result<()> {
        self.catalog.remove_partition(partition.relation)?;
        self.record(SideEffect::PartitionDropped {
            partition: partition.table_name.clone(),
        });
        Ok(())
    }

    fn create_index_on_partition(
        &self,
        partition: &PartitionRef,
        stmt: &CreateIndexStmt,
        parent_index: ObjectAddress,
    ) -> Result<()> {
        let index_name = stmt
            .index_name
            .clone()
            .or_else(|| self.object_name(parent_index.object_id))
            .unwrap_or_else(|| "unnamed".to_string());
        self.record(SideEffect::IndexCreated {
            partition: partition.table_name.clone(),
            index: index_name,
        });
        Ok(())
    }

    fn delete_partition_index_metadata(
        &self,
        partition: &PartitionRef,
        _index: RelationId,
    ) -> Result<()> {
        self.record(SideEffect::IndexMetadataDeleted {
            partition: partition.table_name.clone(),
        });
        Ok(())
    }

    fn rename_partition_index(
        &self,
        partition: &PartitionRef,
        index: RelationId,
        new_name: &str,
    ) -> Result<()> {
        if let Some(mut def) = self.indexes.get_mut(&index) {
            def.name = new_name.to_string();
        }
        self.record(SideEffect::PartitionIndexRenamed {
            partition: partition.table_name.clone(),
            new_name: new_name.to_string(),
        });
        Ok(())
    }

    fn create_trigger_on_partition(&self, partition: &PartitionRef, trigger: &str) -> Result<()> {
        self.record(SideEffect::TriggerCreated {
            partition: partition.table_name.clone(),
            trigger: trigger.to_string(),
        });
        Ok(())
    }

    fn drop_trigger_on_partition(&self, partition: &PartitionRef, trigger: &str) -> Result<()> {
        self.record(SideEffect::TriggerDropped {
            partition: partition.table_name.clone(),
            trigger: trigger.to_string(),
        });
        Ok(())
    }

    fn add_constraint_on_partition(&self, partition: &PartitionRef, name: &str) -> Result<()> {
        self.record(SideEffect::ConstraintAdded {
            partition: partition.table_name.clone(),
            constraint: name.to_string(),
        });
        Ok(())
    }

    fn drop_constraint_on_partition(&self, partition: &PartitionRef, name: &str) -> Result<()> {
        self.record(SideEffect::ConstraintDropped {
            partition: partition.table_name.clone(),
            constraint: name.to_string(),
        });
        Ok(())
    }

    fn change_partition_owner(&self, partition: &PartitionRef, new_owner: &str) -> Result<()> {
        self.owners
            .insert(partition.relation, new_owner.to_string());
        self.record(SideEffect::OwnerChanged {
            partition: partition.table_name.clone(),
            owner: new_owner.to_string(),
        });
        Ok(())
    }

    fn alter_partition(&self, partition: &PartitionRef, _cmd: &AlterTableCmd) -> Result<()> {
        self.record(SideEffect::PartitionAltered {
            partition: partition.table_name.clone(),
        });
        Ok(())
    }

    fn vacuum_partition(&self, partition: &PartitionRef, stmt: &VacuumStmt) -> Result<()> {
        self.record(SideEffect::Vacuumed {
            partition: partition.table_name.clone(),
            analyze: stmt.analyze,
        });
        Ok(())
    }

    fn reindex_partition(&self, partition: &PartitionRef) -> Result<()> {
        self.record(SideEffect::Reindexed {
            partition: partition.table_name.clone(),
        });
        Ok(())
    }

    fn trigger_on(&self, table: RelationId, name: &str) -> Option<TriggerDef> {
        self.triggers
            .get(&(table, name.to_string()))
            .map(|t| t.clone())
    }

    fn constraint_index(&self, table: RelationId, constraint: &str) -> Option<RelationId> {
        self.constraints
            .get(&(table, constraint.to_string()))
            .and_then(|backing| *backing)
    }

    fn find_clustered_index(&self, table: RelationId) -> Result<Option<RelationId>> {
        Ok(self.clustered.get(&table).map(|index| *index))
    }

    fn partition_index_mappings(
        &self,
        table: &LogicalTable,
        index: RelationId,
    ) -> Result<Vec<(PartitionRef, RelationId)>> {
        // partition-local index ids are synthesized deterministically
        Ok(self
            .catalog
            .partitions_of_table(table.id)
            .into_iter()
            .map(|p| {
                let local = RelationId(p.relation.0 * 1_000 + index.0);
                (p, local)
            })
            .collect())
    }

    fn mark_index_clustered(&self, partition: &PartitionRef, index: RelationId) -> Result<()> {
        self.clustered.insert(partition.relation, index);
        self.record(SideEffect::MarkedClustered {
            partition: partition.table_name.clone(),
        });
        Ok(())
    }

    fn cluster_partition(
        &self,
        partition: &PartitionRef,
        _index: RelationId,
        _verbose: bool,
    ) -> Result<()> {
        if *self.fail_cluster_on.lock() == Some(partition.relation) {
            return Err(MetaError::Transaction(format!(
                "cluster failed on partition {}",
                partition.table_name
            )));
        }
        self.record(SideEffect::Clustered {
            partition: partition.table_name.clone(),
        });
        Ok(())
    }

    fn partition_for_point(
        &self,
        table: &LogicalTable,
        point: &RoutingPoint,
    ) -> Result<PartitionRef> {
        let partitions = self.catalog.partitions_of_table(table.id);
        if partitions.is_empty() {
            return Err(MetaError::ObjectNotFound(format!(
                "no partition of {} covers the routing point",
                table.table_name
            )));
        }
        let mix = point.iter().fold(0u64, |acc, coord| {
            let v = match coord {
                RoutingCoord::Range(v) => *v as u64,
                RoutingCoord::Hash(h) => *h,
            };
            acc.wrapping_mul(31).wrapping_add(v)
        });
        Ok(partitions[(mix % partitions.len() as u64) as usize].clone())
    }

    fn insert_rows(&self, partition: &PartitionRef, rows: Vec<Row>) -> Result<u64> {
        let count = rows.len() as u64;
        self.record(SideEffect::RowsInserted {
            partition: partition.table_name.clone(),
            count,
        });
        Ok(count)
    }

    fn take_additional_rows_processed(&self) -> u64 {
        self.extra_copy_rows.swap(0, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    #[test]
    fn test_host_wires_catalog_and_names() {
        let host = MemoryHost::new();
        let table = host
            .create_logical_table(
                "public",
                "metrics",
                vec![Dimension::range("ts", ColumnType::Timestamp, 1_000_000)],
                3,
            )
            .unwrap();

        assert_eq!(
            host.resolve_relation(&QualifiedName::bare("metrics")),
            Some(table.root_relation)
        );
        assert_eq!(host.partitions_of(&table).unwrap().len(), 3);
        assert!(host.catalog().is_partition(
            host.resolve_relation(&QualifiedName::bare("metrics_p0")).unwrap()
        ));
    }

    #[test]
    fn test_identity_guard_restores_on_drop() {
        let host = MemoryHost::new();
        host.set_current_user("alice");
        {
            let _guard = host.elevate().unwrap();
            assert_eq!(*host.current_user.read(), INTERNAL_USER);
        }
        assert_eq!(*host.current_user.read(), "alice");
        assert_eq!(
            host.effects(),
            vec![SideEffect::IdentityElevated, SideEffect::IdentityRestored]
        );
    }

    #[test]
    fn test_routing_is_deterministic() {
        let host = MemoryHost::new();
        let table = host
            .create_logical_table(
                "public",
                "metrics",
                vec![Dimension::range("ts", ColumnType::Timestamp, 1_000_000)],
                4,
            )
            .unwrap();

        let point = vec![RoutingCoord::Range(42), RoutingCoord::Hash(7)];
        let first = host.partition_for_point(&table, &point).unwrap();
        let second = host.partition_for_point(&table, &point).unwrap();
        assert_eq!(first, second);
    }
}
