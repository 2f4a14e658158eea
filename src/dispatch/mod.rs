//! Command dispatcher - schema-statement interception and partition fan-out
//!
//! The host delivers every schema-modification statement twice: `before`
//! runs ahead of default execution and validates, mutates descriptors, or
//! takes over the statement entirely; `after` runs once default execution
//! has materialized objects on the logical table and replays them onto the
//! partitions. Both hooks are no-ops while the extension metadata is not
//! installed.
//!
//! Handlers share one pipeline: resolve the named relation, look it up in
//! the descriptor registry under a pin, validate, then enumerate partitions
//! and replay. Errors raised mid-fan-out leave already-applied partition
//! changes in place; the statement fails and the surrounding unit of work
//! decides whether to abort.

pub mod copy;
pub mod indexing;
pub mod reorganize;

pub use copy::CopyRouter;
pub use indexing::DimensionCoverageVerifier;
pub use reorganize::MultiTransactionReorganizer;

use crate::catalog::registry::DescriptorCache;
use crate::catalog::LogicalTableRegistry;
use crate::config::EngineConfig;
use crate::error::{MetaError, Result};
use crate::extension::ExtensionTracker;
use crate::host::{ConstraintVerifier, IdentityManager, PartitionBackend, PartitionEnumerator};
use crate::sql::{
    AlterSchemaStmt, AlterTableCmd, AlterTableStmt, CollectedCommand, CopyFromStmt,
    CreateIndexStmt, CreateTableStmt, CreateTriggerStmt, DropObject, DropStmt, ExecContext,
    ObjectAddress, ObjectType, ReindexStmt, ReindexTarget, RenameStmt, RenameTarget,
    SchemaStatement, TableConstraint, TruncateStmt, VacuumStmt,
};
use crate::txn::{Session, TxnEvent};
use crate::types::{LogicalTable, PartitionRef, QualifiedName, RelationId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// What the pre-hook decided about a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookOutcome {
    /// True suppresses the host's default execution
    pub handled: bool,
    /// Rows ingested by a routed COPY, for the completion tag
    pub rows_processed: Option<u64>,
}

impl HookOutcome {
    pub fn passthrough() -> Self {
        Self {
            handled: false,
            rows_processed: None,
        }
    }

    pub fn handled() -> Self {
        Self {
            handled: true,
            rows_processed: None,
        }
    }

    pub fn copied(rows_processed: u64) -> Self {
        Self {
            handled: true,
            rows_processed: Some(rows_processed),
        }
    }
}

pub struct CommandDispatcher {
    config: EngineConfig,
    session: Arc<Session>,
    registry: Arc<LogicalTableRegistry>,
    extension: Arc<ExtensionTracker>,
    backend: Arc<dyn PartitionBackend>,
    enumerator: Arc<dyn PartitionEnumerator>,
    verifier: Arc<dyn ConstraintVerifier>,
    identity: Arc<dyn IdentityManager>,
    /// Suppresses the partition guard while an internal fan-out call
    /// legitimately modifies a partition directly
    expect_partition_modification: Arc<AtomicBool>,
}

impl CommandDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        session: Arc<Session>,
        registry: Arc<LogicalTableRegistry>,
        extension: Arc<ExtensionTracker>,
        backend: Arc<dyn PartitionBackend>,
        enumerator: Arc<dyn PartitionEnumerator>,
        verifier: Arc<dyn ConstraintVerifier>,
        identity: Arc<dyn IdentityManager>,
    ) -> Arc<Self> {
        let expect_partition_modification = Arc::new(AtomicBool::new(false));

        // an error raised during fan-out must not leave the guard disabled
        let reset = Arc::clone(&expect_partition_modification);
        session.register_callback(Box::new(move |event| {
            if matches!(event, TxnEvent::Abort) {
                reset.store(false, Ordering::SeqCst);
            }
        }));

        Arc::new(Self {
            config,
            session,
            registry,
            extension,
            backend,
            enumerator,
            verifier,
            identity,
            expect_partition_modification,
        })
    }

    /// Pre-hook: runs before the host's default execution.
    pub fn before(&self, stmt: &SchemaStatement, ctx: ExecContext) -> Result<HookOutcome> {
        if self.config.restoring || !self.extension.is_active()? {
            return Ok(HookOutcome::passthrough());
        }

        match stmt {
            SchemaStatement::Truncate(s) => {
                self.process_truncate(s)?;
                Ok(HookOutcome::passthrough())
            }
            SchemaStatement::AlterSchema(s) => {
                self.process_alter_schema(s)?;
                Ok(HookOutcome::passthrough())
            }
            SchemaStatement::Rename(s) => {
                self.process_rename(s)?;
                Ok(HookOutcome::passthrough())
            }
            SchemaStatement::AlterTable(s) => {
                self.process_altertable_start(s)?;
                Ok(HookOutcome::passthrough())
            }
            // constraints are only checkable after parse analysis; see after()
            SchemaStatement::CreateTable(_) => Ok(HookOutcome::passthrough()),
            SchemaStatement::CreateIndex(s) => {
                self.process_index_start(s)?;
                Ok(HookOutcome::passthrough())
            }
            SchemaStatement::CreateTrigger(s) => {
                self.process_create_trigger_start(s)?;
                Ok(HookOutcome::passthrough())
            }
            SchemaStatement::Drop(s) => {
                self.process_drop(s)?;
                Ok(HookOutcome::passthrough())
            }
            SchemaStatement::CopyFrom(s) => self.process_copy(s),
            SchemaStatement::Vacuum(s) => self.process_vacuum(s),
            SchemaStatement::Reindex(s) => self.process_reindex(s),
            SchemaStatement::Cluster(s) => {
                let reorganizer = MultiTransactionReorganizer::new(
                    &self.session,
                    &self.registry,
                    &*self.backend,
                );
                reorganizer.process(s, ctx)?;
                // the root object is trivial once partitions are handled;
                // default processing may still run against it
                Ok(HookOutcome::passthrough())
            }
        }
    }

    /// Post-hook: runs after default execution, with the identities of the
    /// objects it materialized.
    pub fn after(&self, stmt: &SchemaStatement, collected: &CollectedCommand) -> Result<()> {
        if self.config.restoring || !self.extension.is_active()? {
            return Ok(());
        }

        match stmt {
            SchemaStatement::CreateTable(s) => self.process_create_table_end(s),
            SchemaStatement::CreateIndex(s) => self.process_index_end(s, collected),
            SchemaStatement::AlterTable(s) => self.process_altertable_end(s, collected),
            SchemaStatement::CreateTrigger(s) => self.process_create_trigger_end(s),
            _ => Ok(()),
        }
    }

    /// Suppress the partition guard around an internal call that modifies a
    /// partition directly. Exposed for hosts that run their own fan-out.
    pub fn set_expect_partition_modification(&self, expect: bool) {
        self.expect_partition_modification
            .store(expect, Ordering::SeqCst);
    }

    pub fn expects_partition_modification(&self) -> bool {
        self.expect_partition_modification.load(Ordering::SeqCst)
    }

    // pipeline helpers

    /// Pin the registry around `f`. On success the pin is released here; on
    /// error the statement aborts and the safety net reclaims the pin.
    fn with_cache<T>(&self, f: impl FnOnce(&DescriptorCache) -> Result<T>) -> Result<T> {
        let tracker = self.session.pins();
        let cache = self.registry.pin(tracker);
        match f(&cache) {
            Ok(value) => {
                cache.release(tracker)?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// Apply `f` to each partition of a logical table, in creation order.
    /// Returns the number of partitions processed.
    fn foreach_partition(
        &self,
        table: &LogicalTable,
        mut f: impl FnMut(&PartitionRef) -> Result<()>,
    ) -> Result<usize> {
        let partitions = self.enumerator.partitions_of(table)?;
        for partition in &partitions {
            f(partition)?;
        }
        Ok(partitions.len())
    }

    fn check_partition_operation_allowed(&self, relation: RelationId) -> Result<()> {
        if self.expect_partition_modification.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.registry.catalog().is_partition(relation) {
            return Err(MetaError::unsupported(
                "operation not supported on partition tables",
            ));
        }
        Ok(())
    }

    fn with_partition_modification<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.expect_partition_modification
            .store(true, Ordering::SeqCst);
        let result = f();
        self.expect_partition_modification
            .store(false, Ordering::SeqCst);
        result
    }

    // statement handlers, pre-hook

    fn process_truncate(&self, stmt: &TruncateStmt) -> Result<()> {
        self.with_cache(|cache| {
            for relation in &stmt.relations {
                let relid = match self.backend.resolve_relation(relation) {
                    Some(relid) => relid,
                    None => continue,
                };
                if let Some(table) = cache.fetch(&relid)? {
                    self.backend.truncate_partitions(&table, stmt.cascade)?;
                }
            }
            Ok(())
        })
    }

    fn process_alter_schema(&self, stmt: &AlterSchemaStmt) -> Result<()> {
        if stmt.object_type != ObjectType::Table {
            return Ok(());
        }
        let relid = match self.backend.resolve_relation(&stmt.relation) {
            Some(relid) => relid,
            None => return Ok(()),
        };
        self.with_cache(|cache| {
            if cache.fetch(&relid)?.is_some() {
                self.registry.set_schema(relid, &stmt.new_schema)?;
            }
            Ok(())
        })
    }

    fn process_rename(&self, stmt: &RenameStmt) -> Result<()> {
        let relid = match self.backend.resolve_relation(&stmt.relation) {
            Some(relid) => relid,
            None => return Ok(()),
        };
        self.with_cache(|cache| match stmt.target {
            RenameTarget::Table => {
                if cache.fetch(&relid)?.is_some() {
                    self.registry.set_table_name(relid, &stmt.new_name)?;
                }
                Ok(())
            }
            RenameTarget::Column => {
                if cache.fetch(&relid)?.is_some() {
                    let old_name = stmt.subname.as_deref().ok_or_else(|| {
                        MetaError::InvalidArgument("column rename without a column name".into())
                    })?;
                    // a no-op when the column does not back a dimension
                    self.registry.rename_dimension(relid, old_name, &stmt.new_name)?;
                }
                Ok(())
            }
            RenameTarget::Index => {
                let table_relid = match self.backend.index_table(relid) {
                    Some(table_relid) => table_relid,
                    None => return Ok(()),
                };
                if let Some(table) = cache.fetch(&table_relid)? {
                    self.backend
                        .rename_partition_indexes(&table, relid, &stmt.new_name)
                } else if let Some(partition) =
                    self.registry.catalog().partition_by_relation(table_relid)
                {
                    self.backend
                        .rename_partition_index(&partition, relid, &stmt.new_name)
                } else {
                    Ok(())
                }
            }
        })
    }

    fn process_copy(&self, stmt: &CopyFromStmt) -> Result<HookOutcome> {
        let relid = match self.backend.resolve_relation(&stmt.relation) {
            Some(relid) => relid,
            None => return Ok(HookOutcome::passthrough()),
        };
        self.with_cache(|cache| match cache.fetch(&relid)? {
            None => Ok(HookOutcome::passthrough()),
            Some(table) => {
                let router = CopyRouter::new(&*self.backend, self.config.copy_batch_size);
                let routed = router.route(&table, stmt)?;
                // rows routed by re-entrant executions count toward the tag
                let total = routed + self.backend.take_additional_rows_processed();
                debug!(table = %table.table_name, rows = total, "routed copy");
                Ok(HookOutcome::copied(total))
            }
        })
    }

    fn process_vacuum(&self, stmt: &VacuumStmt) -> Result<HookOutcome> {
        let relation = match &stmt.relation {
            Some(relation) => relation,
            // a database-wide vacuum reaches the partitions by itself
            None => return Ok(HookOutcome::passthrough()),
        };
        let relid = match self.backend.resolve_relation(relation) {
            Some(relid) => relid,
            None => return Ok(HookOutcome::passthrough()),
        };
        self.with_cache(|cache| match cache.fetch(&relid)? {
            None => Ok(HookOutcome::passthrough()),
            Some(table) => {
                let n = self.foreach_partition(&table, |partition| {
                    self.backend.vacuum_partition(partition, stmt)
                })?;
                debug!(table = %table.table_name, partitions = n, "vacuumed partitions");
                Ok(HookOutcome::handled())
            }
        })
    }

    fn process_reindex(&self, stmt: &ReindexStmt) -> Result<HookOutcome> {
        match &stmt.target {
            ReindexTarget::Table(name) => {
                let relid = match self.backend.resolve_relation(name) {
                    Some(relid) => relid,
                    None => return Ok(HookOutcome::passthrough()),
                };
                self.with_cache(|cache| match cache.fetch(&relid)? {
                    None => Ok(HookOutcome::passthrough()),
                    Some(table) => {
                        self.foreach_partition(&table, |partition| {
                            self.backend.reindex_partition(partition)
                        })?;
                        Ok(HookOutcome::handled())
                    }
                })
            }
            ReindexTarget::Index(name) => {
                let index = match self.backend.resolve_relation(name) {
                    Some(index) => index,
                    None => return Ok(HookOutcome::passthrough()),
                };
                let table_relid = match self.backend.index_table(index) {
                    Some(table_relid) => table_relid,
                    None => return Ok(HookOutcome::passthrough()),
                };
                self.with_cache(|cache| {
                    if cache.fetch(&table_relid)?.is_some() {
                        // recursing a single index to every matching
                        // partition index is not implemented
                        return Err(MetaError::unsupported_with_hint(
                            "reindexing a specific index on a logical table is currently unsupported",
                            "Run REINDEX TABLE to reindex all indexes, including partition indexes.",
                        ));
                    }
                    Ok(HookOutcome::passthrough())
                })
            }
        }
    }

    fn process_drop(&self, stmt: &DropStmt) -> Result<()> {
        match &stmt.object {
            DropObject::Table(names) => self.process_drop_table(stmt, names),
            DropObject::Trigger(pairs) => self.process_drop_trigger(stmt, pairs),
            DropObject::Index(names) => self.process_drop_index(names),
        }
    }

    /// Partitions are dropped before the logical-table metadata so default
    /// drop of the root object afterwards respects CASCADE as expected.
    fn process_drop_table(&self, stmt: &DropStmt, names: &[QualifiedName]) -> Result<()> {
        self.with_cache(|cache| {
            for name in names {
                let relid = match self.backend.resolve_relation(name) {
                    Some(relid) => relid,
                    None => continue,
                };
                if let Some(table) = cache.fetch(&relid)? {
                    if names.len() != 1 {
                        return Err(MetaError::InvalidArgument(
                            "cannot drop a logical table along with other objects".into(),
                        ));
                    }
                    // partitions live in a restricted namespace
                    let _identity = self.identity.elevate()?;
                    let dropped = self.foreach_partition(&table, |partition| {
                        self.backend.drop_partition(partition, stmt.cascade)
                    })?;
                    self.backend
                        .drop_logical_table_metadata(&table, stmt.cascade)?;
                    cache.remove(&relid)?;
                    debug!(table = %table.table_name, partitions = dropped, "dropped logical table");
                } else if self.registry.catalog().is_partition(relid) {
                    // dropping a partition directly just clears its record
                    self.registry.catalog().remove_partition(relid)?;
                }
            }
            Ok(())
        })
    }

    fn process_drop_trigger(
        &self,
        stmt: &DropStmt,
        pairs: &[(QualifiedName, String)],
    ) -> Result<()> {
        self.with_cache(|cache| {
            for (table_name, trigger_name) in pairs {
                let relid = match self.backend.resolve_relation(table_name) {
                    Some(relid) => relid,
                    None => continue,
                };
                let table = match cache.fetch(&relid)? {
                    Some(table) => table,
                    None => continue,
                };
                match self.backend.trigger_on(table.root_relation, trigger_name) {
                    // only row triggers are replicated onto partitions
                    Some(trigger) if trigger.for_each_row => {
                        self.foreach_partition(&table, |partition| {
                            self.backend.drop_trigger_on_partition(partition, trigger_name)
                        })?;
                    }
                    Some(_) => {}
                    None if !stmt.missing_ok => {
                        return Err(MetaError::ObjectNotFound(format!(
                            "trigger \"{trigger_name}\" on table {table_name}"
                        )));
                    }
                    None => {}
                }
            }
            Ok(())
        })
    }

    fn process_drop_index(&self, names: &[QualifiedName]) -> Result<()> {
        self.with_cache(|cache| {
            for name in names {
                let index = match self.backend.resolve_relation(name) {
                    Some(index) => index,
                    None => continue,
                };
                let table_relid = match self.backend.index_table(index) {
                    Some(table_relid) => table_relid,
                    None => continue,
                };
                if let Some(table) = cache.fetch(&table_relid)? {
                    // drop every corresponding partition index first
                    self.backend.drop_partition_indexes_of(&table, index, true)?;
                } else if let Some(partition) =
                    self.registry.catalog().partition_by_relation(table_relid)
                {
                    // the host's drop removes the physical index; only the
                    // metadata needs clearing
                    self.backend.delete_partition_index_metadata(&partition, index)?;
                }
            }
            Ok(())
        })
    }

    fn process_index_start(&self, stmt: &CreateIndexStmt) -> Result<()> {
        let relid = match self.backend.resolve_relation(&stmt.relation) {
            Some(relid) => relid,
            None => return Ok(()),
        };
        self.with_cache(|cache| {
            if let Some(table) = cache.fetch(&relid)? {
                if stmt.concurrent {
                    return Err(MetaError::unsupported(
                        "logical tables currently do not support concurrent index creation",
                    ));
                }
                indexing::verify_index(&*self.verifier, &table, stmt)?;
            }
            Ok(())
        })
    }

    fn process_index_end(&self, stmt: &CreateIndexStmt, collected: &CollectedCommand) -> Result<()> {
        let relid = match self.backend.resolve_relation(&stmt.relation) {
            Some(relid) => relid,
            None => return Ok(()),
        };
        self.with_cache(|cache| {
            let table = match cache.fetch(&relid)? {
                Some(table) => table,
                None => return Ok(()),
            };
            let address = match collected {
                CollectedCommand::Simple { address } => *address,
                _ => {
                    return Err(MetaError::unsupported(
                        "operation not yet supported on logical tables",
                    ))
                }
            };
            // partition indexes require metadata writes in the internal
            // namespace
            let _identity = self.identity.elevate()?;
            let n = self.foreach_partition(&table, |partition| {
                self.backend
                    .create_index_on_partition(partition, stmt, address)
            })?;
            debug!(table = %table.table_name, partitions = n, "created partition indexes");
            Ok(())
        })
    }

    fn process_create_trigger_start(&self, stmt: &CreateTriggerStmt) -> Result<()> {
        if !stmt.for_each_row {
            return Ok(());
        }
        let relid = match self.backend.resolve_relation(&stmt.relation) {
            Some(relid) => relid,
            None => return Ok(()),
        };
        self.with_cache(|cache| {
            if cache.fetch(&relid)?.is_some() && stmt.has_transition_tables {
                return Err(MetaError::unsupported(
                    "logical tables do not support transition tables in triggers",
                ));
            }
            Ok(())
        })
    }

    fn process_create_trigger_end(&self, stmt: &CreateTriggerStmt) -> Result<()> {
        if !stmt.for_each_row {
            return Ok(());
        }
        let relid = match self.backend.resolve_relation(&stmt.relation) {
            Some(relid) => relid,
            None => return Ok(()),
        };
        self.with_cache(|cache| {
            if let Some(table) = cache.fetch(&relid)? {
                self.foreach_partition(&table, |partition| {
                    self.backend.create_trigger_on_partition(partition, &stmt.name)
                })?;
            }
            Ok(())
        })
    }

    fn process_create_table_end(&self, stmt: &CreateTableStmt) -> Result<()> {
        self.with_cache(|cache| {
            for column in &stmt.columns {
                for constraint in &column.constraints {
                    self.verify_new_table_constraint(cache, stmt, constraint)?;
                }
            }
            for constraint in &stmt.constraints {
                self.verify_new_table_constraint(cache, stmt, constraint)?;
            }
            Ok(())
        })
    }

    fn verify_new_table_constraint(
        &self,
        cache: &DescriptorCache,
        stmt: &CreateTableStmt,
        constraint: &TableConstraint,
    ) -> Result<()> {
        let relid = match self.backend.resolve_relation(&stmt.relation) {
            Some(relid) => relid,
            None => return Ok(()),
        };
        match cache.fetch(&relid)? {
            Some(table) => indexing::verify_constraint(&*self.verifier, &table, constraint),
            None => self.verify_plain_table_constraint(cache, constraint),
        }
    }

    /// Plain tables may not point foreign keys at a logical table; rows of
    /// the referenced table live in partitions the host's FK machinery
    /// cannot see.
    fn verify_plain_table_constraint(
        &self,
        cache: &DescriptorCache,
        constraint: &TableConstraint,
    ) -> Result<()> {
        if let TableConstraint::ForeignKey { referenced, .. } = constraint {
            if let Some(relid) = self.backend.resolve_relation(referenced) {
                if cache.fetch(&relid)?.is_some() {
                    return Err(MetaError::unsupported(
                        "foreign keys to logical tables are not supported",
                    ));
                }
            }
        }
        Ok(())
    }

    fn process_altertable_start(&self, stmt: &AlterTableStmt) -> Result<()> {
        if stmt.relkind != ObjectType::Table {
            return Ok(());
        }
        let relid = match self.backend.resolve_relation(&stmt.relation) {
            Some(relid) => relid,
            None => return Ok(()),
        };
        self.check_partition_operation_allowed(relid)?;

        self.with_cache(|cache| {
            let table = cache.fetch(&relid)?;
            for cmd in &stmt.cmds {
                match cmd {
                    AlterTableCmd::AddIndex {
                        index,
                        is_constraint,
                    } => {
                        if let (Some(table), true) = (&table, *is_constraint) {
                            // a named index behaves like USING INDEX and was
                            // verified when it was created
                            if index.index_name.is_none() {
                                self.verifier.verify_columns(table, &index.columns)?;
                            }
                        }
                    }
                    AlterTableCmd::AddConstraint(constraint) => match &table {
                        Some(table) => {
                            indexing::verify_constraint(&*self.verifier, table, constraint)?
                        }
                        None => self.verify_plain_table_constraint(cache, constraint)?,
                    },
                    AlterTableCmd::DropConstraint { name } => {
                        // must run while the parent constraint still exists
                        if let Some(table) = &table {
                            self.process_drop_constraint(table, name)?;
                        }
                    }
                    AlterTableCmd::AlterColumnType { column, .. } => {
                        if let Some(table) = &table {
                            if table.has_hash_dimension_on(column) {
                                return Err(MetaError::unsupported(
                                    "cannot change the type of a hash-partitioned column",
                                ));
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(())
        })
    }

    fn process_drop_constraint(&self, table: &LogicalTable, name: &str) -> Result<()> {
        let backing_index = self.backend.constraint_index(table.root_relation, name);
        let _identity = self.identity.elevate()?;
        self.foreach_partition(table, |partition| {
            self.backend.drop_constraint_on_partition(partition, name)
        })?;
        // an index-backed constraint leaves index metadata behind on every
        // partition; the physical indexes go away with the host's drop
        if let Some(index) = backing_index {
            self.backend.drop_partition_indexes_of(table, index, false)?;
        }
        Ok(())
    }

    fn process_altertable_end(
        &self,
        stmt: &AlterTableStmt,
        collected: &CollectedCommand,
    ) -> Result<()> {
        match stmt.relkind {
            ObjectType::Table => self.process_altertable_end_table(stmt, collected),
            ObjectType::Index => self.process_altertable_end_index(stmt),
            _ => Ok(()),
        }
    }

    fn process_altertable_end_table(
        &self,
        stmt: &AlterTableStmt,
        collected: &CollectedCommand,
    ) -> Result<()> {
        let relid = match self.backend.resolve_relation(&stmt.relation) {
            Some(relid) => relid,
            None => return Ok(()),
        };
        self.with_cache(|cache| {
            let table = match cache.fetch(&relid)? {
                Some(table) => table,
                None => return Ok(()),
            };
            match collected {
                CollectedCommand::Simple { address } => {
                    if let Some(cmd) = stmt.cmds.first() {
                        self.apply_altertable_subcmd(&table, cmd, *address)?;
                    }
                    Ok(())
                }
                CollectedCommand::AlterTable { subcmds } => {
                    // each subcommand carries the identity collected for it
                    for sub in subcmds {
                        self.apply_altertable_subcmd(&table, &sub.cmd, sub.address)?;
                    }
                    Ok(())
                }
                CollectedCommand::None => Ok(()),
            }
        })
    }

    fn apply_altertable_subcmd(
        &self,
        table: &LogicalTable,
        cmd: &AlterTableCmd,
        address: ObjectAddress,
    ) -> Result<()> {
        match cmd {
            AlterTableCmd::ChangeOwner { new_owner } => {
                self.with_partition_modification(|| {
                    self.foreach_partition(table, |partition| {
                        self.backend.change_partition_owner(partition, new_owner)
                    })
                })?;
                Ok(())
            }
            AlterTableCmd::AddIndexConstraint { .. } => Err(MetaError::unsupported(
                "logical tables currently do not support adding a constraint using an existing index",
            )),
            AlterTableCmd::AddIndex {
                index,
                is_constraint,
            } => {
                if *is_constraint {
                    let name = index
                        .index_name
                        .clone()
                        .or_else(|| self.backend.object_name(address.object_id))
                        .ok_or_else(|| {
                            MetaError::ObjectNotFound(
                                "name of the materialized constraint index".into(),
                            )
                        })?;
                    self.add_constraint_fanout(table, &name)?;
                }
                Ok(())
            }
            AlterTableCmd::AddConstraint(constraint) => {
                // check constraints are recursed to partitions by default
                if matches!(constraint, TableConstraint::Check { .. }) {
                    return Ok(());
                }
                let name = constraint
                    .name()
                    .map(str::to_string)
                    .or_else(|| self.backend.object_name(address.object_id))
                    .ok_or_else(|| {
                        MetaError::ObjectNotFound("name of the materialized constraint".into())
                    })?;
                self.add_constraint_fanout(table, &name)
            }
            AlterTableCmd::AlterColumnType { column, new_type } => {
                let changed =
                    self.registry
                        .retype_dimension(table.root_relation, column, *new_type)?;
                if changed {
                    // every partition's dimension constraint mentions the
                    // old type
                    self.with_partition_modification(|| {
                        self.backend.recreate_dimension_constraints(table, column)
                    })?;
                }
                Ok(())
            }
            AlterTableCmd::SetRelOptions { .. } | AlterTableCmd::ResetRelOptions { .. } => {
                self.foreach_partition(table, |partition| {
                    self.backend.alter_partition(partition, cmd)
                })?;
                Ok(())
            }
            AlterTableCmd::DropConstraint { .. } => Ok(()),
            AlterTableCmd::SetTableSpace { .. } => Ok(()),
        }
    }

    fn add_constraint_fanout(&self, table: &LogicalTable, name: &str) -> Result<()> {
        let n = self.foreach_partition(table, |partition| {
            self.backend.add_constraint_on_partition(partition, name)
        })?;
        debug!(table = %table.table_name, constraint = name, partitions = n, "added partition constraints");
        Ok(())
    }

    fn process_altertable_end_index(&self, stmt: &AlterTableStmt) -> Result<()> {
        let index = match self.backend.resolve_relation(&stmt.relation) {
            Some(index) => index,
            None => return Ok(()),
        };
        let table_relid = match self.backend.index_table(index) {
            Some(table_relid) => table_relid,
            None => return Ok(()),
        };
        self.with_cache(|cache| {
            if let Some(table) = cache.fetch(&table_relid)? {
                for cmd in &stmt.cmds {
                    if let AlterTableCmd::SetTableSpace { tablespace } = cmd {
                        self.backend
                            .set_partition_index_tablespace(&table, index, tablespace)?;
                    }
                }
            }
            Ok(())
        })
    }
}
