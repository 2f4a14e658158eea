/// Multi-transaction reorganize (CLUSTER) of a logical table
///
/// Reorganizing takes an exclusive lock per table for the duration of the
/// rewrite. Holding that lock on every partition at once is not acceptable
/// for a table with many partitions, so each partition is reorganized in
/// its own unit of work: capture the (partition, partition-index) pairs,
/// commit to release the locks taken so far, then begin/mark/cluster/commit
/// per pair. Partitions committed before a failure stay reorganized; that
/// partial completion is deliberate and surfaces to the caller as the
/// original error.
use crate::catalog::LogicalTableRegistry;
use crate::error::{MetaError, Result};
use crate::host::PartitionBackend;
use crate::sql::{ClusterStmt, ExecContext};
use crate::txn::Session;
use tracing::debug;

pub struct MultiTransactionReorganizer<'a> {
    session: &'a Session,
    registry: &'a LogicalTableRegistry,
    backend: &'a dyn PartitionBackend,
}

impl<'a> MultiTransactionReorganizer<'a> {
    pub fn new(
        session: &'a Session,
        registry: &'a LogicalTableRegistry,
        backend: &'a dyn PartitionBackend,
    ) -> Self {
        Self {
            session,
            registry,
            backend,
        }
    }

    /// Handle a CLUSTER statement. Returns false when the target is not a
    /// logical table (or names no table at all), so default handling still
    /// runs; errors abort the statement with the pin reclaimed by the
    /// safety net.
    pub fn process(&self, stmt: &ClusterStmt, ctx: ExecContext) -> Result<bool> {
        // re-clustering everything is the host's job
        let relation = match &stmt.relation {
            Some(relation) => relation,
            None => return Ok(false),
        };
        let relid = match self.backend.resolve_relation(relation) {
            Some(relid) => relid,
            None => return Ok(false),
        };

        let tracker = self.session.pins();
        let cache = self.registry.pin(tracker);

        let table = match self.registry.get(&cache, relid)? {
            Some(table) => table,
            None => {
                cache.release(tracker)?;
                return Ok(false);
            }
        };

        if !self.backend.current_user_owns(table.root_relation)? {
            return Err(MetaError::Permission(format!(
                "must be owner of table {}",
                table.table_name
            )));
        }

        // each partition commits separately; running inside a surrounding
        // transaction block would break atomicity expectations
        if !ctx.toplevel || self.session.depth() > 0 {
            return Err(MetaError::Transaction(
                "CLUSTER on a logical table cannot run inside a transaction block".into(),
            ));
        }

        let index = match &stmt.index_name {
            Some(name) => match self.backend.resolve_index_name(table.root_relation, name) {
                Some(index) => index,
                None => {
                    // let default handling report the unknown index
                    cache.release(tracker)?;
                    return Ok(false);
                }
            },
            None => self
                .backend
                .find_clustered_index(table.root_relation)?
                .ok_or_else(|| {
                    MetaError::ObjectNotFound(format!(
                        "there is no previously clustered index for table \"{}\"",
                        table.table_name
                    ))
                })?,
        };

        // capture the full mapping list before any commit; it must outlive
        // the unit of work it was read in
        let mappings = self.backend.partition_index_mappings(&table, index)?;
        debug!(
            table = %table.table_name,
            partitions = mappings.len(),
            "reorganizing logical table partition by partition"
        );

        // commit to get out of the starting unit of work; the descriptor
        // pin survives because the registry cache opted out of the sweep
        self.session.commit()?;

        for (partition, local_index) in &mappings {
            self.session.begin()?;
            // the mark must be set before the reorganize call, which
            // expects it when re-checking under the new unit of work
            let step = self
                .backend
                .mark_index_clustered(partition, *local_index)
                .and_then(|_| {
                    self.backend
                        .cluster_partition(partition, *local_index, stmt.verbose)
                });
            match step {
                Ok(()) => self.session.commit()?,
                Err(err) => {
                    // only this partition's unit is unwound; the abort
                    // sweep also reclaims the descriptor pin
                    self.session.abort()?;
                    self.session.begin()?;
                    return Err(err);
                }
            }
        }

        // leave the caller in a valid active unit of work
        self.session.begin()?;
        cache.release(tracker)?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LogicalTableRegistry;
    use crate::config::LeakPolicy;
    use crate::host::{MemoryHost, SideEffect};
    use crate::types::{ColumnType, Dimension, QualifiedName};
    use std::sync::Arc;

    struct Fixture {
        host: Arc<MemoryHost>,
        session: Arc<Session>,
        registry: Arc<LogicalTableRegistry>,
    }

    fn fixture(partitions: usize) -> Fixture {
        let host = MemoryHost::new();
        host.create_logical_table(
            "public",
            "metrics",
            vec![Dimension::range("ts", ColumnType::Timestamp, 1_000_000)],
            partitions,
        )
        .unwrap();
        let registry = LogicalTableRegistry::new(Arc::clone(host.catalog())).unwrap();
        let session = Session::new(LeakPolicy::Panic);
        Fixture {
            host,
            session,
            registry,
        }
    }

    fn cluster_stmt(index: Option<&str>) -> ClusterStmt {
        ClusterStmt {
            relation: Some(QualifiedName::bare("metrics")),
            index_name: index.map(|i| i.to_string()),
            verbose: false,
        }
    }

    fn clustered_partitions(host: &MemoryHost) -> Vec<String> {
        host.effects()
            .into_iter()
            .filter_map(|e| match e {
                SideEffect::Clustered { partition } => Some(partition),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_reorganize_every_partition_in_own_unit() {
        let f = fixture(3);
        let root = f
            .host
            .resolve_relation(&QualifiedName::bare("metrics"))
            .unwrap();
        f.host
            .define_index(root, "metrics_ts_idx", vec!["ts".into()], false);
        f.session.begin().unwrap();

        let reorganizer =
            MultiTransactionReorganizer::new(&f.session, &f.registry, &*f.host);
        let handled = reorganizer
            .process(&cluster_stmt(Some("metrics_ts_idx")), ExecContext::top())
            .unwrap();
        assert!(handled);

        assert_eq!(
            clustered_partitions(&f.host),
            vec!["metrics_p0", "metrics_p1", "metrics_p2"]
        );
        // each cluster step is preceded by its mark, in the same order
        let marks: Vec<SideEffect> = f
            .host
            .effects()
            .into_iter()
            .filter(|e| matches!(e, SideEffect::MarkedClustered { .. }))
            .collect();
        assert_eq!(marks.len(), 3);

        // the caller is left inside a fresh active unit of work
        assert!(f.session.is_active());
        assert_eq!(f.session.pins().outstanding(), 0);
        f.session.commit().unwrap();
    }

    #[test]
    fn test_failure_keeps_completed_partitions() {
        let f = fixture(3);
        let root = f
            .host
            .resolve_relation(&QualifiedName::bare("metrics"))
            .unwrap();
        f.host
            .define_index(root, "metrics_ts_idx", vec!["ts".into()], false);

        // make the second partition's cluster step fail
        let second = f.host.catalog().partitions_of_table(
            f.host.catalog().record(root).unwrap().id,
        )[1]
        .relation;
        f.host.fail_cluster_on(second);

        f.session.begin().unwrap();
        let reorganizer =
            MultiTransactionReorganizer::new(&f.session, &f.registry, &*f.host);
        let err = reorganizer
            .process(&cluster_stmt(Some("metrics_ts_idx")), ExecContext::top())
            .unwrap_err();
        assert!(matches!(err, MetaError::Transaction(_)));

        // partition 1 stays reorganized, partitions 2 and 3 were not
        assert_eq!(clustered_partitions(&f.host), vec!["metrics_p0"]);
        // the failing unit was unwound, including the descriptor pin
        assert_eq!(f.session.pins().outstanding(), 0);
        assert!(f.session.is_active());
        f.session.commit().unwrap();
    }

    #[test]
    fn test_unmarked_table_without_index_name_errors() {
        let f = fixture(2);
        f.session.begin().unwrap();
        let reorganizer =
            MultiTransactionReorganizer::new(&f.session, &f.registry, &*f.host);
        let err = reorganizer
            .process(&cluster_stmt(None), ExecContext::top())
            .unwrap_err();
        assert!(matches!(err, MetaError::ObjectNotFound(_)));
        // error path leaves the pin for the safety net
        f.session.abort().unwrap();
        assert_eq!(f.session.pins().outstanding(), 0);
    }

    #[test]
    fn test_previously_marked_index_is_used() {
        let f = fixture(1);
        let root = f
            .host
            .resolve_relation(&QualifiedName::bare("metrics"))
            .unwrap();
        let index = f
            .host
            .define_index(root, "metrics_ts_idx", vec!["ts".into()], false);
        f.host.set_clustered(root, index);

        f.session.begin().unwrap();
        let reorganizer =
            MultiTransactionReorganizer::new(&f.session, &f.registry, &*f.host);
        assert!(reorganizer
            .process(&cluster_stmt(None), ExecContext::top())
            .unwrap());
        assert_eq!(clustered_partitions(&f.host), vec!["metrics_p0"]);
        f.session.commit().unwrap();
    }

    #[test]
    fn test_rejected_inside_transaction_block() {
        let f = fixture(1);
        let root = f
            .host
            .resolve_relation(&QualifiedName::bare("metrics"))
            .unwrap();
        f.host
            .define_index(root, "metrics_ts_idx", vec!["ts".into()], false);

        f.session.begin().unwrap();
        let reorganizer =
            MultiTransactionReorganizer::new(&f.session, &f.registry, &*f.host);
        let err = reorganizer
            .process(&cluster_stmt(Some("metrics_ts_idx")), ExecContext::nested())
            .unwrap_err();
        assert!(matches!(err, MetaError::Transaction(_)));
        f.session.abort().unwrap();
    }

    #[test]
    fn test_plain_table_passes_through() {
        let f = fixture(0);
        let host = &f.host;
        let plain = host.mint_relation();
        host.register_name(QualifiedName::bare("plain"), plain);

        f.session.begin().unwrap();
        let reorganizer =
            MultiTransactionReorganizer::new(&f.session, &f.registry, &*f.host);
        let stmt = ClusterStmt {
            relation: Some(QualifiedName::bare("plain")),
            index_name: None,
            verbose: false,
        };
        assert!(!reorganizer.process(&stmt, ExecContext::top()).unwrap());
        assert_eq!(f.session.pins().outstanding(), 0);
        f.session.commit().unwrap();
    }
}
