/// Row routing for COPY FROM on a logical table
///
/// Default copy writes every row into the named table; for a logical table
/// each row must instead land in the partition its dimension coordinates
/// select. Rows are batched per target partition so consecutive rows for
/// the same partition become one backend call.
use crate::error::{MetaError, Result};
use crate::host::PartitionBackend;
use crate::sql::CopyFromStmt;
use crate::types::{
    Dimension, DimensionKind, LogicalTable, PartitionRef, Row, RoutingCoord, RoutingPoint, Value,
};
use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

/// Fixed seeds so the same value always hashes to the same slice, across
/// processes and restarts.
const HASH_SEEDS: (u64, u64, u64, u64) = (
    0x9e37_79b9_7f4a_7c15,
    0xf39c_343f_4d2e_58a1,
    0x2545_f491_4f6c_dd1d,
    0x27d4_eb2f_1656_67c5,
);

pub struct CopyRouter<'a> {
    backend: &'a dyn PartitionBackend,
    batch_size: usize,
}

impl<'a> CopyRouter<'a> {
    pub fn new(backend: &'a dyn PartitionBackend, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
        }
    }

    /// Route every row of the statement to its partition. Returns the
    /// number of rows inserted by this invocation; re-entrant executions
    /// are accounted separately by the dispatcher.
    pub fn route(&self, table: &LogicalTable, stmt: &CopyFromStmt) -> Result<u64> {
        let positions = dimension_positions(table, &stmt.columns)?;

        let mut processed = 0u64;
        let mut pending: Option<(PartitionRef, Vec<Row>)> = None;

        for row in &stmt.rows {
            let point = routing_point(table, row, &positions)?;
            let target = self.backend.partition_for_point(table, &point)?;

            match &mut pending {
                Some((partition, batch))
                    if *partition == target && batch.len() < self.batch_size =>
                {
                    batch.push(row.clone());
                }
                _ => {
                    if let Some((partition, batch)) = pending.take() {
                        processed += self.backend.insert_rows(&partition, batch)?;
                    }
                    pending = Some((target, vec![row.clone()]));
                }
            }
        }

        if let Some((partition, batch)) = pending.take() {
            processed += self.backend.insert_rows(&partition, batch)?;
        }

        Ok(processed)
    }
}

/// Position of each dimension column within the statement's column list.
fn dimension_positions(table: &LogicalTable, columns: &[String]) -> Result<Vec<usize>> {
    table
        .dimensions
        .iter()
        .map(|dimension| {
            columns
                .iter()
                .position(|c| c == &dimension.column_name)
                .ok_or_else(|| {
                    MetaError::InvalidArgument(format!(
                        "partitioning column \"{}\" missing from the copy column list",
                        dimension.column_name
                    ))
                })
        })
        .collect()
}

fn routing_point(table: &LogicalTable, row: &Row, positions: &[usize]) -> Result<RoutingPoint> {
    table
        .dimensions
        .iter()
        .zip(positions)
        .map(|(dimension, &position)| {
            let value = row.get(position).ok_or_else(|| {
                MetaError::InvalidArgument(format!(
                    "row has no value for partitioning column \"{}\"",
                    dimension.column_name
                ))
            })?;
            coord_for(dimension, value)
        })
        .collect()
}

fn coord_for(dimension: &Dimension, value: &Value) -> Result<RoutingCoord> {
    if matches!(value, Value::Null) {
        return Err(MetaError::InvalidArgument(format!(
            "partitioning column \"{}\" cannot be null",
            dimension.column_name
        )));
    }
    match dimension.kind {
        DimensionKind::Range { .. } => Ok(RoutingCoord::Range(range_value(dimension, value)?)),
        DimensionKind::Hash { slices } => {
            Ok(RoutingCoord::Hash(hash_value(value) % u64::from(slices)))
        }
    }
}

fn range_value(dimension: &Dimension, value: &Value) -> Result<i64> {
    match value {
        Value::Integer(v) => Ok(*v),
        Value::Timestamp(v) => Ok(*v),
        Value::Float(v) => Ok(*v as i64),
        other => Err(MetaError::InvalidArgument(format!(
            "value {other:?} cannot be routed along range dimension \"{}\"",
            dimension.column_name
        ))),
    }
}

fn hash_value(value: &Value) -> u64 {
    let state = RandomState::with_seeds(HASH_SEEDS.0, HASH_SEEDS.1, HASH_SEEDS.2, HASH_SEEDS.3);
    let mut hasher = state.build_hasher();
    match value {
        Value::Integer(v) => v.hash(&mut hasher),
        Value::Timestamp(v) => v.hash(&mut hasher),
        Value::Float(v) => v.to_bits().hash(&mut hasher),
        Value::Text(v) => v.hash(&mut hasher),
        Value::Bool(v) => v.hash(&mut hasher),
        Value::Null => {}
    }
    hasher.finish()
}
