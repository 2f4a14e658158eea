/// Logical table descriptors and partition metadata
use crate::types::{LogicalTableId, RelationId};
use serde::{Deserialize, Serialize};

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// Timestamp (i64 microseconds)
    Timestamp,
    /// Text/String
    Text,
    /// Integer
    Integer,
    /// Float
    Float,
    /// Boolean
    Bool,
}

/// Partitioning rule attached to a dimension column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimensionKind {
    /// Range dimension: rows are routed by value intervals. The typical
    /// case is a timestamp column sliced into fixed intervals.
    Range {
        /// Interval width in the column's native unit (microseconds for
        /// timestamps)
        interval: i64,
    },
    /// Hash dimension: rows are routed by hashing the value into a fixed
    /// number of slices.
    Hash { slices: u16 },
}

impl DimensionKind {
    pub fn is_hash(&self) -> bool {
        matches!(self, DimensionKind::Hash { .. })
    }
}

/// One partitioning dimension of a logical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Column backing this dimension
    pub column_name: String,
    /// Column data type
    pub column_type: ColumnType,
    /// Routing rule
    pub kind: DimensionKind,
}

impl Dimension {
    pub fn range(column_name: impl Into<String>, column_type: ColumnType, interval: i64) -> Self {
        Self {
            column_name: column_name.into(),
            column_type,
            kind: DimensionKind::Range { interval },
        }
    }

    pub fn hash(column_name: impl Into<String>, column_type: ColumnType, slices: u16) -> Self {
        Self {
            column_name: column_name.into(),
            column_type,
            kind: DimensionKind::Hash { slices },
        }
    }
}

/// Decoded logical-table descriptor.
///
/// Immutable once built; renames and retypes go through the registry, which
/// rewrites the catalog record and rebuilds the descriptor on the next fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalTable {
    /// Catalog identifier; survives renames and schema moves
    pub id: LogicalTableId,
    /// Owning schema name
    pub schema_name: String,
    /// Table name
    pub table_name: String,
    /// Relation id of the physical root object
    pub root_relation: RelationId,
    /// Ordered partitioning dimensions
    pub dimensions: Vec<Dimension>,
}

impl LogicalTable {
    /// Look up a dimension by its backing column name.
    pub fn dimension_by_column(&self, column: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.column_name == column)
    }

    /// True when `column` backs a hash dimension. Hash-routed columns
    /// cannot change type without rewriting every slice boundary.
    pub fn has_hash_dimension_on(&self, column: &str) -> bool {
        self.dimension_by_column(column)
            .map(|d| d.kind.is_hash())
            .unwrap_or(false)
    }
}

/// One physical partition of a logical table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRef {
    /// Partition id, unique within the catalog
    pub id: u32,
    /// Logical table this partition belongs to
    pub table_id: LogicalTableId,
    /// Relation id of the partition's physical table
    pub relation: RelationId,
    /// Schema holding the partition (usually an internal one)
    pub schema_name: String,
    /// Partition table name
    pub table_name: String,
}

/// Index attached to a logical table or a partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub relation: RelationId,
    /// Key columns, in index order
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Row trigger attached to a logical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
    pub name: String,
    pub relation: RelationId,
    /// FOR EACH ROW triggers are replicated onto partitions
    pub for_each_row: bool,
}

/// Coordinate of a row along one dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingCoord {
    /// Raw range-dimension value
    Range(i64),
    /// Hash bucket, already reduced modulo the dimension's slice count
    Hash(u64),
}

/// Full routing point of a row: one coordinate per dimension, in
/// dimension order
pub type RoutingPoint = Vec<RoutingCoord>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> LogicalTable {
        LogicalTable {
            id: LogicalTableId(7),
            schema_name: "public".into(),
            table_name: "metrics".into(),
            root_relation: RelationId(100),
            dimensions: vec![
                Dimension::range("ts", ColumnType::Timestamp, 86_400_000_000),
                Dimension::hash("device", ColumnType::Integer, 4),
            ],
        }
    }

    #[test]
    fn test_dimension_lookup() {
        let table = sample_table();
        assert!(table.dimension_by_column("ts").is_some());
        assert!(table.dimension_by_column("nope").is_none());
    }

    #[test]
    fn test_hash_dimension_detection() {
        let table = sample_table();
        assert!(!table.has_hash_dimension_on("ts"));
        assert!(table.has_hash_dimension_on("device"));
        assert!(!table.has_hash_dimension_on("missing"));
    }
}
