//! Core value and identifier types for the metadata layer

mod table;

pub use table::{
    ColumnType, Dimension, DimensionKind, IndexDef, LogicalTable, PartitionRef, RoutingCoord,
    RoutingPoint, TriggerDef,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar value carried by routed rows and dimension coordinates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// Integer value
    Integer(i64),

    /// Floating point value
    Float(f64),

    /// Boolean value
    Bool(bool),

    /// Text string
    Text(String),

    /// Timestamp (i64 microseconds)
    Timestamp(i64),

    /// Null value
    Null,
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            _ => None,
        }
    }
}

/// A row contains multiple values, ordered by the statement's column list
pub type Row = Vec<Value>;

/// Identifier of any relation known to the host catalog (tables, partitions,
/// indexes, triggers). Stable for the lifetime of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(pub u64);

impl RelationId {
    pub const INVALID: RelationId = RelationId(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a logical table in the catalog. Never reused and never
/// changed by rename or schema moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalTableId(pub u32);

impl fmt::Display for LogicalTableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Schema-qualified object name as written in a statement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Schema, or None when the statement left it to the search path
    pub schema: Option<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_ordering_across_numeric_kinds() {
        assert!(Value::Integer(1) < Value::Float(1.5));
        assert!(Value::Float(2.0) > Value::Integer(1));
        assert_eq!(
            Value::Text("a".into()).partial_cmp(&Value::Integer(1)),
            None
        );
    }

    #[test]
    fn test_qualified_name_display() {
        assert_eq!(QualifiedName::new("public", "metrics").to_string(), "public.metrics");
        assert_eq!(QualifiedName::bare("metrics").to_string(), "metrics");
    }
}
