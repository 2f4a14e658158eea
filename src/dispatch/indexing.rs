/// Index and constraint verification against partitioning dimensions
use crate::error::{MetaError, Result};
use crate::host::ConstraintVerifier;
use crate::sql::{CreateIndexStmt, TableConstraint};
use crate::types::LogicalTable;

/// Default verifier: a unique/primary/exclusion key must cover every
/// partitioning dimension, otherwise two rows that compare equal on the key
/// could land in different partitions and the constraint could not be
/// enforced partition-locally.
pub struct DimensionCoverageVerifier;

impl ConstraintVerifier for DimensionCoverageVerifier {
    fn verify_columns(&self, table: &LogicalTable, columns: &[String]) -> Result<()> {
        for dimension in &table.dimensions {
            if !columns.iter().any(|c| c == &dimension.column_name) {
                return Err(MetaError::unsupported_with_hint(
                    format!(
                        "cannot create a unique constraint without the column \"{}\" used in partitioning",
                        dimension.column_name
                    ),
                    "Include every partitioning column in the constraint key, or create a plain index instead.",
                ));
            }
        }
        Ok(())
    }
}

/// Validate a CREATE INDEX against a logical table.
pub fn verify_index(
    verifier: &dyn ConstraintVerifier,
    table: &LogicalTable,
    stmt: &CreateIndexStmt,
) -> Result<()> {
    if stmt.unique || stmt.primary {
        verifier.verify_columns(table, &stmt.columns)?;
    }
    Ok(())
}

/// Validate a constraint being attached to a logical table.
pub fn verify_constraint(
    verifier: &dyn ConstraintVerifier,
    table: &LogicalTable,
    constraint: &TableConstraint,
) -> Result<()> {
    match constraint {
        // FKs from a logical table outward are the host's business; FKs
        // pointing at a logical table are rejected elsewhere
        TableConstraint::ForeignKey { .. } => Ok(()),
        TableConstraint::Unique {
            existing_index: Some(_),
            ..
        }
        | TableConstraint::Primary {
            existing_index: Some(_),
            ..
        } => {
            // constraints built on an existing index were verified when
            // that index was created
            Ok(())
        }
        TableConstraint::Unique { columns, .. }
        | TableConstraint::Primary { columns, .. }
        | TableConstraint::Exclusion { columns, .. } => {
            verifier.verify_columns(table, columns)
        }
        TableConstraint::Check { .. } => Ok(()),
    }
}
