/// Abstract syntax for schema-modification statements
use crate::types::{ColumnType, QualifiedName, RelationId, Row};

/// Top-level schema-modification statement
#[derive(Debug, Clone)]
pub enum SchemaStatement {
    Truncate(TruncateStmt),
    AlterSchema(AlterSchemaStmt),
    Rename(RenameStmt),
    AlterTable(AlterTableStmt),
    CreateTable(CreateTableStmt),
    CreateIndex(CreateIndexStmt),
    CreateTrigger(CreateTriggerStmt),
    Drop(DropStmt),
    CopyFrom(CopyFromStmt),
    Vacuum(VacuumStmt),
    Reindex(ReindexStmt),
    Cluster(ClusterStmt),
}

/// Kind of object a statement addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Table,
    Index,
    Column,
    Trigger,
}

/// TRUNCATE statement
#[derive(Debug, Clone)]
pub struct TruncateStmt {
    pub relations: Vec<QualifiedName>,
    pub cascade: bool,
}

/// ALTER ... SET SCHEMA statement
#[derive(Debug, Clone)]
pub struct AlterSchemaStmt {
    pub object_type: ObjectType,
    pub relation: QualifiedName,
    pub new_schema: String,
}

/// What a RENAME statement renames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameTarget {
    Table,
    Column,
    Index,
}

/// ALTER ... RENAME statement
#[derive(Debug, Clone)]
pub struct RenameStmt {
    pub target: RenameTarget,
    /// The table (for table/column renames) or the index being renamed
    pub relation: QualifiedName,
    /// Old column name, for column renames
    pub subname: Option<String>,
    pub new_name: String,
}

/// CREATE INDEX statement, also embedded in ALTER TABLE ADD constraints
#[derive(Debug, Clone)]
pub struct CreateIndexStmt {
    /// None lets the host pick a name
    pub index_name: Option<String>,
    pub relation: QualifiedName,
    /// Key columns, in index order
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
    /// CONCURRENTLY was requested
    pub concurrent: bool,
}

/// CREATE TRIGGER statement
#[derive(Debug, Clone)]
pub struct CreateTriggerStmt {
    pub name: String,
    pub relation: QualifiedName,
    /// FOR EACH ROW
    pub for_each_row: bool,
    /// REFERENCING OLD/NEW TABLE transition tables
    pub has_transition_tables: bool,
}

/// Column definition inside CREATE TABLE
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    /// Column-level constraints
    pub constraints: Vec<TableConstraint>,
}

/// Table or column constraint
#[derive(Debug, Clone)]
pub enum TableConstraint {
    ForeignKey {
        /// Referenced table
        referenced: QualifiedName,
        columns: Vec<String>,
    },
    Unique {
        name: Option<String>,
        columns: Vec<String>,
        /// USING INDEX name, when built on an existing index
        existing_index: Option<String>,
    },
    Primary {
        name: Option<String>,
        columns: Vec<String>,
        existing_index: Option<String>,
    },
    Exclusion {
        name: Option<String>,
        columns: Vec<String>,
    },
    Check {
        name: Option<String>,
        expression: String,
    },
}

impl TableConstraint {
    pub fn name(&self) -> Option<&str> {
        match self {
            TableConstraint::ForeignKey { .. } => None,
            TableConstraint::Unique { name, .. }
            | TableConstraint::Primary { name, .. }
            | TableConstraint::Exclusion { name, .. }
            | TableConstraint::Check { name, .. } => name.as_deref(),
        }
    }
}

/// CREATE TABLE statement (seen by the post-hook for constraint checks)
#[derive(Debug, Clone)]
pub struct CreateTableStmt {
    pub relation: QualifiedName,
    pub columns: Vec<ColumnSpec>,
    /// Table-level constraints
    pub constraints: Vec<TableConstraint>,
}

/// What a DROP statement removes
#[derive(Debug, Clone)]
pub enum DropObject {
    Table(Vec<QualifiedName>),
    /// (owning table, trigger name) pairs
    Trigger(Vec<(QualifiedName, String)>),
    Index(Vec<QualifiedName>),
}

/// DROP statement
#[derive(Debug, Clone)]
pub struct DropStmt {
    pub object: DropObject,
    pub cascade: bool,
    pub missing_ok: bool,
}

/// COPY ... FROM statement with its already-decoded row stream
#[derive(Debug, Clone)]
pub struct CopyFromStmt {
    pub relation: QualifiedName,
    /// Column names, in row order
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// VACUUM / ANALYZE statement
#[derive(Debug, Clone)]
pub struct VacuumStmt {
    /// None means the whole database; the dispatcher only cares about
    /// named targets
    pub relation: Option<QualifiedName>,
    /// True for VACUUM (optionally with analyze), false for bare ANALYZE
    pub vacuum: bool,
    pub analyze: bool,
}

/// REINDEX statement target
#[derive(Debug, Clone)]
pub enum ReindexTarget {
    Table(QualifiedName),
    Index(QualifiedName),
}

/// REINDEX statement
#[derive(Debug, Clone)]
pub struct ReindexStmt {
    pub target: ReindexTarget,
}

/// CLUSTER statement
#[derive(Debug, Clone)]
pub struct ClusterStmt {
    /// None re-clusters every previously clustered table; the dispatcher
    /// leaves that to the host
    pub relation: Option<QualifiedName>,
    /// Index to reorganize by; None reuses the previously-marked one
    pub index_name: Option<String>,
    pub verbose: bool,
}

/// ALTER TABLE statement (relkind distinguishes tables from indexes)
#[derive(Debug, Clone)]
pub struct AlterTableStmt {
    pub relkind: ObjectType,
    pub relation: QualifiedName,
    /// Subcommands, processed in list order
    pub cmds: Vec<AlterTableCmd>,
}

/// One ALTER TABLE subcommand
#[derive(Debug, Clone)]
pub enum AlterTableCmd {
    ChangeOwner {
        new_owner: String,
    },
    /// ADD constraint backed by a new index (unique/primary)
    AddIndex {
        index: CreateIndexStmt,
        is_constraint: bool,
    },
    /// ADD CONSTRAINT ... USING INDEX
    AddIndexConstraint {
        index_name: String,
    },
    AddConstraint(TableConstraint),
    DropConstraint {
        name: String,
    },
    AlterColumnType {
        column: String,
        new_type: ColumnType,
    },
    /// SET (options)
    SetRelOptions {
        options: serde_json::Value,
    },
    /// RESET (options)
    ResetRelOptions {
        options: Vec<String>,
    },
    /// SET TABLESPACE, only meaningful with relkind Index here
    SetTableSpace {
        tablespace: String,
    },
}

/// Identity of an object materialized by default execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAddress {
    pub object_id: RelationId,
}

/// One subcommand with the address of the object it materialized
#[derive(Debug, Clone)]
pub struct CollectedSubCmd {
    pub cmd: AlterTableCmd,
    pub address: ObjectAddress,
}

/// Result of default execution, delivered to the post-hook
#[derive(Debug, Clone)]
pub enum CollectedCommand {
    /// Single-object statements (CREATE INDEX, simple ALTER TABLE)
    Simple { address: ObjectAddress },
    /// Multi-subcommand ALTER TABLE
    AlterTable { subcmds: Vec<CollectedSubCmd> },
    /// Statements that materialize nothing the post-hook needs
    None,
}

/// Execution context delivered with each hook call
#[derive(Debug, Clone, Copy)]
pub struct ExecContext {
    /// Statement arrived at the top level, not from a function or a
    /// nested utility call
    pub toplevel: bool,
}

impl ExecContext {
    pub fn top() -> Self {
        Self { toplevel: true }
    }

    pub fn nested() -> Self {
        Self { toplevel: false }
    }
}
