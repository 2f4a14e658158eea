/// Schema-statement surface
///
/// The host environment parses statements; this module is the typed form it
/// hands to the dispatcher. Statement kinds are a closed sum type matched
/// exhaustively, so a new kind is a compile error until every handler has
/// decided what to do with it.

pub mod ast;

pub use ast::{
    AlterSchemaStmt, AlterTableCmd, AlterTableStmt, ClusterStmt, CollectedCommand,
    CollectedSubCmd, ColumnSpec, CopyFromStmt, CreateIndexStmt, CreateTableStmt,
    CreateTriggerStmt, DropObject, DropStmt, ExecContext, ObjectAddress, ObjectType, ReindexStmt,
    ReindexTarget, RenameStmt, RenameTarget, SchemaStatement, TableConstraint, TruncateStmt,
    VacuumStmt,
};
