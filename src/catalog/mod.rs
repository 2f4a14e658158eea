//! Catalog module - durable logical-table records and the decoded-descriptor
//! registry

pub mod registry;
pub mod store;

pub use registry::LogicalTableRegistry;
pub use store::Catalog;
