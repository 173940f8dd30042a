//! Schema module for ddl_sync
//!
//! This module handles schema trees, DDL ingestion, history reconciliation,
//! diffing and migration generation.

pub mod diff;
pub mod generator;
pub mod parser;
pub mod reconciler;
pub mod types;

// Re-export key types
pub use diff::{compare_tables, Change, ChangeSet, Operation, SchemaDiff};
pub use generator::{MigrationGenerator, WrittenMigration};
pub use parser::DdlParser;
pub use reconciler::{ReconcileWarning, Reconciler, Reconciliation, TimedFragment};
pub use types::{AttrValue, Node, NodeAction, NodeKind, SchemaTree};
