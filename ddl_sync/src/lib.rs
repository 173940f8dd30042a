//! ddl_sync: schema migrations from plain DDL
//!
//! ddl_sync replays a directory of timestamped migration files into the schema
//! they produce, compares it with the schema the application modules declare,
//! and writes the forward and reverse migrations that close the gap.

pub mod collector;
pub mod config;
pub mod error;
pub mod schema;
pub mod utils;

// Re-export main types for easier access
pub use collector::MigrationCollector;
pub use config::{Config, Dialect};
pub use error::{Error, Result};
pub use schema::diff::{Change, ChangeSet, Operation, SchemaDiff};
pub use schema::generator::MigrationGenerator;
pub use schema::parser::DdlParser;
pub use schema::reconciler::{Reconciler, TimedFragment};
pub use schema::types::{Node, NodeKind, SchemaTree};

/// Initialize ddl_sync with the specified configuration file
pub fn init(config_path: &str) -> Result<MigrationCollector> {
    let config = config::load_from_file(config_path)?;
    utils::logging::init_logging(&config.logging)?;
    Ok(MigrationCollector::new(config))
}
