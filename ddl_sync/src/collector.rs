//! Migration collector
//!
//! Discovers the migration history and the module schema files on disk,
//! reconciles both into schema trees and turns their difference into a new
//! migration.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::schema::diff::SchemaDiff;
use crate::schema::generator::{MigrationGenerator, WrittenMigration};
use crate::schema::parser::DdlParser;
use crate::schema::reconciler::{ReconcileWarning, Reconciler, Reconciliation, TimedFragment};
use crate::utils::naming::{is_migration_file, parse_time_key};

/// Collects schema changes between the migration history and the modules
pub struct MigrationCollector {
    config: Config,
    parser: DdlParser,
    reconciler: Reconciler,
}

impl MigrationCollector {
    /// Create a new collector
    pub fn new(config: Config) -> Self {
        let dialect = config.schema.dialect;
        Self {
            config,
            parser: DdlParser::new(dialect),
            reconciler: Reconciler::new(dialect),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replay every `changes-<timestamp>.sql` file into the baseline schema.
    ///
    /// Unreadable timestamps replay first; files that fail to parse are
    /// skipped and reported as warnings.
    pub fn load_existing_schema(&self) -> Result<Reconciliation> {
        let mut fragments = Vec::new();
        let mut skipped = Vec::new();

        for path in self.history_files()? {
            let file_name = file_name(&path);
            let time_key = match parse_time_key(&file_name) {
                Some(key) => key,
                None => {
                    let message = format!(
                        "Could not read a timestamp from {}, replaying it first",
                        file_name
                    );
                    tracing::warn!(file = %file_name, "{}", message);
                    skipped.push(ReconcileWarning {
                        provenance: file_name.clone(),
                        time_key: 0,
                        message,
                    });
                    0
                }
            };

            let sql = fs::read_to_string(&path)?;
            match self.parser.parse_fragments(&sql, &file_name) {
                Ok(trees) => {
                    tracing::debug!(
                        file = %file_name,
                        statements = trees.len(),
                        "Loaded migration"
                    );
                    for (n, tree) in trees.into_iter().enumerate() {
                        let provenance = format!("{}#{}", file_name, n + 1);
                        fragments.push(TimedFragment::new(tree, time_key, provenance));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        file = %file_name,
                        error = %e,
                        "Skipping migration that failed to parse"
                    );
                    skipped.push(ReconcileWarning {
                        provenance: file_name.clone(),
                        time_key,
                        message: e.to_string(),
                    });
                }
            }
        }

        let mut reconciliation = self.reconciler.reconcile(fragments);
        skipped.append(&mut reconciliation.warnings);
        reconciliation.warnings = skipped;
        Ok(reconciliation)
    }

    /// Reconcile the module schema files into the target schema.
    ///
    /// Any parse failure is fatal: an incomplete target would read as
    /// objects to drop.
    pub fn load_module_schema(&self) -> Result<Reconciliation> {
        let mut fragments = Vec::new();

        for path in self.module_files()? {
            let label = path.display().to_string();
            let sql = fs::read_to_string(&path)?;
            let trees = self.parser.parse_fragments(&sql, &label)?;
            tracing::debug!(file = %label, statements = trees.len(), "Loaded module schema");

            for (n, tree) in trees.into_iter().enumerate() {
                fragments.push(TimedFragment::new(tree, 0, format!("{}#{}", label, n + 1)));
            }
        }

        Ok(self.reconciler.reconcile(fragments))
    }

    /// Diff the reconciled history against the module schema
    pub fn collect_changes(&self) -> Result<SchemaDiff> {
        let baseline = self.load_existing_schema()?;
        let target = self.load_module_schema()?;

        let diff = SchemaDiff::generate(&baseline.schema, &target.schema);
        for change in diff.irreversible() {
            tracing::warn!(
                operation = %change.operation,
                object = %change.qualified_name(),
                "Change cannot be fully reversed"
            );
        }

        Ok(diff)
    }

    /// Write `diff` as a new migration
    pub fn store_migrations(&self, diff: &SchemaDiff) -> Result<Option<WrittenMigration>> {
        MigrationGenerator::new(&self.config.migrations, self.config.schema.dialect).write(diff)
    }

    /// Collect and store in one go
    pub fn sync(&self) -> Result<Option<WrittenMigration>> {
        let diff = self.collect_changes()?;
        self.store_migrations(&diff)
    }

    /// History files in name order; a missing directory is an empty history
    fn history_files(&self) -> Result<Vec<PathBuf>> {
        let directory = Path::new(&self.config.migrations.directory);
        if !directory.exists() {
            tracing::info!(
                directory = %directory.display(),
                "No migration directory yet, starting from an empty schema"
            );
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file() && is_migration_file(&file_name(entry.path())) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn module_files(&self) -> Result<Vec<PathBuf>> {
        let modules = &self.config.modules;
        let pattern = glob::Pattern::new(&modules.schema_pattern)?;
        let exclude_paths = modules.exclude_paths.clone().unwrap_or_default();

        let mut files = Vec::new();
        for path in &modules.paths {
            let base_path = Path::new(path);
            if !base_path.exists() {
                return Err(Error::ConfigError(format!("Module path does not exist: {}", path)));
            }

            let mut walker = WalkDir::new(base_path).follow_links(true);
            if !modules.recursive_scan {
                walker = walker.max_depth(1);
            }

            for entry in walker {
                let entry = entry?;
                let path = entry.path();

                if exclude_paths.iter().any(|exclude| path.starts_with(exclude)) {
                    continue;
                }

                if entry.file_type().is_file() && pattern.matches(&file_name(path)) {
                    files.push(entry.into_path());
                }
            }
        }

        files.sort();
        files.dedup();
        tracing::info!(files = files.len(), "Discovered module schema files");
        Ok(files)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
