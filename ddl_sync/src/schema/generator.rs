//! Migration generator
//!
//! Renders change sets as SQL and writes them out as timestamped migration
//! files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Dialect, MigrationsConfig};
use crate::error::{Error, Result};
use crate::schema::diff::{Change, ChangeSet, Operation, SchemaDiff};
use crate::schema::parser::DOWN_MARKER;
use crate::schema::types::{attr, Node, NodeKind};
use crate::utils::naming::{down_file_name, escape_identifier, migration_file_name};

/// Marker opening the forward half of a migration file
pub const UP_MARKER: &str = "-- +migrate Up";

/// What [`MigrationGenerator::write`] produced
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenMigration {
    pub up_path: PathBuf,
    /// Separate reverse file, when one is written
    pub down_path: Option<PathBuf>,
    pub up_sql: String,
    pub down_sql: Option<String>,
    /// Nothing was written to disk
    pub dry_run: bool,
}

/// Migration SQL generator
pub struct MigrationGenerator<'a> {
    config: &'a MigrationsConfig,
    dialect: Dialect,
}

impl<'a> MigrationGenerator<'a> {
    /// Create a new migration generator
    pub fn new(config: &'a MigrationsConfig, dialect: Dialect) -> Self {
        Self { config, dialect }
    }

    /// Render one change as an audit comment followed by its statement
    pub fn render_change(&self, change: &Change) -> Result<String> {
        let statement = self.render_statement(change)?;
        Ok(format!("-- {} {}\n{}", change.operation, change.qualified_name(), statement))
    }

    /// Render a whole change set.
    ///
    /// With `comment_irreversible`, changes that cannot be trusted are kept as
    /// commented-out statements so an operator can review them.
    pub fn render_change_set(
        &self,
        changes: &ChangeSet,
        comment_irreversible: bool,
    ) -> Result<String> {
        let mut blocks = Vec::with_capacity(changes.len());

        for change in changes.iter() {
            if change.reversible {
                blocks.push(self.render_change(change)?);
                continue;
            }

            tracing::warn!(
                operation = %change.operation,
                object = %change.qualified_name(),
                "Irreversible change"
            );

            if !comment_irreversible {
                blocks.push(self.render_change(change)?);
                continue;
            }

            let body = match self.render_change(change) {
                Ok(sql) => sql,
                Err(e) => format!("-- {} {}\n{}", change.operation, change.qualified_name(), e),
            };
            let commented: Vec<String> = body.lines().map(|line| format!("-- {}", line)).collect();
            blocks.push(format!(
                "-- WARNING: irreversible, original definition unavailable\n{}",
                commented.join("\n")
            ));
        }

        Ok(blocks.join("\n\n"))
    }

    /// Write the migration for `diff`.
    ///
    /// Returns `None` when there is nothing to migrate. Existing files are
    /// never overwritten.
    pub fn write(&self, diff: &SchemaDiff) -> Result<Option<WrittenMigration>> {
        if diff.forward.is_empty() {
            tracing::info!("No schema changes detected, no migration written");
            return Ok(None);
        }

        let irreversible: Vec<String> = diff.irreversible().map(Change::qualified_name).collect();
        if !irreversible.is_empty() && self.config.fail_on_irreversible {
            return Err(Error::IrreversibleChange(irreversible.join(", ")));
        }

        let timestamp = diff.forward.timestamp.timestamp();
        let directory = Path::new(&self.config.directory);

        let up_body = self.render_change_set(&diff.forward, false)?;
        let down_body = if self.config.include_down {
            Some(self.render_change_set(&diff.reverse, true)?)
        } else {
            None
        };

        let mut up_sql = format!("{}\n\n{}\n", UP_MARKER, up_body);
        let mut down_sql = None;
        let mut down_path = None;

        if let Some(body) = down_body {
            let section = format!("{}\n\n{}\n", DOWN_MARKER, body);
            if self.config.co_located {
                up_sql.push('\n');
                up_sql.push_str(&section);
            } else {
                down_path = Some(directory.join(down_file_name(timestamp)));
                down_sql = Some(section);
            }
        }

        let up_path = directory.join(migration_file_name(timestamp));

        if self.config.dry_run {
            tracing::info!(path = %up_path.display(), "Dry run, migration not written");
            tracing::debug!(sql = %up_sql, "Forward migration");
            if let Some(sql) = &down_sql {
                tracing::debug!(sql = %sql, "Reverse migration");
            }
        } else {
            fs::create_dir_all(directory)?;
            write_new_file(&up_path, &up_sql)?;
            if let (Some(path), Some(sql)) = (&down_path, &down_sql) {
                write_new_file(path, sql)?;
            }
            tracing::info!(
                path = %up_path.display(),
                changes = diff.forward.len(),
                irreversible = irreversible.len(),
                "Migration written"
            );
        }

        Ok(Some(WrittenMigration {
            up_path,
            down_path,
            up_sql,
            down_sql,
            dry_run: self.config.dry_run,
        }))
    }

    fn render_statement(&self, change: &Change) -> Result<String> {
        let table = self.ident(&change.target_table);
        let object = self.ident(&change.object_name);

        let sql = match change.operation {
            Operation::CreateTable => {
                let definition = self.payload(change)?;
                let mut lines = Vec::new();
                for child in &definition.children {
                    match child.kind {
                        NodeKind::Column => lines.push(self.column_definition(child)?),
                        NodeKind::Constraint => lines.push(self.constraint_definition(child)?),
                        _ => {}
                    }
                }
                format!("CREATE TABLE {} (\n    {}\n);", table, lines.join(",\n    "))
            }
            // SQLite has no CASCADE; foreign keys there do not block the drop
            Operation::DropTable if self.dialect == Dialect::Sqlite => {
                format!("DROP TABLE IF EXISTS {};", table)
            }
            Operation::DropTable => format!("DROP TABLE IF EXISTS {} CASCADE;", table),
            Operation::AddColumn => format!(
                "ALTER TABLE {} ADD COLUMN {};",
                table,
                self.column_definition(self.payload(change)?)?
            ),
            Operation::DropColumn => {
                format!("ALTER TABLE {} DROP COLUMN IF EXISTS {};", table, object)
            }
            Operation::AlterColumnType => {
                let column = self.payload(change)?;
                let data_type = column.data_type().ok_or_else(|| {
                    Error::MigrationError(format!(
                        "No type recorded for {}",
                        change.qualified_name()
                    ))
                })?;
                format!("ALTER TABLE {} ALTER COLUMN {} TYPE {};", table, object, data_type)
            }
            Operation::DropNotNull => {
                format!("ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL;", table, object)
            }
            Operation::SetDefault => {
                let column = self.payload(change)?;
                let default = column.text_attr(attr::DEFAULT).ok_or_else(|| {
                    Error::MigrationError(format!(
                        "No default recorded for {}",
                        change.qualified_name()
                    ))
                })?;
                format!("ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};", table, object, default)
            }
            Operation::AddConstraint => format!(
                "ALTER TABLE {} ADD {};",
                table,
                self.constraint_definition(self.payload(change)?)?
            ),
            Operation::DropConstraint => {
                format!("ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};", table, object)
            }
            Operation::CreateIndex => {
                let index = self.payload(change)?;
                let columns = index.list_attr(attr::COLUMNS);
                if columns.is_empty() || change.target_table.is_empty() {
                    return Err(Error::MigrationError(format!(
                        "Index {} has no recorded definition",
                        change.object_name
                    )));
                }
                format!(
                    "CREATE {}INDEX {} ON {} ({});",
                    if index.flag(attr::UNIQUE) { "UNIQUE " } else { "" },
                    object,
                    table,
                    columns.join(", ")
                )
            }
            Operation::DropIndex => format!("DROP INDEX IF EXISTS {};", object),
        };

        Ok(sql)
    }

    fn payload<'c>(&self, change: &'c Change) -> Result<&'c Node> {
        change.payload.as_ref().ok_or_else(|| {
            Error::MigrationError(format!(
                "{} {} carries no definition",
                change.operation,
                change.qualified_name()
            ))
        })
    }

    fn ident(&self, name: &str) -> String {
        escape_identifier(name, self.dialect)
    }

    fn column_definition(&self, column: &Node) -> Result<String> {
        let data_type = column
            .data_type()
            .ok_or_else(|| Error::MigrationError(format!("Column {} has no type", column.name)))?;

        let mut sql = format!("{} {}", self.ident(&column.name), data_type);

        let primary_key = column.flag(attr::PRIMARY_KEY);
        let nullable = column
            .attr(attr::NULLABLE)
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if !nullable && !primary_key {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = column.text_attr(attr::DEFAULT) {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if column.flag(attr::UNIQUE) {
            sql.push_str(" UNIQUE");
        }
        if let Some(reference) = column.text_attr(attr::FOREIGN_KEY) {
            sql.push_str(&format!(" REFERENCES {}", reference));
        }
        if let Some(check) = column.text_attr(attr::CHECK) {
            sql.push_str(&format!(" CHECK ({})", check));
        }

        Ok(sql)
    }

    fn constraint_definition(&self, constraint: &Node) -> Result<String> {
        let name = self.ident(&constraint.name);
        let columns = constraint
            .list_attr(attr::COLUMNS)
            .iter()
            .map(|c| self.ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let kind = constraint.text_attr(attr::KIND).unwrap_or_else(|| {
            if constraint.flag(attr::PRIMARY_KEY) {
                "primary_key"
            } else if constraint.text_attr(attr::REFERENCES).is_some() {
                "foreign_key"
            } else if constraint.text_attr(attr::CHECK).is_some() {
                "check"
            } else {
                "unique"
            }
        });

        if kind == "check" {
            let expr = constraint.text_attr(attr::CHECK).ok_or_else(|| {
                Error::MigrationError(format!(
                    "Check constraint {} has no expression",
                    constraint.name
                ))
            })?;
            return Ok(format!("CONSTRAINT {} CHECK ({})", name, expr));
        }

        if columns.is_empty() {
            return Err(Error::MigrationError(format!(
                "Constraint {} has no columns",
                constraint.name
            )));
        }

        let sql = match kind {
            "primary_key" => format!("CONSTRAINT {} PRIMARY KEY ({})", name, columns),
            "foreign_key" => {
                let references = constraint.text_attr(attr::REFERENCES).ok_or_else(|| {
                    Error::MigrationError(format!(
                        "Foreign key {} has no referenced table",
                        constraint.name
                    ))
                })?;
                let referenced = constraint.list_attr(attr::REFERENCED_COLUMNS);
                if referenced.is_empty() {
                    format!(
                        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}",
                        name,
                        columns,
                        self.ident(references)
                    )
                } else {
                    format!(
                        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                        name,
                        columns,
                        self.ident(references),
                        referenced.iter().map(|c| self.ident(c)).collect::<Vec<_>>().join(", ")
                    )
                }
            }
            _ => format!("CONSTRAINT {} UNIQUE ({})", name, columns),
        };

        Ok(sql)
    }
}

fn write_new_file(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Err(Error::MigrationError(format!(
            "Refusing to overwrite existing migration {}",
            path.display()
        )));
    }
    fs::write(path, contents)?;
    Ok(())
}
