use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ddl_sync::config::{self, LoggingConfig};
use ddl_sync::utils::logging::init_logging;
use ddl_sync::MigrationCollector;

/// ddl_sync - migrations from declared DDL schemas
#[derive(Parser)]
#[command(name = "ddl_sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "ddl_sync.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff history against the module schemas and write a new migration
    Collect {
        /// Render the migration without writing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the forward and reverse changes
    Diff {
        /// Print the changes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a reconciled schema as JSON
    Schema {
        /// Show the module schema instead of the reconciled history
        #[arg(long)]
        target: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.to_string_lossy().to_string();
    let mut config = config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path))?;

    if cli.verbose {
        let logging = config.logging.get_or_insert_with(|| LoggingConfig {
            level: "debug".to_string(),
            file: None,
            format: "text".to_string(),
            stdout: true,
        });
        logging.level = "debug".to_string();
    } else if config.logging.is_none() {
        config.logging = Some(LoggingConfig {
            level: "info".to_string(),
            file: None,
            format: "text".to_string(),
            stdout: true,
        });
    }
    init_logging(&config.logging)?;

    if let Commands::Collect { dry_run: true } = cli.command {
        config.migrations.dry_run = true;
    }

    let collector = MigrationCollector::new(config);

    match cli.command {
        Commands::Collect { .. } => {
            let diff = collector.collect_changes().context("Failed to collect schema changes")?;
            match collector.store_migrations(&diff)? {
                None => println!("No changes detected"),
                Some(written) if written.dry_run => {
                    println!("{}", written.up_sql);
                    if let Some(down) = &written.down_sql {
                        println!("{}", down);
                    }
                }
                Some(written) => {
                    println!("Created {}", written.up_path.display());
                    if let Some(path) = &written.down_path {
                        println!("Created {}", path.display());
                    }
                }
            }
        }
        Commands::Diff { json } => {
            let diff = collector.collect_changes().context("Failed to collect schema changes")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&diff)?);
            } else if diff.is_empty() {
                println!("No changes detected");
            } else {
                println!("Forward:");
                for change in diff.forward.iter() {
                    println!("  {} {}", change.operation, change.qualified_name());
                }
                println!("Reverse:");
                for change in diff.reverse.iter() {
                    let marker = if change.reversible { "" } else { " (irreversible)" };
                    println!("  {} {}{}", change.operation, change.qualified_name(), marker);
                }
            }
        }
        Commands::Schema { target } => {
            let reconciliation = if target {
                collector.load_module_schema()?
            } else {
                collector.load_existing_schema()?
            };
            for warning in &reconciliation.warnings {
                eprintln!("warning: {}: {}", warning.provenance, warning.message);
            }
            println!("{}", serde_json::to_string_pretty(&reconciliation.schema)?);
        }
    }

    Ok(())
}
