//! Configuration handling for ddl_sync

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Load configuration from a TOML (or YAML) file
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    let is_yaml = Path::new(path)
        .extension()
        .map_or(false, |ext| ext == "yaml" || ext == "yml");

    let config: Config = if is_yaml {
        serde_yaml::from_str(&config_str)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?
    } else {
        toml::from_str(&config_str)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?
    };

    config.validate()?;
    Ok(config)
}

/// Represents the complete ddl_sync configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub schema: SchemaConfig,
    pub migrations: MigrationsConfig,
    pub modules: ModulesConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Build a configuration with defaults for everything but the two directories
    pub fn new(migrations_dir: impl Into<String>, module_paths: Vec<String>) -> Self {
        Self {
            schema: SchemaConfig::default(),
            migrations: MigrationsConfig {
                directory: migrations_dir.into(),
                include_down: true,
                co_located: false,
                fail_on_irreversible: false,
                dry_run: false,
            },
            modules: ModulesConfig {
                paths: module_paths,
                exclude_paths: None,
                schema_pattern: default_schema_pattern(),
                recursive_scan: true,
            },
            logging: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.migrations.directory.trim().is_empty() {
            return Err(Error::ConfigError("migrations.directory must not be empty".to_string()));
        }
        if self.modules.paths.is_empty() {
            return Err(Error::ConfigError("modules.paths must list at least one path".to_string()));
        }
        Ok(())
    }
}

/// SQL dialect the DDL is written in
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    Generic,
    Mysql,
    Sqlite,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Generic => "generic",
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Dialect recorded on a schema tree; unknown names fall back to the default
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "generic" => Dialect::Generic,
            "mysql" => Dialect::Mysql,
            "sqlite" => Dialect::Sqlite,
            _ => Dialect::Postgres,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema interpretation configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SchemaConfig {
    #[serde(default)]
    pub dialect: Dialect,
}

/// Migration file settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MigrationsConfig {
    /// Directory holding the `changes-<timestamp>.sql` history
    pub directory: String,
    /// Emit the reverse change set
    #[serde(default = "default_true")]
    pub include_down: bool,
    /// Write the reverse change set into the same file under `-- +migrate Down`
    #[serde(default)]
    pub co_located: bool,
    /// Refuse to write migrations containing irreversible changes
    #[serde(default)]
    pub fail_on_irreversible: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// Module schema discovery configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModulesConfig {
    pub paths: Vec<String>,
    pub exclude_paths: Option<Vec<String>>,
    #[serde(default = "default_schema_pattern")]
    pub schema_pattern: String,
    #[serde(default = "default_true")]
    pub recursive_scan: bool,
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub stdout: bool,
}

fn default_true() -> bool {
    true
}

fn default_schema_pattern() -> String {
    "*-schema.sql".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_config_loading_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [migrations]
            directory = "migrations"

            [modules]
            paths = ["modules"]
            "#,
        )
        .unwrap();

        assert_eq!(config.schema.dialect, Dialect::Postgres);
        assert_eq!(config.migrations.include_down, true);
        assert_eq!(config.migrations.co_located, false);
        assert_eq!(config.modules.schema_pattern, "*-schema.sql");
        assert!(config.modules.recursive_scan);
        assert!(config.logging.is_none());
    }

    #[test]
    fn test_config_loading_full() {
        let config: Config = toml::from_str(
            r#"
            [schema]
            dialect = "sqlite"

            [migrations]
            directory = "db/migrations"
            include_down = false
            co_located = true
            fail_on_irreversible = true
            dry_run = true

            [modules]
            paths = ["modules/core", "modules/crm"]
            exclude_paths = ["modules/crm/legacy"]
            schema_pattern = "*.schema.sql"
            recursive_scan = false

            [logging]
            level = "debug"
            format = "json"
            stdout = true
            "#,
        )
        .unwrap();

        assert_eq!(config.schema.dialect, Dialect::Sqlite);
        assert!(config.migrations.fail_on_irreversible);
        assert_eq!(config.modules.paths.len(), 2);
        assert_eq!(config.modules.exclude_paths, Some(vec!["modules/crm/legacy".to_string()]));
        assert_eq!(config.logging.unwrap().format, "json");
    }

    #[test]
    fn test_load_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ddl_sync.yaml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "migrations:\n  directory: migrations\nmodules:\n  paths: [modules]"
        )
        .unwrap();

        let config = load_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.migrations.directory, "migrations");
        assert_eq!(config.modules.paths, vec!["modules".to_string()]);
    }

    #[test]
    fn test_empty_module_paths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ddl_sync.toml");
        fs::write(&path, "[migrations]\ndirectory = \"m\"\n[modules]\npaths = []\n").unwrap();

        let err = load_from_file(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }
}
