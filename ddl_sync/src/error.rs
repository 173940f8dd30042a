//! Error types for ddl_sync

use thiserror::Error;

/// Result type for ddl_sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ddl_sync
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to parse {source_name}: {message}")]
    ParseError {
        source_name: String,
        message: String,
    },

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Irreversible change: {0}")]
    IrreversibleChange(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Directory walk error: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Build a parse error for the named source (file name, provenance label)
    pub fn parse(source_name: impl Into<String>, message: impl ToString) -> Self {
        Error::ParseError {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }
}

/// Convert Serde JSON errors to ddl_sync errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert TOML deserialization errors to ddl_sync errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

impl From<glob::PatternError> for Error {
    fn from(error: glob::PatternError) -> Self {
        Error::ConfigError(format!("Invalid file pattern: {}", error))
    }
}
