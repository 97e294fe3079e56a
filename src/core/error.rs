use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProspectusError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(#[from] toml::de::Error),
    #[error("Failed to initialize database: {0}")]
    DatabaseInitializationError(String),
    #[error("Path error: {0}")]
    PathError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already locked: {0}")]
    AlreadyLocked(String),
    #[error("Not locked: {0}")]
    NotLocked(String),
    #[error("In use: {0}")]
    InUse(String),
    #[error("Integrity error: {0}")]
    Integrity(String),
}

impl ProspectusError {
    /// Stable machine-readable kind used in JSON error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            ProspectusError::RusqliteError(_) => "sqlite",
            ProspectusError::IoError(_) => "io",
            ProspectusError::JsonError(_) => "json",
            ProspectusError::ConfigError(_) => "config",
            ProspectusError::DatabaseInitializationError(_) => "db_init",
            ProspectusError::PathError(_) => "path",
            ProspectusError::ValidationError(_) => "validation",
            ProspectusError::NotFound(_) => "not_found",
            ProspectusError::AlreadyLocked(_) => "already_locked",
            ProspectusError::NotLocked(_) => "not_locked",
            ProspectusError::InUse(_) => "in_use",
            ProspectusError::Integrity(_) => "integrity",
        }
    }
}
