use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    TomlError(#[from] toml::de::Error),
    /// A step needed a mapping that an earlier step should have produced.
    #[error("Ordering violation: {0}")]
    OrderingViolation(String),
    #[error("Namespace '{namespace}' has no key '{key}'")]
    UnknownNamespaceKey { namespace: String, key: String },
    #[error("Namespace key '{key}' holds a {actual}, not a {expected}")]
    WrongContainer {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Restore point does not match this run: {0}")]
    RestoreMismatch(String),
    #[error("Your database is not empty! ({0})")]
    NotEmpty(String),
    #[error("Usage error: {0}")]
    Usage(String),
    #[error("Legacy data error: {0}")]
    LegacyData(String),
    #[error("Object {0} not found in legacy graph")]
    MissingObject(String),
    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<MigrateError>,
    },
}

impl MigrateError {
    pub fn step_failed(step: &str, source: MigrateError) -> Self {
        MigrateError::StepFailed {
            step: step.to_string(),
            source: Box::new(source),
        }
    }

    /// Innermost error, unwrapping step context.
    pub fn root(&self) -> &MigrateError {
        match self {
            MigrateError::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
