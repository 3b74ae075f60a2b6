//! Engine error types

use thiserror::Error;

/// File registration failures, raised before the engine is touched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("File name must not be empty")]
    EmptyName,

    /// Path separators, `..`, or control characters in the name
    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("File already registered: {0}")]
    Duplicate(String),
}

/// Errors from the engine connection manager
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine could not be started
    #[error("Engine initialization failed: {0}")]
    Init(String),

    /// SQL error, carrying the engine's message verbatim
    #[error("{0}")]
    Query(String),

    #[error("Engine has been disposed")]
    Disposed,

    /// Worker thread stopped without answering
    #[error("Engine worker is not running")]
    WorkerGone,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<duckdb::Error> for EngineError {
    fn from(e: duckdb::Error) -> Self {
        EngineError::Query(e.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
