//! Cache error types

use thiserror::Error;

/// Errors raised by cache stores
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend refused or failed the operation
    #[error("Cache store error: {0}")]
    Store(String),

    /// Entry body could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error from an on-disk store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
