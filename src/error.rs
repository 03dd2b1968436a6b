//! Error types for the Bouncer service.

use thiserror::Error;

/// Main error type for Bouncer operations.
#[derive(Error, Debug)]
pub enum BouncerError {
    /// The counter store could not be reached, timed out, or returned a
    /// protocol fault. Never interpreted as "not limited".
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for BouncerError {
    fn from(err: redis::RedisError) -> Self {
        BouncerError::StorageUnavailable(err.to_string())
    }
}

/// Result type alias for Bouncer operations.
pub type Result<T> = std::result::Result<T, BouncerError>;
