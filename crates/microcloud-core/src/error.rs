//! Error types shared across the microcloud crates.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for microcloud services
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Bus connectivity or publish/subscribe failure
    #[error("bus error: {0}")]
    Bus(String),

    /// Payload could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// Repository failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied an invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Entity exists but is not in a state that permits the operation
    #[error("precondition failed: {0}")]
    FailedPrecondition(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a bus error
    pub fn bus(msg: impl Into<String>) -> Self {
        Self::Bus(msg.into())
    }

    /// Create a codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a failed-precondition error
    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    /// True if this error represents a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
