//! Error types for the memory store.

/// Errors that can occur in memory store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// SQLite database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Referenced record does not exist
    #[error("record not found: {0}")]
    NotFound(uuid::Uuid),

    /// Backend temporarily unavailable (lock contention, pool exhausted)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored value could not be decoded
    #[error("invalid stored value: {0}")]
    InvalidValue(String),

    /// General internal error
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
