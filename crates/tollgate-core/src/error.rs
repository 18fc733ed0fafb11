//! Error types for Tollgate

/// Result type alias using Tollgate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Tollgate operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pattern compilation or catalog errors
    #[error("pattern error: {0}")]
    Pattern(String),

    /// Durable storage errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Audit pipeline errors
    #[error("audit error: {0}")]
    Audit(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout errors
    #[error("operation timed out")]
    Timeout,

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new pattern error
    pub fn pattern(msg: impl Into<String>) -> Self {
        Self::Pattern(msg.into())
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new audit error
    pub fn audit(msg: impl Into<String>) -> Self {
        Self::Audit(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
