//! Error types for policy storage and the repository

use tollgate_classifiers::PatternError;

/// Result type for repository operations
pub type PolicyResult<T> = std::result::Result<T, PolicyError>;

/// Failure in the SQLite store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

impl From<StoreError> for tollgate_core::Error {
    fn from(e: StoreError) -> Self {
        tollgate_core::Error::storage(e.to_string())
    }
}

/// Why a repository operation was refused or failed
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("system-tier policies cannot be created through the API")]
    SystemTierCreation,

    #[error("system-tier policies cannot be modified")]
    SystemPolicyModification,

    #[error("system-tier policies cannot be deleted")]
    SystemPolicyDeletion,

    #[error("organization-tier policies require an Enterprise license")]
    OrgTierRequiresEnterprise,

    #[error("organization-tier policies require an organization id")]
    MissingOrganizationId,

    #[error("tenant id is required")]
    MissingTenantId,

    #[error("tenant policy limit of {limit} reached; upgrade to Enterprise for unlimited policies")]
    TenantPolicyLimitReached { limit: usize },

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("invalid tier: {0}")]
    InvalidTier(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("policy name cannot be empty")]
    EmptyName,

    #[error("policy not found: {0}")]
    NotFound(String),

    #[error("policy overrides require an Enterprise license")]
    OverrideRequiresEnterprise,

    #[error("override not found: {0}")]
    OverrideNotFound(String),

    #[error("an override must state a reason")]
    MissingOverrideReason,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<rusqlite::Error> for PolicyError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(StoreError::Database(e))
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(StoreError::Serialization(e))
    }
}

impl From<tokio::task::JoinError> for PolicyError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Storage(e.into())
    }
}

impl PolicyError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Whether the caller can fix this by changing the request
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}
