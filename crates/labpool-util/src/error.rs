//! Error types for labpoold

use thiserror::Error;

use crate::ResourceId;

/// Errors returned by allocation engine operations.
///
/// Every expected business-rule violation is a typed variant; only
/// persistence failures surface as `Storage`.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Unknown or inactive resource
    #[error("Resource not found: {0}")]
    NotFound(ResourceId),

    /// Resource unavailable, usage already exists, or duplicate queue entry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller does not own the target usage or queue entry
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Action attempted on an already-expired session
    #[error("Session has already expired")]
    Expired,

    /// No active queue entry for the caller
    #[error("Not in the queue")]
    NotQueued,

    /// No open usage session on the resource
    #[error("No active usage session")]
    NoActiveUsage,

    /// Persistence failure; the transition was aborted with no partial writes
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PoolError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

pub type PoolResult<T> = std::result::Result<T, PoolError>;
