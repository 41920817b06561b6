//! Error types for the authorization engine

use thiserror::Error;

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed override or unknown (resource, action) pair
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Actor lacks the level required for the requested assignment
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Unknown user, role, or override id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Synthesized claim payload exceeds the configured provider ceiling
    #[error("Claim payload too large: {size} bytes exceeds ceiling of {ceiling} bytes")]
    PayloadTooLarge { size: usize, ceiling: usize },

    /// Push to the identity provider failed after retry exhaustion
    #[error("Sync failed for subject {subject_id} after {attempts} attempts: {message}")]
    SyncFailed {
        subject_id: String,
        attempts: u32,
        message: String,
    },

    /// Per-role request quota exceeded
    #[error("Rate limit exceeded: {usage}/{limit} per {window}")]
    RateLimitExceeded {
        window: crate::ratelimit::Window,
        usage: u64,
        limit: u64,
        retry_after_seconds: u64,
    },

    /// Identity provider rejected or dropped a push (transient)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Audit sink write failure (never surfaced to primary callers)
    #[error("Audit write failed: {0}")]
    AuditWriteFailed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, EngineError>;
