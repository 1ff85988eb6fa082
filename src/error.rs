use thiserror::Error;

/// Error taxonomy of the deployment bucket protocol.
///
/// Conflicts are deliberately absent: a stale bucket is a normal result
/// reported through `ConflictCheckResult`, never an error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Bucket, item, project, or deployment record is absent
    #[error("{0} not found")]
    NotFound(String),

    /// Operation attempted against a bucket in the wrong status
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Deploy attempted against a bucket already resolved by another actor.
    /// Benign: clients refresh their view instead of surfacing a failure.
    #[error("bucket was already resolved by another deployment")]
    RaceLost,

    /// Staged payload rejected at the boundary
    #[error("invalid component payload: {0}")]
    Validation(String),

    /// Persistence layer failure
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ProtocolError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ProtocolError::NotFound(what.into())
    }

    pub fn invalid_state(why: impl Into<String>) -> Self {
        ProtocolError::InvalidState(why.into())
    }

    pub fn validation(why: impl Into<String>) -> Self {
        ProtocolError::Validation(why.into())
    }
}
