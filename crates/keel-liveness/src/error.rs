/// Errors from liveness registry operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LivenessError {
    /// The handle does not refer to a live shared allocation.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
}

/// Result alias for registry operations.
pub type LivenessResult<T> = Result<T, LivenessError>;
