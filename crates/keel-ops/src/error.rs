use keel_types::OperationId;

use crate::operation::OperationStatus;

/// Errors produced by the operation tracker.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum OpsError {
    #[error("operation not found: {0}")]
    NotFound(OperationId),

    /// The operation was cancelled and has observed it.
    #[error("operation cancelled: {0}")]
    Cancelled(OperationId),

    /// A pipeline step failed; the operation is now Failed.
    #[error("operation {id} failed at step {step}: {message}")]
    Failed {
        id: OperationId,
        step: String,
        message: String,
    },

    /// The operation already reached a terminal state.
    #[error("operation {id} already finished ({status})")]
    Finished {
        id: OperationId,
        status: OperationStatus,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for tracker operations.
pub type OpsResult<T> = Result<T, OpsError>;
