use crate::entry::TempId;

/// Errors produced by the optimistic ledger.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OptimisticError {
    /// No entry exists for this temporary id (never issued, already
    /// confirmed, or cleared).
    #[error("unknown temporary id: {0}")]
    UnknownTempId(TempId),
}

/// Result alias for ledger operations.
pub type OptimisticResult<T> = Result<T, OptimisticError>;
