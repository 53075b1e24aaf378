/// Errors produced by the batch store.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for batch store operations.
pub type BatchResult<T> = Result<T, BatchError>;
