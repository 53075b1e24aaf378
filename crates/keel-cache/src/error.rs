/// Errors from cache store operations.
///
/// Capacity pressure and TTL expiry are not errors: the first is resolved by
/// eviction, the second surfaces as a miss.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CacheError {
    /// The namespace parameters are unusable (zero capacity or zero TTL).
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// A namespace with this name already exists.
    #[error("namespace already exists: {0}")]
    NamespaceExists(String),

    /// No namespace with this name exists.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// The namespace exists but stores different key/value types.
    #[error("namespace {0} was created with different key/value types")]
    TypeMismatch(String),
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
