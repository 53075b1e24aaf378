/// Errors produced by the resource monitor.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MonitorError {
    /// Thresholds are not strictly ascending within (0, 100].
    #[error("invalid pressure thresholds: {0}")]
    InvalidThresholds(String),

    /// A configuration value is out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// The usage source could not produce a reading.
    #[error("usage sample failed: {0}")]
    SampleFailed(String),

    /// The usage source produced a value that is not a percentage.
    #[error("invalid usage reading: {0}")]
    InvalidSample(f64),
}

/// Result alias for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
