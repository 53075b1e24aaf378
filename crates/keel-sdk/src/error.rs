use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("cache error: {0}")]
    Cache(#[from] keel_cache::CacheError),

    #[error("monitor error: {0}")]
    Monitor(#[from] keel_monitor::MonitorError),

    #[error("batch store error: {0}")]
    Batch(#[from] keel_batch::BatchError),

    #[error("operation error: {0}")]
    Ops(#[from] keel_ops::OpsError),
}

pub type SdkResult<T> = Result<T, SdkError>;
