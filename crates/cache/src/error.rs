use tilegraph_core::error::CoreError;

/// Errors raised by the cache layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A cache was configured with values it cannot honour.
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// A collaborator (SQL capability, configuration provider) failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}
