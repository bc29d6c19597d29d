//! Pipeline error types.

use thiserror::Error;

/// Errors raised while loading configuration or assembling the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid configuration contents.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read or parsed.
    #[error("configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// An endpoint failed to open or close.
    #[error(transparent)]
    Endpoint(#[from] tsmux_io::EndpointError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
