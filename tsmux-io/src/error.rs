//! Endpoint error types.

use thiserror::Error;

/// Errors raised by endpoint handlers.
///
/// Bind and resolve failures propagate out of `open` and are typically
/// fatal at startup; the remaining variants are handled locally by the
/// endpoint's background tasks.
#[derive(Error, Debug)]
pub enum EndpointError {
    /// Binding the local resource failed.
    #[error("bind failed on {address}: {source}")]
    Bind {
        /// Address or path that could not be bound.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An address or allow-list entry could not be resolved.
    #[error("address resolution failed for {0}")]
    Resolve(String),

    /// The endpoint is closed.
    #[error("endpoint closed")]
    Closed,

    /// An I/O deadline expired.
    #[error("operation timed out")]
    Timeout,

    /// A peer connection failed.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for endpoint operations.
pub type Result<T> = std::result::Result<T, EndpointError>;
