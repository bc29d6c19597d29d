//! Error types for the buffering primitives.

use thiserror::Error;

/// Errors raised by [`crate::channel::PacketChannel`] sends.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was closed; no further sends are accepted.
    #[error("channel closed")]
    Closed,

    /// The channel is at capacity; the payload was dropped.
    #[error("channel buffer full")]
    Full,
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
