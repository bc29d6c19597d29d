//! MPEG-TS codec error types.

use thiserror::Error;

/// Errors raised by the packet codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TsError {
    /// Invalid sync byte (expected 0x47).
    #[error("invalid sync byte: expected 0x47, got 0x{0:02X}")]
    InvalidSyncByte(u8),

    /// Input is not exactly 188 bytes.
    #[error("invalid packet size: expected 188 bytes, got {0}")]
    InvalidPacketSize(usize),

    /// PID outside the 13-bit range.
    #[error("invalid PID: 0x{0:04X}")]
    InvalidPid(u16),

    /// Malformed adaptation field.
    #[error("invalid adaptation field: {0}")]
    InvalidAdaptation(String),

    /// Malformed PES header.
    #[error("invalid PES packet: {0}")]
    InvalidPes(String),

    /// First byte matches no known packet kind.
    #[error("unknown packet type: 0x{0:02X}")]
    UnknownPacketType(u8),

    /// Generator asked for a non-positive packet count.
    #[error("invalid packet count: {0}")]
    InvalidCount(usize),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, TsError>;
