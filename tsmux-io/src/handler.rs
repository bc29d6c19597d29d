//! The uniform endpoint capability implemented by every transport.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Data direction of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Produces 188-byte packets into its data channel.
    Reader,
    /// Consumes packets from its data channel toward the transport.
    Writer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Reader => write!(f, "reader"),
            Role::Writer => write!(f, "writer"),
        }
    }
}

/// Connection topology of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Connectionless peer (datagram and file endpoints).
    Peer,
    /// Accepts inbound connections.
    Server,
    /// Dials a single outbound connection.
    Client,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Peer => write!(f, "peer"),
            Mode::Server => write!(f, "server"),
            Mode::Client => write!(f, "client"),
        }
    }
}

/// A point-in-time snapshot of an endpoint's configuration and state.
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    /// Bound address, destination, or path.
    pub address: String,
    /// Connection topology.
    pub mode: Mode,
    /// Data direction.
    pub role: Role,
    /// Live peer connections (empty for connectionless transports).
    pub connections: Vec<String>,
    /// Per-iteration read deadline; zero disables it.
    pub read_deadline: Duration,
    /// Per-iteration write deadline; zero disables it.
    pub write_deadline: Duration,
    /// Whether the endpoint currently holds its resource.
    pub is_open: bool,
}

/// Uniform open/close/status capability over every transport.
///
/// `open` acquires the resource and starts the background task(s) for the
/// endpoint's direction, returning only once the resource is bindable.
/// `close` is idempotent, releases the resource, and unblocks the
/// background tasks within one loop iteration.
#[async_trait]
pub trait EndpointHandler: Send + Sync {
    /// Acquire the resource and start background processing.
    async fn open(&self) -> Result<()>;

    /// Release the resource and stop background processing.
    async fn close(&self) -> Result<()>;

    /// Snapshot the endpoint state.
    fn status(&self) -> EndpointStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Role::Reader.to_string(), "reader");
        assert_eq!(Role::Writer.to_string(), "writer");
        assert_eq!(Mode::Peer.to_string(), "peer");
        assert_eq!(Mode::Server.to_string(), "server");
        assert_eq!(Mode::Client.to_string(), "client");
    }
}
