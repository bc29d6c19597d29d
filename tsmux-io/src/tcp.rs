//! TCP stream endpoint.
//!
//! In server mode an accept loop spawns one task per inbound connection;
//! in client mode a single connection is dialed at open. Reader
//! connections drain 188-aligned windows into the data channel; a writer
//! endpoint fans each channel payload out to every live connection,
//! closing a connection on write failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;

use crate::conn::{fan_out_loop, ShutdownListener, StreamShared};
use crate::error::{EndpointError, Result};
use crate::handler::{EndpointHandler, EndpointStatus, Mode, Role};

/// A TCP endpoint in server or client mode.
pub struct TcpEndpoint {
    address: String,
    mode: Mode,
    shared: Arc<StreamShared>,
    is_open: AtomicBool,
}

impl TcpEndpoint {
    /// Create an endpoint for `address` in the given mode and role.
    pub fn new(
        address: impl Into<String>,
        mode: Mode,
        role: Role,
        channel: Arc<tsmux_core::PacketChannel>,
    ) -> Self {
        Self {
            address: address.into(),
            mode,
            shared: Arc::new(StreamShared::new(role, channel)),
            is_open: AtomicBool::new(false),
        }
    }

    /// Set per-iteration read and write deadlines; zero disables them.
    /// Only effective before the endpoint is shared or opened.
    pub fn with_deadlines(mut self, read: Duration, write: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.read_deadline = read;
            shared.write_deadline = write;
        }
        self
    }

    /// The data channel backing this endpoint.
    pub fn channel(&self) -> &Arc<tsmux_core::PacketChannel> {
        &self.shared.channel
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<StreamShared>,
    mut shutdown: ShutdownListener,
) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => shared.spawn_conn(stream, peer.to_string()),
                Err(err) => {
                    tracing::warn!(error = %err, "TCP accept failed");
                    continue;
                }
            }
        }
    }
}

#[async_trait]
impl EndpointHandler for TcpEndpoint {
    async fn open(&self) -> Result<()> {
        if self.is_open.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match self.mode {
            Mode::Server => {
                let listener = TcpListener::bind(&self.address).await.map_err(|source| {
                    EndpointError::Bind {
                        address: self.address.clone(),
                        source,
                    }
                })?;
                tokio::spawn(accept_loop(
                    listener,
                    Arc::clone(&self.shared),
                    self.shared.shutdown.subscribe(),
                ));
            }
            Mode::Client => {
                let stream = tokio::net::TcpStream::connect(&self.address)
                    .await
                    .map_err(|err| {
                        EndpointError::ConnectionLost(format!("{}: {}", self.address, err))
                    })?;
                self.shared.spawn_conn(stream, self.address.clone());
            }
            Mode::Peer => {
                tracing::debug!(address = %self.address, "peer mode is meaningless for TCP, nothing to open");
            }
        }

        if self.shared.role == Role::Writer {
            tokio::spawn(fan_out_loop(
                Arc::clone(&self.shared.channel),
                Arc::clone(&self.shared.connections),
                self.shared.shutdown.subscribe(),
            ));
        }

        tracing::info!(address = %self.address, mode = %self.mode, role = %self.shared.role, "TCP endpoint open");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.shutdown.signal();
        self.shared.channel.close();
        self.shared.clear();
        tracing::info!(address = %self.address, "TCP endpoint closed");
        Ok(())
    }

    fn status(&self) -> EndpointStatus {
        EndpointStatus {
            address: self.address.clone(),
            mode: self.mode,
            role: self.shared.role,
            connections: self.shared.peers(),
            read_deadline: self.shared.read_deadline,
            write_deadline: self.shared.write_deadline,
            is_open: self.is_open.load(Ordering::SeqCst),
        }
    }
}
