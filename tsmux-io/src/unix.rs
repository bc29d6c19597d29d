//! Unix-domain stream endpoint.
//!
//! Same shape as the TCP endpoint over filesystem socket paths. A server
//! removes its socket file on close.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixListener;

use crate::conn::{fan_out_loop, ShutdownListener, StreamShared};
use crate::error::{EndpointError, Result};
use crate::handler::{EndpointHandler, EndpointStatus, Mode, Role};

/// A Unix-domain socket endpoint in server or client mode.
pub struct UnixEndpoint {
    path: PathBuf,
    mode: Mode,
    shared: Arc<StreamShared>,
    is_open: AtomicBool,
}

impl UnixEndpoint {
    /// Create an endpoint for the socket at `path`.
    pub fn new(
        path: impl Into<PathBuf>,
        mode: Mode,
        role: Role,
        channel: Arc<tsmux_core::PacketChannel>,
    ) -> Self {
        Self {
            path: path.into(),
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
    listener: UnixListener,
    shared: Arc<StreamShared>,
    mut shutdown: ShutdownListener,
) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let peer = addr
                        .as_pathname()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "unnamed".to_string());
                    shared.spawn_conn(stream, peer);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "unix accept failed");
                    continue;
                }
            }
        }
    }
}

#[async_trait]
impl EndpointHandler for UnixEndpoint {
    async fn open(&self) -> Result<()> {
        if self.is_open.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match self.mode {
            Mode::Server => {
                let listener = UnixListener::bind(&self.path).map_err(|source| {
                    EndpointError::Bind {
                        address: self.path.display().to_string(),
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
                let stream = tokio::net::UnixStream::connect(&self.path)
                    .await
                    .map_err(|err| {
                        EndpointError::ConnectionLost(format!(
                            "{}: {}",
                            self.path.display(),
                            err
                        ))
                    })?;
                self.shared
                    .spawn_conn(stream, self.path.display().to_string());
            }
            Mode::Peer => {
                tracing::debug!(path = %self.path.display(), "peer mode is meaningless for unix sockets, nothing to open");
            }
        }

        if self.shared.role == Role::Writer {
            tokio::spawn(fan_out_loop(
                Arc::clone(&self.shared.channel),
                Arc::clone(&self.shared.connections),
                self.shared.shutdown.subscribe(),
            ));
        }

        tracing::info!(path = %self.path.display(), mode = %self.mode, role = %self.shared.role, "unix endpoint open");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.shutdown.signal();
        self.shared.channel.close();
        self.shared.clear();
        if self.mode == Mode::Server {
            if let Err(err) = std::fs::remove_file(&self.path) {
                tracing::debug!(path = %self.path.display(), error = %err, "socket file not removed");
            }
        }
        tracing::info!(path = %self.path.display(), "unix endpoint closed");
        Ok(())
    }

    fn status(&self) -> EndpointStatus {
        EndpointStatus {
            address: self.path.display().to_string(),
            mode: self.mode,
            role: self.shared.role,
            connections: self.shared.peers(),
            read_deadline: self.shared.read_deadline,
            write_deadline: self.shared.write_deadline,
            is_open: self.is_open.load(Ordering::SeqCst),
        }
    }
}
