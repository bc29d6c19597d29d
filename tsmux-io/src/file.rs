//! File and named-pipe endpoint.
//!
//! A missing regular file is created at open; a missing FIFO is created
//! with `mkfifo` mode 0666 and unlinked on close. Reader and writer both
//! operate on 4 KiB buffers. A reader at end-of-file keeps polling, which
//! gives tail semantics on regular files and reconnect semantics on FIFOs.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tsmux_core::{ChannelError, PacketChannel};

use crate::conn::{maybe_timeout, Shutdown, ShutdownListener};
use crate::error::{EndpointError, Result};
use crate::handler::{EndpointHandler, EndpointStatus, Mode, Role};

/// I/O buffer size for file endpoints.
const FILE_BUFFER: usize = 4096;

/// Idle backoff after reading end-of-file.
const EOF_BACKOFF: Duration = Duration::from_millis(10);

/// A regular-file or FIFO endpoint.
pub struct FileEndpoint {
    path: PathBuf,
    role: Role,
    is_fifo: bool,
    read_deadline: Duration,
    write_deadline: Duration,
    channel: Arc<PacketChannel>,
    shutdown: Shutdown,
    is_open: AtomicBool,
}

impl FileEndpoint {
    /// Create an endpoint for the file at `path`.
    pub fn new(
        path: impl Into<PathBuf>,
        role: Role,
        is_fifo: bool,
        channel: Arc<PacketChannel>,
    ) -> Self {
        Self {
            path: path.into(),
            role,
            is_fifo,
            read_deadline: Duration::ZERO,
            write_deadline: Duration::ZERO,
            channel,
            shutdown: Shutdown::new(),
            is_open: AtomicBool::new(false),
        }
    }

    /// Set per-iteration read and write deadlines; zero disables them.
    pub fn with_deadlines(mut self, read: Duration, write: Duration) -> Self {
        self.read_deadline = read;
        self.write_deadline = write;
        self
    }

    /// The data channel backing this endpoint.
    pub fn channel(&self) -> &Arc<PacketChannel> {
        &self.channel
    }

    /// Whether this endpoint manages a named pipe.
    pub fn is_fifo(&self) -> bool {
        self.is_fifo
    }
}

/// Create a named pipe with mode 0666.
fn mkfifo(path: &Path) -> std::io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains a NUL byte")
    })?;
    // SAFETY: cpath is a valid NUL-terminated path for the duration of the call.
    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o666) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[async_trait]
impl EndpointHandler for FileEndpoint {
    async fn open(&self) -> Result<()> {
        if self.is_open.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if !self.path.exists() {
            if self.is_fifo {
                mkfifo(&self.path).map_err(|source| EndpointError::Bind {
                    address: self.path.display().to_string(),
                    source,
                })?;
            } else {
                tokio::fs::File::create(&self.path)
                    .await
                    .map_err(|source| EndpointError::Bind {
                        address: self.path.display().to_string(),
                        source,
                    })?;
            }
        }

        let path = self.path.clone();
        let channel = Arc::clone(&self.channel);
        let listener = self.shutdown.subscribe();
        match self.role {
            Role::Reader => {
                tokio::spawn(read_loop(path, channel, self.read_deadline, listener));
            }
            Role::Writer => {
                tokio::spawn(write_loop(path, channel, self.write_deadline, listener));
            }
        }

        tracing::info!(path = %self.path.display(), role = %self.role, fifo = self.is_fifo, "file endpoint open");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.signal();
        self.channel.close();
        if self.is_fifo {
            if let Err(err) = std::fs::remove_file(&self.path) {
                tracing::debug!(path = %self.path.display(), error = %err, "FIFO not removed");
            }
        }
        tracing::info!(path = %self.path.display(), "file endpoint closed");
        Ok(())
    }

    fn status(&self) -> EndpointStatus {
        EndpointStatus {
            address: self.path.display().to_string(),
            mode: Mode::Peer,
            role: self.role,
            connections: Vec::new(),
            read_deadline: self.read_deadline,
            write_deadline: self.write_deadline,
            is_open: self.is_open.load(Ordering::SeqCst),
        }
    }
}

async fn read_loop(
    path: PathBuf,
    channel: Arc<PacketChannel>,
    read_deadline: Duration,
    mut shutdown: ShutdownListener,
) {
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "file open for read failed");
            channel.close();
            return;
        }
    };

    let mut buf = [0u8; FILE_BUFFER];
    loop {
        let n = tokio::select! {
            _ = shutdown.wait() => break,
            result = maybe_timeout(read_deadline, file.read(&mut buf)) => match result {
                Ok(Ok(0)) => {
                    // End of data for now: poll for more.
                    tokio::time::sleep(EOF_BACKOFF).await;
                    continue;
                }
                Ok(Ok(n)) => n,
                Ok(Err(err)) => {
                    tracing::warn!(path = %path.display(), error = %err, "file read failed");
                    break;
                }
                Err(_) => {
                    tracing::warn!(path = %path.display(), "file read deadline expired");
                    break;
                }
            }
        };

        match channel.send(&buf[..n]) {
            Ok(()) => {}
            Err(ChannelError::Full) => {
                tracing::warn!(bytes = n, "data channel full, file window dropped");
            }
            Err(ChannelError::Closed) => break,
        }
    }
    channel.close();
}

async fn write_loop(
    path: PathBuf,
    channel: Arc<PacketChannel>,
    write_deadline: Duration,
    mut shutdown: ShutdownListener,
) {
    let mut file = match OpenOptions::new()
        .write(true)
        .create(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "file open for write failed");
            channel.close();
            return;
        }
    };

    loop {
        let data = tokio::select! {
            _ = shutdown.wait() => break,
            data = channel.recv() => match data {
                Some(data) => data,
                None => break,
            },
        };

        match maybe_timeout(write_deadline, file.write_all(&data)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(path = %path.display(), error = %err, "file write failed");
                break;
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), "file write deadline expired, payload dropped");
                break;
            }
        }
    }
}
