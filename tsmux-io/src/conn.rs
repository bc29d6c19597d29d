//! Shared plumbing for stream-oriented connections.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tsmux_core::{ChannelError, PacketChannel};
use tsmux_ts::TS_PACKET_SIZE;

use crate::handler::Role;

/// Read window for stream connections: ten packets per syscall.
pub(crate) const READ_WINDOW: usize = TS_PACKET_SIZE * 10;

/// Queue depth between a writer endpoint's fan-out task and each
/// per-connection task.
pub(crate) const CONN_QUEUE: usize = 64;

/// Race-free shutdown signal shared by an endpoint's background tasks.
#[derive(Debug)]
pub(crate) struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::channel(false).0,
        }
    }

    /// Signal every listener; later subscribers observe the signal too.
    pub(crate) fn signal(&self) {
        let _ = self.tx.send(true);
    }

    pub(crate) fn subscribe(&self) -> ShutdownListener {
        ShutdownListener(self.tx.subscribe())
    }
}

/// Per-task handle on the shutdown signal.
pub(crate) struct ShutdownListener(watch::Receiver<bool>);

impl ShutdownListener {
    /// Resolve once shutdown is signaled, including when it was signaled
    /// before this call.
    pub(crate) async fn wait(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Run `fut` under `deadline` when it is non-zero, otherwise without bound.
pub(crate) async fn maybe_timeout<F, T>(
    deadline: Duration,
    fut: F,
) -> std::result::Result<T, tokio::time::error::Elapsed>
where
    F: Future<Output = T>,
{
    if deadline.is_zero() {
        Ok(fut.await)
    } else {
        tokio::time::timeout(deadline, fut).await
    }
}

/// Drain a reader connection into the shared data channel.
///
/// Bytes are forwarded in 188-aligned windows; a partial packet is carried
/// to the next read. The loop ends on EOF, error, deadline expiry, channel
/// close, or shutdown.
pub(crate) async fn run_reader_conn<S>(
    mut stream: S,
    peer: String,
    channel: Arc<PacketChannel>,
    read_deadline: Duration,
    mut shutdown: ShutdownListener,
) where
    S: AsyncRead + Unpin + Send,
{
    let mut buf = vec![0u8; READ_WINDOW];
    let mut pending: Vec<u8> = Vec::with_capacity(READ_WINDOW);

    loop {
        let n = tokio::select! {
            _ = shutdown.wait() => break,
            result = maybe_timeout(read_deadline, stream.read(&mut buf)) => match result {
                Ok(Ok(0)) => {
                    tracing::debug!(peer = %peer, "connection closed by peer");
                    break;
                }
                Ok(Ok(n)) => n,
                Ok(Err(err)) => {
                    tracing::warn!(peer = %peer, error = %err, "read failed");
                    break;
                }
                Err(_) => {
                    tracing::warn!(peer = %peer, "read deadline expired");
                    break;
                }
            }
        };

        pending.extend_from_slice(&buf[..n]);
        let aligned = pending.len() - pending.len() % TS_PACKET_SIZE;
        if aligned == 0 {
            continue;
        }
        let window: Vec<u8> = pending.drain(..aligned).collect();
        match channel.send(&window) {
            Ok(()) => {}
            Err(ChannelError::Full) => {
                tracing::warn!(peer = %peer, bytes = window.len(), "data channel full, window dropped");
            }
            Err(ChannelError::Closed) => break,
        }
    }
}

/// Copy fan-out payloads onto a writer connection.
///
/// The loop ends on write failure, deadline expiry, fan-out queue close, or
/// shutdown; the caller deregisters the connection afterwards.
pub(crate) async fn run_writer_conn<S>(
    mut stream: S,
    peer: String,
    mut rx: mpsc::Receiver<Vec<u8>>,
    write_deadline: Duration,
    mut shutdown: ShutdownListener,
) where
    S: AsyncWrite + Unpin + Send,
{
    loop {
        let data = tokio::select! {
            _ = shutdown.wait() => break,
            data = rx.recv() => match data {
                Some(data) => data,
                None => break,
            },
        };

        match maybe_timeout(write_deadline, stream.write_all(&data)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(peer = %peer, error = %err, "write failed, closing connection");
                break;
            }
            Err(_) => {
                tracing::warn!(peer = %peer, "write deadline expired, payload dropped");
                break;
            }
        }
    }
}

/// One live connection of a stream endpoint.
pub(crate) struct ConnEntry {
    pub(crate) peer: String,
    /// Fan-out queue toward the connection; `None` for reader connections.
    pub(crate) tx: Option<mpsc::Sender<Vec<u8>>>,
}

/// State shared between a stream endpoint and its connection tasks.
pub(crate) struct StreamShared {
    pub(crate) role: Role,
    pub(crate) read_deadline: Duration,
    pub(crate) write_deadline: Duration,
    pub(crate) channel: Arc<PacketChannel>,
    pub(crate) connections: Arc<Mutex<HashMap<u64, ConnEntry>>>,
    pub(crate) next_id: AtomicU64,
    pub(crate) shutdown: Shutdown,
}

impl StreamShared {
    pub(crate) fn new(role: Role, channel: Arc<PacketChannel>) -> Self {
        Self {
            role,
            read_deadline: Duration::ZERO,
            write_deadline: Duration::ZERO,
            channel,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            shutdown: Shutdown::new(),
        }
    }

    /// Register a connection and spawn its per-direction task. The task
    /// deregisters the connection when it ends.
    pub(crate) fn spawn_conn<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connections = Arc::clone(&self.connections);
        let listener = self.shutdown.subscribe();
        tracing::debug!(peer = %peer, role = %self.role, "connection registered");

        match self.role {
            Role::Reader => {
                connections.lock().insert(
                    id,
                    ConnEntry {
                        peer: peer.clone(),
                        tx: None,
                    },
                );
                let channel = Arc::clone(&self.channel);
                let deadline = self.read_deadline;
                tokio::spawn(async move {
                    run_reader_conn(stream, peer, channel, deadline, listener).await;
                    connections.lock().remove(&id);
                });
            }
            Role::Writer => {
                let (tx, rx) = mpsc::channel(CONN_QUEUE);
                connections.lock().insert(
                    id,
                    ConnEntry {
                        peer: peer.clone(),
                        tx: Some(tx),
                    },
                );
                let deadline = self.write_deadline;
                tokio::spawn(async move {
                    run_writer_conn(stream, peer, rx, deadline, listener).await;
                    connections.lock().remove(&id);
                });
            }
        }
    }

    /// Addresses of the live connections.
    pub(crate) fn peers(&self) -> Vec<String> {
        self.connections
            .lock()
            .values()
            .map(|entry| entry.peer.clone())
            .collect()
    }

    /// Drop every registered connection; their tasks exit via shutdown.
    pub(crate) fn clear(&self) {
        self.connections.lock().clear();
    }
}

/// Copy each data-channel payload to every live writer connection.
///
/// A connection whose queue has gone away is deregistered; a connection
/// that cannot keep up loses the payload but stays live.
pub(crate) async fn fan_out_loop(
    channel: Arc<PacketChannel>,
    connections: Arc<Mutex<HashMap<u64, ConnEntry>>>,
    mut shutdown: ShutdownListener,
) {
    loop {
        let data = tokio::select! {
            _ = shutdown.wait() => break,
            data = channel.recv() => match data {
                Some(data) => data,
                None => break,
            },
        };

        let targets: Vec<(u64, mpsc::Sender<Vec<u8>>)> = connections
            .lock()
            .iter()
            .filter_map(|(id, entry)| entry.tx.clone().map(|tx| (*id, tx)))
            .collect();

        for (id, tx) in targets {
            match tx.try_send(data.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(conn = id, "connection queue full, payload dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    connections.lock().remove(&id);
                }
            }
        }
    }
}
