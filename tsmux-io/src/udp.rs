//! Datagram endpoint.
//!
//! UDP is inherently peer-to-peer: a reader binds its address, filters
//! datagrams through an allow-list of source IPs, and feeds whole packets
//! into its data channel; a writer fans every payload out to each
//! configured destination. Null stuffing packets are dropped on ingest,
//! they are hop-local and regenerated by the pacer downstream.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tsmux_core::{ChannelError, PacketChannel};
use tsmux_ts::{EncodedPacket, TS_PACKET_SIZE};

use crate::conn::{maybe_timeout, Shutdown, ShutdownListener};
use crate::error::{EndpointError, Result};
use crate::handler::{EndpointHandler, EndpointStatus, Mode, Role};

/// Receive window for one datagram.
const DATAGRAM_WINDOW: usize = 2048;

/// A UDP endpoint in either role.
pub struct UdpEndpoint {
    address: String,
    role: Role,
    read_deadline: Duration,
    write_deadline: Duration,
    sources: Vec<String>,
    destinations: Vec<String>,
    channel: Arc<PacketChannel>,
    shutdown: Shutdown,
    is_open: AtomicBool,
}

impl UdpEndpoint {
    /// Create an endpoint bound to `address` once opened.
    pub fn new(address: impl Into<String>, role: Role, channel: Arc<PacketChannel>) -> Self {
        Self {
            address: address.into(),
            role,
            read_deadline: Duration::ZERO,
            write_deadline: Duration::ZERO,
            sources: Vec::new(),
            destinations: Vec::new(),
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

    /// Restrict a reader to datagrams from these source IPs. Only listed
    /// sources are admitted; a reader with an empty allow-list drops every
    /// datagram.
    pub fn with_allowed_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Add fan-out destinations for a writer.
    pub fn with_destinations(mut self, destinations: Vec<String>) -> Self {
        self.destinations = destinations;
        self
    }

    /// The data channel backing this endpoint.
    pub fn channel(&self) -> &Arc<PacketChannel> {
        &self.channel
    }
}

#[async_trait]
impl EndpointHandler for UdpEndpoint {
    async fn open(&self) -> Result<()> {
        if self.is_open.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let socket = UdpSocket::bind(&self.address)
            .await
            .map_err(|source| EndpointError::Bind {
                address: self.address.clone(),
                source,
            })?;

        match self.role {
            Role::Reader => {
                if self.sources.is_empty() {
                    tracing::warn!(
                        address = %self.address,
                        "no allowed sources configured, reader drops every datagram"
                    );
                }
                let mut allowed = HashSet::new();
                for entry in &self.sources {
                    let ip: IpAddr = entry
                        .parse()
                        .map_err(|_| EndpointError::Resolve(entry.clone()))?;
                    allowed.insert(ip);
                }
                tokio::spawn(receive_loop(
                    socket,
                    allowed,
                    Arc::clone(&self.channel),
                    self.read_deadline,
                    self.shutdown.subscribe(),
                ));
            }
            Role::Writer => {
                let mut destinations = Vec::with_capacity(self.destinations.len());
                for entry in &self.destinations {
                    let addr = tokio::net::lookup_host(entry)
                        .await
                        .map_err(|_| EndpointError::Resolve(entry.clone()))?
                        .next()
                        .ok_or_else(|| EndpointError::Resolve(entry.clone()))?;
                    destinations.push(addr);
                }
                tokio::spawn(send_loop(
                    socket,
                    destinations,
                    Arc::clone(&self.channel),
                    self.write_deadline,
                    self.shutdown.subscribe(),
                ));
            }
        }

        tracing::info!(address = %self.address, role = %self.role, "UDP endpoint open");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.signal();
        self.channel.close();
        tracing::info!(address = %self.address, role = %self.role, "UDP endpoint closed");
        Ok(())
    }

    fn status(&self) -> EndpointStatus {
        EndpointStatus {
            address: self.address.clone(),
            mode: Mode::Peer,
            role: self.role,
            connections: self.destinations.clone(),
            read_deadline: self.read_deadline,
            write_deadline: self.write_deadline,
            is_open: self.is_open.load(Ordering::SeqCst),
        }
    }
}

async fn receive_loop(
    socket: UdpSocket,
    allowed: HashSet<IpAddr>,
    channel: Arc<PacketChannel>,
    read_deadline: Duration,
    mut shutdown: ShutdownListener,
) {
    let mut buf = [0u8; DATAGRAM_WINDOW];
    let mut window = Vec::with_capacity(DATAGRAM_WINDOW);

    loop {
        let (n, addr) = tokio::select! {
            _ = shutdown.wait() => break,
            result = maybe_timeout(read_deadline, socket.recv_from(&mut buf)) => match result {
                Ok(Ok(received)) => received,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "UDP receive failed");
                    continue;
                }
                Err(_) => {
                    tracing::warn!("UDP read deadline expired");
                    break;
                }
            }
        };

        if !allowed.contains(&addr.ip()) {
            tracing::debug!(source = %addr, "datagram from disallowed source dropped");
            continue;
        }
        if n % TS_PACKET_SIZE != 0 {
            tracing::warn!(bytes = n, source = %addr, "misaligned datagram dropped");
            continue;
        }

        window.clear();
        for frame in buf[..n].chunks_exact(TS_PACKET_SIZE) {
            match EncodedPacket::from_slice(frame) {
                Ok(packet) if packet.is_null() => continue,
                Ok(_) => window.extend_from_slice(frame),
                Err(err) => {
                    tracing::debug!(source = %addr, error = %err, "invalid frame dropped");
                }
            }
        }
        if window.is_empty() {
            continue;
        }

        match channel.send(&window) {
            Ok(()) => {}
            Err(ChannelError::Full) => {
                tracing::warn!(bytes = window.len(), "data channel full, datagram dropped");
            }
            Err(ChannelError::Closed) => break,
        }
    }
    // Consumers see end-of-stream once the loop ends for any reason.
    channel.close();
}

async fn send_loop(
    socket: UdpSocket,
    destinations: Vec<std::net::SocketAddr>,
    channel: Arc<PacketChannel>,
    write_deadline: Duration,
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

        for dest in &destinations {
            match maybe_timeout(write_deadline, socket.send_to(&data, dest)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    tracing::warn!(dest = %dest, error = %err, "UDP send failed");
                }
                Err(_) => {
                    tracing::warn!(dest = %dest, "UDP write deadline expired, payload dropped");
                    break;
                }
            }
        }
    }
}
