//! HTTP streaming endpoint.
//!
//! Writer-only server: every accepted request streams the endpoint's data
//! channel as a chunked `video/MP2T` response. A pump task copies the data
//! channel into a broadcast feed so each client owns an independent
//! subscription; a disconnecting client ends only its own response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tsmux_core::PacketChannel;

use crate::conn::{Shutdown, ShutdownListener};
use crate::error::{EndpointError, Result};
use crate::handler::{EndpointHandler, EndpointStatus, Mode, Role};

/// Broadcast depth per client before a slow client starts losing packets.
const FEED_DEPTH: usize = 256;

/// A writer-only HTTP endpoint serving the stream to any number of clients.
pub struct HttpEndpoint {
    address: String,
    channel: Arc<PacketChannel>,
    feed: broadcast::Sender<Bytes>,
    shutdown: Shutdown,
    is_open: AtomicBool,
}

impl HttpEndpoint {
    /// Create an endpoint listening on `address` once opened.
    pub fn new(address: impl Into<String>, channel: Arc<PacketChannel>) -> Self {
        let (feed, _) = broadcast::channel(FEED_DEPTH);
        Self {
            address: address.into(),
            channel,
            feed,
            shutdown: Shutdown::new(),
            is_open: AtomicBool::new(false),
        }
    }

    /// The data channel backing this endpoint.
    pub fn channel(&self) -> &Arc<PacketChannel> {
        &self.channel
    }

    /// Number of connected streaming clients.
    pub fn client_count(&self) -> usize {
        self.feed.receiver_count()
    }
}

async fn stream_handler(State(feed): State<broadcast::Sender<Bytes>>) -> impl IntoResponse {
    let subscription = BroadcastStream::new(feed.subscribe())
        .filter_map(|item| item.ok())
        .map(Ok::<Bytes, std::convert::Infallible>);

    (
        [(header::CONTENT_TYPE, "video/MP2T")],
        Body::from_stream(subscription),
    )
}

async fn pump_loop(
    channel: Arc<PacketChannel>,
    feed: broadcast::Sender<Bytes>,
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
        // A send error only means no client is connected right now.
        let _ = feed.send(Bytes::from(data));
    }
}

#[async_trait]
impl EndpointHandler for HttpEndpoint {
    async fn open(&self) -> Result<()> {
        if self.is_open.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let listener = TcpListener::bind(&self.address)
            .await
            .map_err(|source| EndpointError::Bind {
                address: self.address.clone(),
                source,
            })?;

        let app = Router::new()
            .route("/", get(stream_handler))
            .with_state(self.feed.clone());

        let mut serve_shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { serve_shutdown.wait().await });
            if let Err(err) = server.await {
                tracing::warn!(error = %err, "HTTP server terminated");
            }
        });

        tokio::spawn(pump_loop(
            Arc::clone(&self.channel),
            self.feed.clone(),
            self.shutdown.subscribe(),
        ));

        tracing::info!(address = %self.address, "HTTP endpoint open");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.signal();
        self.channel.close();
        tracing::info!(address = %self.address, "HTTP endpoint closed");
        Ok(())
    }

    fn status(&self) -> EndpointStatus {
        EndpointStatus {
            address: self.address.clone(),
            mode: Mode::Server,
            role: Role::Writer,
            connections: (0..self.feed.receiver_count())
                .map(|i| format!("client-{i}"))
                .collect(),
            read_deadline: Duration::ZERO,
            write_deadline: Duration::ZERO,
            is_open: self.is_open.load(Ordering::SeqCst),
        }
    }
}
