//! Stream pipeline composition.
//!
//! Readers feed per-input DWRR queues; the scheduler runs one cycle per PLL
//! trigger and appends its batches to the FIFO in queue order; an emit task
//! drains the FIFO toward every writer endpoint. A trigger that finds the
//! FIFO empty stuffs a null packet instead, keeping the output at constant
//! bitrate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use tsmux_core::{ChannelError, FifoBuffer, PacketChannel};
use tsmux_io::{
    EndpointHandler, EndpointStatus, FileEndpoint, HttpEndpoint, Mode, Role, TcpEndpoint,
    UdpEndpoint, UnixEndpoint,
};
use tsmux_sched::{Dwrr, PidSnapshot, Pll};
use tsmux_ts::{EncodedPacket, TS_PACKET_SIZE};

use crate::config::{Config, InputStreamConfig, OutputStreamConfig, StreamMode, TransportKind};
use crate::error::{PipelineError, Result};

/// Depth of every endpoint data channel in packets.
const CHANNEL_DEPTH: usize = 1024;

/// Packet-plane counters, updated lock-free by the pipeline tasks.
#[derive(Debug, Default)]
pub struct PipelineStats {
    packets_in: AtomicU64,
    packets_out: AtomicU64,
    invalid_dropped: AtomicU64,
    nulls_stuffed: AtomicU64,
    output_dropped: AtomicU64,
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSnapshot {
    /// Valid packets accepted from all readers.
    pub packets_in: u64,
    /// Packets handed to the writer endpoints.
    pub packets_out: u64,
    /// Frames dropped by ingest validation.
    pub invalid_dropped: u64,
    /// Null packets generated to hold the output cadence.
    pub nulls_stuffed: u64,
    /// Packets lost to full writer channels.
    pub output_dropped: u64,
}

impl PipelineStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
            invalid_dropped: self.invalid_dropped.load(Ordering::Relaxed),
            nulls_stuffed: self.nulls_stuffed.load(Ordering::Relaxed),
            output_dropped: self.output_dropped.load(Ordering::Relaxed),
        }
    }
}

/// The assembled multiplexing pipeline.
pub struct StreamPipeline {
    config: Config,
    readers: Vec<Arc<dyn EndpointHandler>>,
    reader_channels: Vec<Arc<PacketChannel>>,
    writers: Vec<Arc<dyn EndpointHandler>>,
    writer_channels: Vec<Arc<PacketChannel>>,
    scheduler: Arc<Dwrr<EncodedPacket>>,
    fifo: Arc<FifoBuffer<EncodedPacket>>,
    pll: Pll,
    stats: Arc<PipelineStats>,
    shutdown_tx: watch::Sender<bool>,
    emit_shutdown_tx: watch::Sender<bool>,
    emit_notify: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    emit_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

fn stream_mode(mode: Option<StreamMode>) -> Mode {
    match mode.unwrap_or_default() {
        StreamMode::Server => Mode::Server,
        StreamMode::Client => Mode::Client,
    }
}

fn endpoint_path(path: &Option<String>, what: &str) -> Result<String> {
    path.clone()
        .ok_or_else(|| PipelineError::Config(format!("{what}: transport requires a path")))
}

/// Build the reader endpoint an input entry configures.
fn build_reader(
    input: &InputStreamConfig,
    channel: Arc<PacketChannel>,
) -> Result<Arc<dyn EndpointHandler>> {
    let endpoint: Arc<dyn EndpointHandler> = match input.transport {
        TransportKind::Udp => Arc::new(
            UdpEndpoint::new(input.bind_address(), Role::Reader, channel)
                .with_allowed_sources(input.allowed_sources.clone()),
        ),
        TransportKind::Tcp => Arc::new(TcpEndpoint::new(
            input.bind_address(),
            stream_mode(input.mode),
            Role::Reader,
            channel,
        )),
        TransportKind::Unix => Arc::new(UnixEndpoint::new(
            endpoint_path(&input.path, &input.id)?,
            stream_mode(input.mode),
            Role::Reader,
            channel,
        )),
        TransportKind::File => Arc::new(FileEndpoint::new(
            endpoint_path(&input.path, &input.id)?,
            Role::Reader,
            false,
            channel,
        )),
        TransportKind::Fifo => Arc::new(FileEndpoint::new(
            endpoint_path(&input.path, &input.id)?,
            Role::Reader,
            true,
            channel,
        )),
        TransportKind::Http => {
            return Err(PipelineError::Config(format!(
                "input '{}': http transport is writer-only",
                input.id
            )))
        }
    };
    Ok(endpoint)
}

/// Build the writer endpoint the output entry configures.
fn build_writer(
    output: &OutputStreamConfig,
    channel: Arc<PacketChannel>,
) -> Result<Arc<dyn EndpointHandler>> {
    let endpoint: Arc<dyn EndpointHandler> = match output.transport {
        TransportKind::Udp => Arc::new(
            UdpEndpoint::new("0.0.0.0:0", Role::Writer, channel)
                .with_destinations(vec![output.destination()]),
        ),
        TransportKind::Tcp => Arc::new(TcpEndpoint::new(
            output.destination(),
            stream_mode(output.mode),
            Role::Writer,
            channel,
        )),
        TransportKind::Unix => Arc::new(UnixEndpoint::new(
            endpoint_path(&output.path, &output.name)?,
            stream_mode(output.mode),
            Role::Writer,
            channel,
        )),
        TransportKind::File => Arc::new(FileEndpoint::new(
            endpoint_path(&output.path, &output.name)?,
            Role::Writer,
            false,
            channel,
        )),
        TransportKind::Fifo => Arc::new(FileEndpoint::new(
            endpoint_path(&output.path, &output.name)?,
            Role::Writer,
            true,
            channel,
        )),
        TransportKind::Http => Arc::new(HttpEndpoint::new(output.destination(), channel)),
    };
    Ok(endpoint)
}

impl StreamPipeline {
    /// Assemble a pipeline from configuration: one reader per input and one
    /// writer toward the output, each on its configured transport.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let mut readers: Vec<Arc<dyn EndpointHandler>> = Vec::with_capacity(config.inputs.len());
        let mut reader_channels = Vec::with_capacity(config.inputs.len());
        for input in &config.inputs {
            let channel = Arc::new(PacketChannel::new(CHANNEL_DEPTH));
            readers.push(build_reader(input, Arc::clone(&channel))?);
            reader_channels.push(channel);
        }

        let writer_channel = Arc::new(PacketChannel::new(CHANNEL_DEPTH));
        let writer = build_writer(&config.output, Arc::clone(&writer_channel))?;

        Ok(Self {
            config: config.clone(),
            readers,
            reader_channels,
            writers: vec![writer],
            writer_channels: vec![writer_channel],
            scheduler: Arc::new(Dwrr::new(config.inputs.len(), config.dwrr.max_take)),
            fifo: Arc::new(FifoBuffer::new()),
            pll: Pll::new(config.pll.mbps, config.pll.kp, config.pll.ki, config.pll.kd),
            stats: Arc::new(PipelineStats::default()),
            shutdown_tx: watch::channel(false).0,
            emit_shutdown_tx: watch::channel(false).0,
            emit_notify: Arc::new(Notify::new()),
            tasks: Mutex::new(Vec::new()),
            emit_task: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Add another writer endpoint before start. The pipeline forwards every
    /// emitted packet to each writer's data channel.
    pub fn add_writer(
        &mut self,
        endpoint: Arc<dyn EndpointHandler>,
        channel: Arc<PacketChannel>,
    ) {
        self.writers.push(endpoint);
        self.writer_channels.push(channel);
    }

    /// Carry a scheduler over from a previous pipeline instance with
    /// identical DWRR parameters, resizing it to the current input count so
    /// queued residue survives a reload.
    pub fn with_scheduler(mut self, scheduler: Arc<Dwrr<EncodedPacket>>) -> Self {
        while scheduler.queue_count() < self.readers.len() {
            scheduler.add_queue();
        }
        while scheduler.queue_count() > self.readers.len() {
            scheduler.remove_queue();
        }
        self.scheduler = scheduler;
        self
    }

    /// Carry PLL controller state over from a previous pipeline instance
    /// with identical PLL parameters.
    pub fn with_pll_state(mut self, snapshot: PidSnapshot) -> Self {
        let pll = &self.config.pll;
        self.pll = Pll::with_state(pll.mbps, pll.kp, pll.ki, pll.kd, snapshot);
        self
    }

    /// The configuration this pipeline was assembled from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared scheduler handle, used to carry state across a reload.
    pub fn scheduler(&self) -> Arc<Dwrr<EncodedPacket>> {
        Arc::clone(&self.scheduler)
    }

    /// PLL controller state, used to carry phase lock across a reload.
    pub fn pll_snapshot(&self) -> PidSnapshot {
        self.pll.snapshot()
    }

    /// Snapshot the packet-plane counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Status of every endpoint, readers first.
    pub fn endpoint_status(&self) -> Vec<EndpointStatus> {
        self.readers
            .iter()
            .chain(self.writers.iter())
            .map(|endpoint| endpoint.status())
            .collect()
    }

    /// Open every endpoint and start the pipeline tasks.
    pub async fn start(&mut self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for reader in &self.readers {
            reader.open().await?;
        }
        for writer in &self.writers {
            writer.open().await?;
        }

        let trigger_rx = self.pll.start();
        let events = self.pll.events();

        let mut tasks = self.tasks.lock();
        for (index, channel) in self.reader_channels.iter().enumerate() {
            tasks.push(tokio::spawn(ingest_loop(
                index,
                Arc::clone(channel),
                Arc::clone(&self.scheduler),
                events.clone(),
                Arc::clone(&self.stats),
                self.shutdown_tx.subscribe(),
            )));
        }
        tasks.push(tokio::spawn(mux_loop(
            trigger_rx,
            Arc::clone(&self.scheduler),
            Arc::clone(&self.fifo),
            Arc::clone(&self.emit_notify),
            Arc::clone(&self.stats),
            self.shutdown_tx.subscribe(),
        )));
        drop(tasks);
        *self.emit_task.lock() = Some(tokio::spawn(emit_loop(
            Arc::clone(&self.fifo),
            self.writer_channels.clone(),
            Arc::clone(&self.emit_notify),
            Arc::clone(&self.stats),
            self.emit_shutdown_tx.subscribe(),
        )));

        tracing::info!(
            inputs = self.readers.len(),
            mbps = self.config.pll.mbps,
            max_take = self.config.dwrr.max_take,
            "pipeline started"
        );
        Ok(())
    }

    /// Close endpoints, stop the pacer, drain in-flight packets, and join
    /// the pipeline tasks. Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Readers first, so ingest tasks see their channels close and the
        // scheduler stops growing.
        for reader in &self.readers {
            if let Err(err) = reader.close().await {
                tracing::warn!(error = %err, "reader close failed");
            }
        }
        self.pll.stop();
        let _ = self.shutdown_tx.send(true);

        // Join ingest and mux before releasing the emit task, so the final
        // drain sees everything the scheduler produced.
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "pipeline task panicked");
            }
        }

        let _ = self.emit_shutdown_tx.send(true);
        self.emit_notify.notify_waiters();
        let emit_task = self.emit_task.lock().take();
        if let Some(task) = emit_task {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "emit task panicked");
            }
        }

        for writer in &self.writers {
            if let Err(err) = writer.close().await {
                tracing::warn!(error = %err, "writer close failed");
            }
        }
        tracing::info!("pipeline shut down");
    }
}

async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Validate frames from one reader and feed its DWRR queue.
///
/// Frames failing sync-byte validation are dropped and counted; null
/// stuffing is discarded; a PCR-bearing frame reports a phase event to the
/// pacer before the PCR is cleared for re-clocking.
async fn ingest_loop(
    index: usize,
    channel: Arc<PacketChannel>,
    scheduler: Arc<Dwrr<EncodedPacket>>,
    events: mpsc::Sender<()>,
    stats: Arc<PipelineStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let window = tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            window = channel.recv() => match window {
                Some(window) => window,
                None => break,
            },
        };

        let mut batch = Vec::with_capacity(window.len() / TS_PACKET_SIZE);
        for frame in window.chunks(TS_PACKET_SIZE) {
            match EncodedPacket::from_slice(frame) {
                Ok(mut packet) => {
                    if packet.is_null() {
                        continue;
                    }
                    if packet.has_pcr() {
                        let _ = events.try_send(());
                    }
                    packet.clear_pcr();
                    batch.push(packet);
                }
                Err(err) => {
                    stats.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(input = index, error = %err, "frame dropped");
                }
            }
        }
        if !batch.is_empty() {
            stats
                .packets_in
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            scheduler.enqueue(index, batch);
        }
    }
    tracing::debug!(input = index, "ingest loop stopped");
}

/// Run one scheduler cycle per pacer trigger.
async fn mux_loop(
    mut trigger_rx: mpsc::Receiver<()>,
    scheduler: Arc<Dwrr<EncodedPacket>>,
    fifo: Arc<FifoBuffer<EncodedPacket>>,
    emit_notify: Arc<Notify>,
    stats: Arc<PipelineStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            trigger = trigger_rx.recv() => match trigger {
                Some(()) => {
                    let mut queued = 0usize;
                    for batch in scheduler.do_cycle() {
                        for packet in batch {
                            fifo.push(packet);
                            queued += 1;
                        }
                    }
                    if queued == 0 && fifo.is_empty() {
                        fifo.push(EncodedPacket::null());
                        stats.nulls_stuffed.fetch_add(1, Ordering::Relaxed);
                    }
                    emit_notify.notify_one();
                }
                None => break,
            },
        }
    }
    tracing::debug!("mux loop stopped");
}

/// Drain the FIFO toward every writer endpoint channel.
async fn emit_loop(
    fifo: Arc<FifoBuffer<EncodedPacket>>,
    writer_channels: Vec<Arc<PacketChannel>>,
    emit_notify: Arc<Notify>,
    stats: Arc<PipelineStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let forward = |packet: EncodedPacket| {
        for channel in &writer_channels {
            match channel.send(packet.data()) {
                Ok(()) => {}
                Err(ChannelError::Full) => {
                    stats.output_dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(ChannelError::Closed) => {}
            }
        }
        stats.packets_out.fetch_add(1, Ordering::Relaxed);
    };

    loop {
        while let Some(packet) = fifo.pop() {
            forward(packet);
        }
        tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            _ = emit_notify.notified() => {}
        }
    }

    // Drain whatever the mux loop queued before it stopped.
    while let Some(packet) = fifo.pop() {
        forward(packet);
    }
    tracing::debug!("emit loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DwrrConfig, PllConfig};

    fn udp_input(i: usize) -> InputStreamConfig {
        InputStreamConfig {
            id: format!("in{i}"),
            name: format!("input {i}"),
            transport: TransportKind::Udp,
            ip_address: "127.0.0.1".into(),
            port: 0,
            path: None,
            mode: None,
            service_id: i as u16 + 1,
            allowed_sources: Vec::new(),
        }
    }

    fn test_config(inputs: usize) -> Config {
        Config {
            inputs: (0..inputs).map(udp_input).collect(),
            output: OutputStreamConfig {
                name: "out".into(),
                transport: TransportKind::Udp,
                ip_address: "127.0.0.1".into(),
                port: 9,
                path: None,
                mode: None,
            },
            pll: PllConfig {
                mbps: 1.504,
                kp: 1,
                ki: 1,
                kd: 1,
            },
            dwrr: DwrrConfig { max_take: 4 },
        }
    }

    #[test]
    fn test_from_config_shapes() {
        let pipeline = StreamPipeline::from_config(&test_config(3)).unwrap();
        assert_eq!(pipeline.readers.len(), 3);
        assert_eq!(pipeline.reader_channels.len(), 3);
        assert_eq!(pipeline.writers.len(), 1);
        assert_eq!(pipeline.scheduler.queue_count(), 3);
        assert_eq!(pipeline.endpoint_status().len(), 4);
    }

    #[test]
    fn test_from_config_builds_configured_transports() {
        let mut config = test_config(1);
        config.inputs.push(InputStreamConfig {
            id: "tap".into(),
            name: "tcp tap".into(),
            transport: TransportKind::Tcp,
            ip_address: "127.0.0.1".into(),
            port: 0,
            path: None,
            mode: Some(StreamMode::Client),
            service_id: 2,
            allowed_sources: Vec::new(),
        });
        config.inputs.push(InputStreamConfig {
            id: "replay".into(),
            name: "replay".into(),
            transport: TransportKind::Fifo,
            ip_address: String::new(),
            port: 0,
            path: Some("/tmp/replay.ts".into()),
            mode: None,
            service_id: 3,
            allowed_sources: Vec::new(),
        });
        config.output = OutputStreamConfig {
            name: "viewers".into(),
            transport: TransportKind::Http,
            ip_address: "0.0.0.0".into(),
            port: 8080,
            path: None,
            mode: None,
        };

        let pipeline = StreamPipeline::from_config(&config).unwrap();
        let status = pipeline.endpoint_status();
        assert_eq!(status.len(), 4);

        assert_eq!(status[0].mode, Mode::Peer);
        assert_eq!(status[0].role, Role::Reader);
        assert_eq!(status[1].mode, Mode::Client);
        assert_eq!(status[1].role, Role::Reader);
        assert_eq!(status[2].mode, Mode::Peer);
        assert_eq!(status[2].address, "/tmp/replay.ts");
        assert_eq!(status[3].mode, Mode::Server);
        assert_eq!(status[3].role, Role::Writer);
        assert_eq!(status[3].address, "0.0.0.0:8080");
    }

    #[test]
    fn test_from_config_rejects_http_input() {
        let mut config = test_config(1);
        config.inputs[0].transport = TransportKind::Http;
        assert!(matches!(
            StreamPipeline::from_config(&config),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_with_scheduler_resizes_carried_state() {
        let carried: Arc<Dwrr<EncodedPacket>> = Arc::new(Dwrr::new(5, 4));
        let pipeline = StreamPipeline::from_config(&test_config(2))
            .unwrap()
            .with_scheduler(carried);
        assert_eq!(pipeline.scheduler.queue_count(), 2);

        let carried: Arc<Dwrr<EncodedPacket>> = Arc::new(Dwrr::new(1, 4));
        let pipeline = StreamPipeline::from_config(&test_config(2))
            .unwrap()
            .with_scheduler(carried);
        assert_eq!(pipeline.scheduler.queue_count(), 2);
    }

    #[test]
    fn test_with_pll_state_seeds_controller() {
        let snapshot = PidSnapshot {
            delay_ns: 250_000,
            integral: -42,
            last_delta: 7,
        };
        let pipeline = StreamPipeline::from_config(&test_config(1))
            .unwrap()
            .with_pll_state(snapshot);
        assert_eq!(pipeline.pll_snapshot(), snapshot);
    }

    #[test]
    fn test_stats_start_at_zero() {
        let pipeline = StreamPipeline::from_config(&test_config(1)).unwrap();
        let stats = pipeline.stats();
        assert_eq!(stats.packets_in, 0);
        assert_eq!(stats.packets_out, 0);
        assert_eq!(stats.nulls_stuffed, 0);
    }
}
