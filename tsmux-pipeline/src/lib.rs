//! # tsmux-pipeline
//!
//! Composition layer of the tsmux multiplexer: configuration, the
//! reader → DWRR → FIFO → pacer → writer pipeline, and graceful shutdown.
//!
//! ```text
//! readers ─► per-reader queue ─► DWRR ─► FIFO ─► PLL-gated emit ─► writers
//!                                          ▲
//!                                          └── null-packet stuffing
//! ```

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::{
    Config, DwrrConfig, InputStreamConfig, OutputStreamConfig, PllConfig, StreamMode,
    TransportKind,
};
pub use error::{PipelineError, Result};
pub use pipeline::{StatsSnapshot, StreamPipeline};
