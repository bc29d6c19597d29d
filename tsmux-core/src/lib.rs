//! # tsmux-core
//!
//! Buffering primitives shared across the tsmux pipeline:
//!
//! - [`FifoBuffer`]: a generic mutex-guarded FIFO queue
//! - [`BufferPool`]: a bounded free-list of reusable byte buffers
//! - [`PacketChannel`]: a bounded packet channel layered on pooled buffers,
//!   with non-blocking sends and async receives
//!
//! Locks in this crate are never held across an await point.

pub mod channel;
pub mod error;
pub mod fifo;
pub mod pool;

pub use channel::PacketChannel;
pub use error::{ChannelError, Result};
pub use fifo::FifoBuffer;
pub use pool::{BufferPool, DEFAULT_BUFFER_CAPACITY};
