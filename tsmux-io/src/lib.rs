//! # tsmux-io
//!
//! Endpoint handlers for the tsmux multiplexer. Every transport implements
//! the same open/close/status capability around a buffered packet channel:
//!
//! - [`UdpEndpoint`]: datagram peer with source allow-listing (reader) and
//!   destination fan-out (writer)
//! - [`TcpEndpoint`] / [`UnixEndpoint`]: stream server or client with one
//!   task per connection
//! - [`FileEndpoint`]: regular files and named pipes
//! - [`HttpEndpoint`]: writer-only chunked `video/MP2T` streaming server
//!
//! Background tasks observe a shutdown signal and exit within one loop
//! iteration of `close`; I/O deadlines are local and never crash the
//! process.

pub mod error;
pub mod handler;

mod conn;

pub mod file;
pub mod http;
pub mod tcp;
pub mod udp;
pub mod unix;

pub use error::{EndpointError, Result};
pub use file::FileEndpoint;
pub use handler::{EndpointHandler, EndpointStatus, Mode, Role};
pub use http::HttpEndpoint;
pub use tcp::TcpEndpoint;
pub use udp::UdpEndpoint;
pub use unix::UnixEndpoint;
