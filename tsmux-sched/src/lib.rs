//! # tsmux-sched
//!
//! Fair scheduling and bitrate pacing for the tsmux multiplexer:
//!
//! - [`Dwrr`]: a Deficit Weighted Round Robin scheduler draining per-input
//!   queues fairly with a bounded per-cycle take
//! - [`Pll`]: a PID-controlled phase-locked loop emitting one trigger per
//!   packet period at the configured bitrate, nudged by observed PCR events

pub mod dwrr;
pub mod pll;

pub use dwrr::Dwrr;
pub use pll::{PidSnapshot, Pll, TS_PACKET_BITS};
