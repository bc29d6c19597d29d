//! # tsmux-ts
//!
//! MPEG Transport Stream packet codec for the tsmux multiplexer.
//!
//! This crate owns the bit-exact view of 188-byte TS frames:
//!
//! - **Header accessors**: sync byte, TEI/PUSI/priority flags, 13-bit PID,
//!   scrambling control, adaptation field control, continuity counter
//! - **Adaptation field**: PCR/OPCR encode and decode at 27 MHz, splice
//!   countdown, transport private data, stuffing
//! - **Null packets**: detection and construction of PID 0x1FFF stuffing
//! - **Wire variants**: TS vs. PES dispatch on the first byte with a shared
//!   disassemble/reassemble capability
//! - **Generator**: synthetic PCR-stamped streams for tests and loopback
//!
//! Getters are total and setters are no-ops when the adaptation field
//! control does not provide the target field, so packet-plane loops never
//! branch on errors.

pub mod error;
pub mod generator;
pub mod packet;
pub mod pes;

pub use error::{Result, TsError};
pub use generator::generate;
pub use packet::{
    Afc, EncodedPacket, Pcr, PCR_MAX, PID_AUDIO, PID_DATA, PID_MAX, PID_NULL, PID_PAT, PID_VIDEO,
    SYNC_BYTE, TS_PACKET_SIZE,
};
pub use pes::{Packet, PacketOps, PesPacket, PES_HEADER_MIN, PES_MARKER};
