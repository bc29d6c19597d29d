//! Tagged over-the-wire packet variants.
//!
//! Frames arriving on the wire are either raw transport-stream packets or
//! PES frames; the first byte decides (0x47 for TS, 0x80 for PES). Both
//! variants share the disassemble / reassemble / adjust-bitrate capability.
//! PES handling is header framing only: the timestamp window is carried as
//! raw bytes.

use crate::error::{Result, TsError};
use crate::packet::{EncodedPacket, SYNC_BYTE};

/// First-byte marker of a PES frame.
pub const PES_MARKER: u8 = 0x80;

/// Minimum byte count for a framed PES header.
pub const PES_HEADER_MIN: usize = 15;

/// Shared capability of wire packet variants.
pub trait PacketOps: Sized {
    /// Parse the variant from wire bytes.
    fn disassemble(data: &[u8]) -> Result<Self>;

    /// Serialize the variant back to wire bytes.
    fn reassemble(&self) -> Result<Vec<u8>>;

    /// Prepare the packet for emission at a different mux rate.
    fn adjust_bitrate(&mut self, target_bps: u64) -> Result<()>;
}

/// A PES frame reduced to its header fields and raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesPacket {
    /// Stream identifier.
    pub stream_id: u8,
    /// Declared packet length.
    pub packet_length: u16,
    /// Scrambling control bits.
    pub scrambling_control: u8,
    /// Priority flag.
    pub priority: bool,
    /// Data alignment indicator.
    pub data_alignment: bool,
    /// Copyright indicator.
    pub copyright: bool,
    /// Declared header length.
    pub header_length: u8,
    /// Raw PTS/DTS window, not decoded.
    pub timestamps: [u8; 5],
    /// Bytes following the header.
    pub payload: Vec<u8>,
}

impl PacketOps for PesPacket {
    fn disassemble(data: &[u8]) -> Result<Self> {
        if data.len() < PES_HEADER_MIN {
            return Err(TsError::InvalidPes(format!(
                "truncated header: {} bytes",
                data.len()
            )));
        }
        if data[0] != PES_MARKER {
            return Err(TsError::UnknownPacketType(data[0]));
        }

        let flags = data[7];
        let mut timestamps = [0u8; 5];
        timestamps.copy_from_slice(&data[9..14]);

        Ok(Self {
            stream_id: data[3],
            packet_length: u16::from_be_bytes([data[4], data[5]]),
            scrambling_control: (flags >> 4) & 0x03,
            priority: flags & 0x08 != 0,
            data_alignment: flags & 0x04 != 0,
            copyright: flags & 0x02 != 0,
            header_length: data[8],
            timestamps,
            payload: data[14..].to_vec(),
        })
    }

    fn reassemble(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(PES_HEADER_MIN + self.payload.len());
        out.push(PES_MARKER);
        out.push(0x00);
        out.push(0x01);
        out.push(self.stream_id);
        out.extend_from_slice(&self.packet_length.to_be_bytes());
        out.push(0x80); // header marker bits
        out.push(
            ((self.scrambling_control & 0x03) << 4)
                | ((self.priority as u8) << 3)
                | ((self.data_alignment as u8) << 2)
                | ((self.copyright as u8) << 1),
        );
        out.push(self.header_length);
        out.extend_from_slice(&self.timestamps);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    fn adjust_bitrate(&mut self, _target_bps: u64) -> Result<()> {
        // PES headers carry no clock reference; nothing to re-stamp.
        Ok(())
    }
}

impl PacketOps for EncodedPacket {
    fn disassemble(data: &[u8]) -> Result<Self> {
        Self::from_slice(data)
    }

    fn reassemble(&self) -> Result<Vec<u8>> {
        Ok(self.data().to_vec())
    }

    fn adjust_bitrate(&mut self, _target_bps: u64) -> Result<()> {
        // Re-clocking invalidates the embedded clock reference; strip it so
        // the pacer downstream owns timing.
        self.clear_pcr();
        Ok(())
    }
}

/// A wire packet, dispatched on its first byte.
#[derive(Debug, Clone)]
pub enum Packet {
    /// Raw 188-byte transport-stream packet.
    Ts(EncodedPacket),
    /// Framed PES packet.
    Pes(PesPacket),
}

impl Packet {
    /// Parse a wire frame into the matching variant.
    pub fn disassemble(data: &[u8]) -> Result<Self> {
        match data.first() {
            Some(&SYNC_BYTE) => Ok(Packet::Ts(EncodedPacket::from_slice(data)?)),
            Some(&PES_MARKER) => Ok(Packet::Pes(PesPacket::disassemble(data)?)),
            Some(&other) => Err(TsError::UnknownPacketType(other)),
            None => Err(TsError::InvalidPacketSize(0)),
        }
    }

    /// Serialize the variant back to wire bytes.
    pub fn reassemble(&self) -> Result<Vec<u8>> {
        match self {
            Packet::Ts(packet) => packet.reassemble(),
            Packet::Pes(packet) => packet.reassemble(),
        }
    }

    /// Prepare the packet for emission at a different mux rate.
    pub fn adjust_bitrate(&mut self, target_bps: u64) -> Result<()> {
        match self {
            Packet::Ts(packet) => packet.adjust_bitrate(target_bps),
            Packet::Pes(packet) => packet.adjust_bitrate(target_bps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TS_PACKET_SIZE;

    fn pes_frame() -> Vec<u8> {
        let mut data = vec![0u8; 32];
        data[0] = PES_MARKER;
        data[3] = 0xE0; // video stream id
        data[4] = 0x00;
        data[5] = 0x1A;
        data[7] = 0x2C; // scrambled=2, priority, alignment
        data[8] = 5;
        data[9..14].copy_from_slice(&[0x21, 0x00, 0x01, 0x00, 0x01]);
        for (i, byte) in data[14..].iter_mut().enumerate() {
            *byte = i as u8;
        }
        data
    }

    #[test]
    fn test_dispatch_ts() {
        let mut data = [0xFFu8; TS_PACKET_SIZE];
        data[0] = SYNC_BYTE;
        data[3] = 0x10;
        let packet = Packet::disassemble(&data).unwrap();
        assert!(matches!(packet, Packet::Ts(_)));
    }

    #[test]
    fn test_dispatch_pes() {
        let packet = Packet::disassemble(&pes_frame()).unwrap();
        let Packet::Pes(pes) = packet else {
            panic!("expected PES variant");
        };
        assert_eq!(pes.stream_id, 0xE0);
        assert_eq!(pes.packet_length, 0x1A);
        assert_eq!(pes.scrambling_control, 2);
        assert!(pes.priority);
        assert!(pes.data_alignment);
        assert!(!pes.copyright);
        assert_eq!(pes.header_length, 5);
        assert_eq!(pes.payload.len(), 32 - 14);
    }

    #[test]
    fn test_dispatch_unknown() {
        assert_eq!(
            Packet::disassemble(&[0x42; 188]).unwrap_err(),
            TsError::UnknownPacketType(0x42)
        );
    }

    #[test]
    fn test_pes_truncated() {
        assert!(matches!(
            PesPacket::disassemble(&[PES_MARKER; 10]),
            Err(TsError::InvalidPes(_))
        ));
    }

    #[test]
    fn test_pes_reassemble_roundtrip() {
        let pes = PesPacket::disassemble(&pes_frame()).unwrap();
        let wire = pes.reassemble().unwrap();
        let again = PesPacket::disassemble(&wire).unwrap();
        assert_eq!(pes, again);
    }

    #[test]
    fn test_ts_adjust_bitrate_strips_pcr() {
        let mut data = [0xFFu8; TS_PACKET_SIZE];
        data[0] = SYNC_BYTE;
        data[3] = 0x10;
        let mut packet = Packet::disassemble(&data).unwrap();
        if let Packet::Ts(ts) = &mut packet {
            ts.set_pcr(27_000_000);
            assert!(ts.has_pcr());
        }

        packet.adjust_bitrate(4_000_000).unwrap();
        let Packet::Ts(ts) = &packet else {
            panic!("expected TS variant");
        };
        assert!(!ts.has_pcr());
    }
}
