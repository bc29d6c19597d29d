//! Synthetic transport-stream generator.
//!
//! Produces PCR-stamped packets with random payloads, used by tests and by
//! loopback scenarios that need a realistic constant-rate source.

use rand::Rng;

use crate::error::{Result, TsError};
use crate::packet::{Afc, EncodedPacket, PCR_MAX, PID_AUDIO, PID_DATA, PID_VIDEO};

/// Generate `count` transport-stream packets forming one payload unit.
///
/// The PID is drawn from the conventional video/audio/data trio, the first
/// packet carries the payload-unit-start flag, continuity counters sequence
/// from zero, and PCR values step evenly across the clock range.
pub fn generate(count: usize) -> Result<Vec<EncodedPacket>> {
    if count == 0 {
        return Err(TsError::InvalidCount(0));
    }

    let mut rng = rand::thread_rng();
    let pids = [PID_VIDEO, PID_AUDIO, PID_DATA];
    let pid = pids[rng.gen_range(0..pids.len())];
    let pcr_step = PCR_MAX / count as u64;

    let mut packets = Vec::with_capacity(count);
    for i in 0..count {
        let mut data = [0u8; 188];
        data[0] = crate::packet::SYNC_BYTE;
        let mut packet = EncodedPacket::new(data)?;

        packet.set_pid(pid);
        packet.set_afc(Afc::AdaptationAndPayload);
        packet.set_cc((i & 0x0F) as u8);
        if i == 0 {
            packet.set_pusi();
        }
        packet.set_pcr(i as u64 * pcr_step);

        let mut payload = vec![0u8; 188 - 5 - packet.data()[4] as usize];
        rng.fill(payload.as_mut_slice());
        packet.set_payload(&payload);

        packets.push(packet);
    }

    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_rejects_zero() {
        assert_eq!(generate(0), Err(TsError::InvalidCount(0)));
    }

    #[test]
    fn test_generate_invariants() {
        let packets = generate(20).unwrap();
        assert_eq!(packets.len(), 20);

        let pid = packets[0].pid();
        assert!([PID_VIDEO, PID_AUDIO, PID_DATA].contains(&pid));

        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.pid(), pid);
            assert_eq!(packet.cc(), (i & 0x0F) as u8);
            assert_eq!(packet.pusi(), i == 0);
            assert!(packet.has_pcr());
            assert!(!packet.is_null());
        }
    }

    #[test]
    fn test_generate_pcr_monotonic() {
        let packets = generate(10).unwrap();
        let pcrs: Vec<u64> = packets.iter().map(|p| p.pcr()).collect();
        assert!(pcrs.windows(2).all(|w| w[0] < w[1]));
    }
}
