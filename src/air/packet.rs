//! # Air Data Packets
//!
//! Per-mode fixed-size frames. Uplink packets carry the four stick
//! channels at full precision plus a window of stream bytes; downlink
//! packets carry link diagnostics plus their own stream window. Both end
//! with a CRC seeded by the pairing key, so packets from a foreign
//! pairing fail validation even when the sync word happens to match.
//!
//! Layouts (sizes per mode, `N` = packet size):
//!
//! ```text
//! TX: seq:1  sticks[5] (4 x 10 bits)  stream[N-7]  crc:1
//! RX: seq:1  rssi:1  snr:1  lq:1  ant:1  stream[N-6]  crc:1
//! ```

use crate::air::pairing::{air_packet_crc, AirKey};
use crate::air::AIR_SEQ_MASK;
use crate::rc::data::{channel_from_air_bits, channel_to_air_bits, AIR_CHANNEL_BITS};

/// Fixed header + CRC overhead of an uplink packet.
pub const AIR_TX_PACKET_OVERHEAD: usize = 1 + 5 + 1;
/// Fixed header + CRC overhead of a downlink packet.
pub const AIR_RX_PACKET_OVERHEAD: usize = 1 + 4 + 1;

/// Uplink (TX → RX) packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirTxPacket {
    pub seq: u8,
    /// The four primary sticks, microseconds.
    pub channels: [u16; 4],
    pub stream: Vec<u8>,
}

impl AirTxPacket {
    pub fn stream_capacity(packet_size: usize) -> usize {
        packet_size.saturating_sub(AIR_TX_PACKET_OVERHEAD)
    }

    pub fn pack(&self, packet_size: usize, key: &AirKey) -> Vec<u8> {
        debug_assert!(self.stream.len() <= Self::stream_capacity(packet_size));
        let mut buf = vec![0u8; packet_size];
        buf[0] = self.seq & AIR_SEQ_MASK;
        // Four channels, ten bits each, LSB first across five bytes.
        let mut acc: u64 = 0;
        let mut bits = 0;
        for &ch in &self.channels {
            acc |= u64::from(channel_to_air_bits(ch, AIR_CHANNEL_BITS)) << bits;
            bits += AIR_CHANNEL_BITS;
        }
        for (i, slot) in buf[1..6].iter_mut().enumerate() {
            *slot = (acc >> (8 * i)) as u8;
        }
        buf[6..6 + self.stream.len()].copy_from_slice(&self.stream);
        let crc = air_packet_crc(&buf, key);
        buf[packet_size - 1] = crc;
        buf
    }

    /// Parse and validate against the expected key.
    pub fn unpack(buf: &[u8], key: &AirKey) -> Option<Self> {
        if buf.len() < AIR_TX_PACKET_OVERHEAD {
            return None;
        }
        if air_packet_crc(buf, key) != buf[buf.len() - 1] {
            return None;
        }
        let mut acc: u64 = 0;
        for (i, &b) in buf[1..6].iter().enumerate() {
            acc |= u64::from(b) << (8 * i);
        }
        let mut channels = [0u16; 4];
        for (i, ch) in channels.iter_mut().enumerate() {
            let raw = ((acc >> (i as u32 * AIR_CHANNEL_BITS))
                & u64::from((1u32 << AIR_CHANNEL_BITS) - 1)) as u16;
            *ch = channel_from_air_bits(raw, AIR_CHANNEL_BITS);
        }
        Some(Self {
            seq: buf[0] & AIR_SEQ_MASK,
            channels,
            stream: buf[6..buf.len() - 1].to_vec(),
        })
    }
}

/// Downlink (RX → TX) packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirRxPacket {
    pub seq: u8,
    /// dB.
    pub rssi: i8,
    /// 0.25 dB steps.
    pub snr: i8,
    /// Percent.
    pub lq: u8,
    pub active_antenna: u8,
    pub stream: Vec<u8>,
}

impl AirRxPacket {
    pub fn stream_capacity(packet_size: usize) -> usize {
        packet_size.saturating_sub(AIR_RX_PACKET_OVERHEAD)
    }

    pub fn pack(&self, packet_size: usize, key: &AirKey) -> Vec<u8> {
        debug_assert!(self.stream.len() <= Self::stream_capacity(packet_size));
        let mut buf = vec![0u8; packet_size];
        buf[0] = self.seq & AIR_SEQ_MASK;
        buf[1] = self.rssi as u8;
        buf[2] = self.snr as u8;
        buf[3] = self.lq;
        buf[4] = self.active_antenna;
        buf[5..5 + self.stream.len()].copy_from_slice(&self.stream);
        let crc = air_packet_crc(&buf, key);
        buf[packet_size - 1] = crc;
        buf
    }

    /// Parse and validate against the expected key.
    pub fn unpack(buf: &[u8], key: &AirKey) -> Option<Self> {
        if buf.len() < AIR_RX_PACKET_OVERHEAD {
            return None;
        }
        if air_packet_crc(buf, key) != buf[buf.len() - 1] {
            return None;
        }
        Some(Self {
            seq: buf[0] & AIR_SEQ_MASK,
            rssi: buf[1] as i8,
            snr: buf[2] as i8,
            lq: buf[3],
            active_antenna: buf[4],
            stream: buf[5..buf.len() - 1].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rc::data::{CHANNEL_CENTER_VALUE, CHANNEL_MIN_VALUE};

    fn key() -> AirKey {
        AirKey::new(0xCAFE_F00D).unwrap()
    }

    #[test]
    fn test_tx_packet_round_trip() {
        let packet = AirTxPacket {
            seq: 7,
            channels: [1000, CHANNEL_CENTER_VALUE, 2000, CHANNEL_MIN_VALUE],
            stream: vec![0x7E, 0xC5, 0x7E],
        };
        let size = 16;
        let wire = packet.pack(size, &key());
        assert_eq!(wire.len(), size);
        let decoded = AirTxPacket::unpack(&wire, &key()).unwrap();
        assert_eq!(decoded.seq, 7);
        assert_eq!(decoded.channels, packet.channels);
        assert_eq!(&decoded.stream[..3], packet.stream.as_slice());
    }

    #[test]
    fn test_tx_packet_rejects_wrong_key() {
        let packet = AirTxPacket {
            seq: 1,
            channels: [CHANNEL_CENTER_VALUE; 4],
            stream: vec![],
        };
        let wire = packet.pack(12, &key());
        assert!(AirTxPacket::unpack(&wire, &key()).is_some());
        let foreign = AirKey::new(0x0BAD_C0DE).unwrap();
        assert!(AirTxPacket::unpack(&wire, &foreign).is_none());
    }

    #[test]
    fn test_tx_packet_rejects_bit_flip() {
        let packet = AirTxPacket {
            seq: 3,
            channels: [CHANNEL_CENTER_VALUE; 4],
            stream: vec![1, 2, 3],
        };
        let mut wire = packet.pack(14, &key());
        wire[4] ^= 0x10;
        assert!(AirTxPacket::unpack(&wire, &key()).is_none());
    }

    #[test]
    fn test_rx_packet_round_trip() {
        let packet = AirRxPacket {
            seq: 15,
            rssi: -87,
            snr: 22,
            lq: 99,
            active_antenna: 0,
            stream: vec![0xAA, 0xBB],
        };
        let wire = packet.pack(12, &key());
        let decoded = AirRxPacket::unpack(&wire, &key()).unwrap();
        assert_eq!(decoded.seq, 15);
        assert_eq!(decoded.rssi, -87);
        assert_eq!(decoded.snr, 22);
        assert_eq!(decoded.lq, 99);
        assert_eq!(&decoded.stream[..2], packet.stream.as_slice());
    }
}
