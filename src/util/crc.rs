//! # Checksum Primitives
//!
//! Two checksum disciplines are used across the link:
//!
//! - A plain XOR fold, used by MSP v1 framing and the MSP-over-telemetry
//!   chunk transport.
//! - CRC-8/DVB-S2 (polynomial 0xD5, MSB first, init 0), used by CRSF
//!   frames, bind packets and the keyed air-packet checksum.
//!
//! The DVB-S2 fold is composable: folding a buffer in two halves with
//! [`crc8_dvb_s2_bytes_from`] yields the same result as folding the
//! concatenation, which the air layer relies on to seed packet CRCs with
//! the pairing key.

/// Fold one byte into an XOR checksum.
#[inline]
pub fn crc_xor(crc: u8, data: u8) -> u8 {
    crc ^ data
}

/// XOR of all bytes in `data`.
pub fn crc_xor_bytes(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, &b| crc ^ b)
}

/// Fold one byte into a CRC-8/DVB-S2 checksum.
pub fn crc8_dvb_s2(mut crc: u8, data: u8) -> u8 {
    crc ^= data;
    for _ in 0..8 {
        if crc & 0x80 != 0 {
            crc = (crc << 1) ^ 0xD5;
        } else {
            crc <<= 1;
        }
    }
    crc
}

/// CRC-8/DVB-S2 of `data` starting from zero.
pub fn crc8_dvb_s2_bytes(data: &[u8]) -> u8 {
    crc8_dvb_s2_bytes_from(0, data)
}

/// CRC-8/DVB-S2 of `data` starting from a previous fold state.
pub fn crc8_dvb_s2_bytes_from(crc: u8, data: &[u8]) -> u8 {
    data.iter().fold(crc, |crc, &b| crc8_dvb_s2(crc, b))
}
