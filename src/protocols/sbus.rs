//! # SBUS Payload Packing
//!
//! SBUS carries 16 channels of 11 bits each packed LSB first into 22
//! bytes, followed by a flags byte (two digital channels, frame-lost and
//! failsafe) and a zero footer. The digital channel range is the same
//! 172..1811 window CRSF uses. The line runs at 100000 bps 8E2 inverted;
//! FPort reuses the channel block at its own baud rate.

use crate::rc::data::{channel_to_digital, RcData, RC_CHANNELS_NUM};

pub const SBUS_BAUDRATE: u32 = 100_000;
pub const SBUS_START_BYTE: u8 = 0x0F;
pub const SBUS_END_BYTE: u8 = 0x00;
pub const SBUS_NUM_CHANNELS: usize = 16;
pub const SBUS_CHANNELS_SIZE: usize = 22;

pub const SBUS_FLAG_CHANNEL_17: u8 = 1 << 0;
pub const SBUS_FLAG_CHANNEL_18: u8 = 1 << 1;
pub const SBUS_FLAG_FRAME_LOST: u8 = 1 << 2;
pub const SBUS_FLAG_FAILSAFE: u8 = 1 << 3;

/// The channel block + flags byte shared by SBUS and FPort control
/// frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbusData {
    pub channels: [u16; SBUS_NUM_CHANNELS],
    pub flags: u8,
}

impl SbusData {
    pub const WIRE_SIZE: usize = SBUS_CHANNELS_SIZE + 1;

    /// Build from RC data, mapping microseconds into the digital range.
    /// Channels beyond the RC model hold their last digital center.
    pub fn from_rc(data: &RcData, failsafe: bool) -> Self {
        let mut channels = [channel_to_digital(crate::rc::data::CHANNEL_CENTER_VALUE);
            SBUS_NUM_CHANNELS];
        for (i, slot) in channels.iter_mut().enumerate().take(RC_CHANNELS_NUM) {
            *slot = channel_to_digital(data.channel(i));
        }
        let mut flags = 0;
        if failsafe {
            flags |= SBUS_FLAG_FAILSAFE | SBUS_FLAG_FRAME_LOST;
        }
        Self { channels, flags }
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        let mut acc: u32 = 0;
        let mut bits = 0;
        let mut pos = 0;
        for &ch in &self.channels {
            acc |= u32::from(ch & 0x7FF) << bits;
            bits += 11;
            while bits >= 8 {
                out[pos] = acc as u8;
                pos += 1;
                acc >>= 8;
                bits -= 8;
            }
        }
        out[SBUS_CHANNELS_SIZE] = self.flags;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return None;
        }
        let mut channels = [0u16; SBUS_NUM_CHANNELS];
        let mut acc: u32 = 0;
        let mut bits = 0;
        let mut pos = 0;
        for ch in channels.iter_mut() {
            while bits < 11 {
                acc |= u32::from(bytes[pos]) << bits;
                pos += 1;
                bits += 8;
            }
            *ch = (acc & 0x7FF) as u16;
            acc >>= 11;
            bits -= 11;
        }
        Some(Self {
            channels,
            flags: bytes[SBUS_CHANNELS_SIZE],
        })
    }

    /// A full SBUS wire frame: start byte, channel block, flags, footer.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(Self::WIRE_SIZE + 2);
        frame.push(SBUS_START_BYTE);
        frame.extend_from_slice(&self.to_bytes());
        frame.push(SBUS_END_BYTE);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rc::data::CHANNEL_CENTER_VALUE;

    #[test]
    fn test_pack_round_trip() {
        let mut data = SbusData {
            channels: [0; SBUS_NUM_CHANNELS],
            flags: 0,
        };
        for (i, ch) in data.channels.iter_mut().enumerate() {
            *ch = 172 + (i as u16) * 64;
        }
        let decoded = SbusData::from_bytes(&data.to_bytes()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_failsafe_flags() {
        let mut rc = RcData::new();
        rc.set_channel(0, CHANNEL_CENTER_VALUE, 1);
        let data = SbusData::from_rc(&rc, true);
        assert!(data.flags & SBUS_FLAG_FAILSAFE != 0);
        assert!(data.flags & SBUS_FLAG_FRAME_LOST != 0);
        let data = SbusData::from_rc(&rc, false);
        assert_eq!(data.flags, 0);
    }

    #[test]
    fn test_frame_delimiters() {
        let rc = RcData::new();
        let frame = SbusData::from_rc(&rc, false).to_frame();
        assert_eq!(frame.len(), 25);
        assert_eq!(frame[0], SBUS_START_BYTE);
        assert_eq!(*frame.last().unwrap(), SBUS_END_BYTE);
        // Center sticks land on 992 in the digital range.
        let decoded = SbusData::from_bytes(&frame[1..]).unwrap();
        assert_eq!(decoded.channels[0], 992);
    }
}
