//! # CRSF Framing
//!
//! Crossfire serial protocol: 420000 bps, 8N1, non-inverted, half or full
//! duplex. All multi-byte wire fields are big endian, unlike the rest of
//! the link.
//!
//! Frame layout: `addr, frame_size, type, payload, crc`, where
//! `frame_size` counts type + payload + crc and the CRC is CRC-8/DVB-S2
//! over type and payload. Extended frames (types 0x28..=0x96) insert
//! destination and origin addresses right after the type.

use log::warn;

use crate::util::{crc8_dvb_s2_bytes, TimeMicros};

pub const CRSF_BAUDRATE: u32 = 420_000;
pub const CRSF_OPENTX_BAUDRATE: u32 = 400_000;
pub const CRSF_NUM_CHANNELS: usize = 16;
pub const CRSF_CHANNEL_VALUE_MIN: u16 = 172;
pub const CRSF_CHANNEL_VALUE_MID: u16 = 992;
pub const CRSF_CHANNEL_VALUE_MAX: u16 = 1811;

pub const CRSF_PAYLOAD_SIZE_MAX: usize = 62;
/// addr + frame_size are not counted by the frame_size field.
pub const CRSF_FRAME_NOT_COUNTED_BYTES: usize = 2;
pub const CRSF_FRAME_SIZE_MAX: usize = CRSF_PAYLOAD_SIZE_MAX + CRSF_FRAME_NOT_COUNTED_BYTES;

/// Chunk sizes for MSP over CRSF. Requests are bounded by the OpenTX
/// outbound telemetry buffer.
pub const CRSF_MSP_REQ_PAYLOAD_SIZE: usize = 8;
pub const CRSF_MSP_RESP_PAYLOAD_SIZE: usize = 58;

pub const CRSF_CHANNELS_PAYLOAD_SIZE: usize = 22;

/// Device ping cadence on the CRSF output.
pub const CRSF_PING_INTERVAL: TimeMicros = 10 * crate::util::MICROS_PER_SEC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CrsfFrameType {
    Gps = 0x02,
    BatterySensor = 0x08,
    LinkStatistics = 0x14,
    RcChannelsPacked = 0x16,
    Attitude = 0x1E,
    FlightMode = 0x21,
    // Extended header frames, 0x28 to 0x96.
    DevicePing = 0x28,
    DeviceInfo = 0x29,
    ParameterSettingsEntry = 0x2B,
    ParameterRead = 0x2C,
    ParameterWrite = 0x2D,
    Command = 0x32,
    MspReq = 0x7A,
    MspResp = 0x7B,
    MspWrite = 0x7C,
}

impl CrsfFrameType {
    pub fn from_u8(t: u8) -> Option<Self> {
        Some(match t {
            0x02 => CrsfFrameType::Gps,
            0x08 => CrsfFrameType::BatterySensor,
            0x14 => CrsfFrameType::LinkStatistics,
            0x16 => CrsfFrameType::RcChannelsPacked,
            0x1E => CrsfFrameType::Attitude,
            0x21 => CrsfFrameType::FlightMode,
            0x28 => CrsfFrameType::DevicePing,
            0x29 => CrsfFrameType::DeviceInfo,
            0x2B => CrsfFrameType::ParameterSettingsEntry,
            0x2C => CrsfFrameType::ParameterRead,
            0x2D => CrsfFrameType::ParameterWrite,
            0x32 => CrsfFrameType::Command,
            0x7A => CrsfFrameType::MspReq,
            0x7B => CrsfFrameType::MspResp,
            0x7C => CrsfFrameType::MspWrite,
            _ => return None,
        })
    }
}

/// True for frame types that carry the extended header.
pub fn is_extended_type(frame_type: u8) -> bool {
    (0x28..=0x96).contains(&frame_type)
}

pub mod addr {
    pub const BROADCAST: u8 = 0x00;
    pub const USB: u8 = 0x10;
    pub const CURRENT_SENSOR: u8 = 0xC0;
    pub const GPS: u8 = 0xC2;
    pub const FLIGHT_CONTROLLER: u8 = 0xC8;
    pub const RADIO_TRANSMITTER: u8 = 0xEA;
    pub const CRSF_RECEIVER: u8 = 0xEC;
    pub const CRSF_TRANSMITTER: u8 = 0xEE;
}

/// One CRSF frame, header fields split out and the payload owned. For
/// extended frames the payload excludes the two extra address bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrsfFrame {
    pub addr: u8,
    pub frame_type: u8,
    /// `(dest_addr, orig_addr)` for extended header frames.
    pub ext: Option<(u8, u8)>,
    pub payload: Vec<u8>,
}

impl CrsfFrame {
    pub fn new(addr: u8, frame_type: CrsfFrameType, payload: Vec<u8>) -> Self {
        Self {
            addr,
            frame_type: frame_type as u8,
            ext: None,
            payload,
        }
    }

    pub fn new_extended(
        addr: u8,
        frame_type: CrsfFrameType,
        dest_addr: u8,
        orig_addr: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            addr,
            frame_type: frame_type as u8,
            ext: Some((dest_addr, orig_addr)),
            payload,
        }
    }

    pub fn known_type(&self) -> Option<CrsfFrameType> {
        CrsfFrameType::from_u8(self.frame_type)
    }

    /// frame_size field value: type + ext header + payload + crc.
    pub fn frame_size(&self) -> u8 {
        (self.payload.len() + if self.ext.is_some() { 2 } else { 0 } + 2) as u8
    }

    /// Serialize for the wire, CRC included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 6);
        buf.push(self.addr);
        buf.push(self.frame_size());
        buf.push(self.frame_type);
        if let Some((dest, orig)) = self.ext {
            buf.push(dest);
            buf.push(orig);
        }
        buf.extend_from_slice(&self.payload);
        buf.push(crc8_dvb_s2_bytes(&buf[2..]));
        buf
    }

    /// Null-terminated string payload, if the frame carries one.
    pub fn as_str(&self) -> Option<&str> {
        let end = self.payload.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&self.payload[..end]).ok()
    }

    pub fn as_channels(&self) -> Option<[u16; CRSF_NUM_CHANNELS]> {
        if self.payload.len() != CRSF_CHANNELS_PAYLOAD_SIZE {
            return None;
        }
        let mut payload = [0u8; CRSF_CHANNELS_PAYLOAD_SIZE];
        payload.copy_from_slice(&self.payload);
        Some(unpack_channels(&payload))
    }

    pub fn as_gps(&self) -> Option<CrsfGps> {
        CrsfGps::parse(&self.payload)
    }

    pub fn as_battery_sensor(&self) -> Option<CrsfBatterySensor> {
        CrsfBatterySensor::parse(&self.payload)
    }

    pub fn as_attitude(&self) -> Option<CrsfAttitude> {
        CrsfAttitude::parse(&self.payload)
    }

    pub fn as_link_stats(&self) -> Option<CrsfLinkStats> {
        CrsfLinkStats::parse(&self.payload)
    }
}

/// Pack 16 channels of 11 bits each, LSB first, into 22 bytes.
pub fn pack_channels(channels: &[u16; CRSF_NUM_CHANNELS]) -> [u8; CRSF_CHANNELS_PAYLOAD_SIZE] {
    let mut out = [0u8; CRSF_CHANNELS_PAYLOAD_SIZE];
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut pos = 0;
    for &ch in channels {
        acc |= u32::from(ch & 0x7FF) << bits;
        bits += 11;
        while bits >= 8 {
            out[pos] = acc as u8;
            pos += 1;
            acc >>= 8;
            bits -= 8;
        }
    }
    out
}

/// Inverse of [`pack_channels`].
pub fn unpack_channels(payload: &[u8; CRSF_CHANNELS_PAYLOAD_SIZE]) -> [u16; CRSF_NUM_CHANNELS] {
    let mut out = [0u16; CRSF_NUM_CHANNELS];
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut pos = 0;
    for ch in out.iter_mut() {
        while bits < 11 {
            acc |= u32::from(payload[pos]) << bits;
            pos += 1;
            bits += 8;
        }
        *ch = (acc & 0x7FF) as u16;
        acc >>= 11;
        bits -= 11;
    }
    out
}

/// GPS frame payload (type 0x02). Raw wire units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrsfGps {
    /// Degrees / 10^7.
    pub lat: i32,
    pub lon: i32,
    /// km/h / 10.
    pub ground_speed: u16,
    /// Degrees / 100.
    pub heading: u16,
    /// Meters, 1000 m offset.
    pub altitude: u16,
    pub sats: u8,
}

impl CrsfGps {
    pub fn parse(p: &[u8]) -> Option<Self> {
        if p.len() < 15 {
            return None;
        }
        Some(Self {
            lat: i32::from_be_bytes(p[0..4].try_into().unwrap()),
            lon: i32::from_be_bytes(p[4..8].try_into().unwrap()),
            ground_speed: u16::from_be_bytes(p[8..10].try_into().unwrap()),
            heading: u16::from_be_bytes(p[10..12].try_into().unwrap()),
            altitude: u16::from_be_bytes(p[12..14].try_into().unwrap()),
            sats: p[14],
        })
    }

    pub fn to_payload(self) -> Vec<u8> {
        let mut p = Vec::with_capacity(15);
        p.extend_from_slice(&self.lat.to_be_bytes());
        p.extend_from_slice(&self.lon.to_be_bytes());
        p.extend_from_slice(&self.ground_speed.to_be_bytes());
        p.extend_from_slice(&self.heading.to_be_bytes());
        p.extend_from_slice(&self.altitude.to_be_bytes());
        p.push(self.sats);
        p
    }
}

/// Battery sensor payload (type 0x08). Raw wire units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrsfBatterySensor {
    /// 0.1 V.
    pub voltage: u16,
    /// 0.1 A.
    pub current: u16,
    /// mAh, 24 bits on the wire.
    pub mah_drawn: u32,
    pub percentage_remaining: u8,
}

impl CrsfBatterySensor {
    pub fn parse(p: &[u8]) -> Option<Self> {
        if p.len() < 8 {
            return None;
        }
        Some(Self {
            voltage: u16::from_be_bytes(p[0..2].try_into().unwrap()),
            current: u16::from_be_bytes(p[2..4].try_into().unwrap()),
            mah_drawn: u32::from(p[4]) << 16 | u32::from(p[5]) << 8 | u32::from(p[6]),
            percentage_remaining: p[7],
        })
    }

    pub fn to_payload(self) -> Vec<u8> {
        let mut p = Vec::with_capacity(8);
        p.extend_from_slice(&self.voltage.to_be_bytes());
        p.extend_from_slice(&self.current.to_be_bytes());
        p.extend_from_slice(&self.mah_drawn.to_be_bytes()[1..]);
        p.push(self.percentage_remaining);
        p
    }
}

/// Attitude payload (type 0x1E), radians / 10000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrsfAttitude {
    pub pitch: i16,
    pub roll: i16,
    pub yaw: i16,
}

impl CrsfAttitude {
    pub fn parse(p: &[u8]) -> Option<Self> {
        if p.len() < 6 {
            return None;
        }
        Some(Self {
            pitch: i16::from_be_bytes(p[0..2].try_into().unwrap()),
            roll: i16::from_be_bytes(p[2..4].try_into().unwrap()),
            yaw: i16::from_be_bytes(p[4..6].try_into().unwrap()),
        })
    }

    pub fn to_payload(self) -> Vec<u8> {
        let mut p = Vec::with_capacity(6);
        p.extend_from_slice(&self.pitch.to_be_bytes());
        p.extend_from_slice(&self.roll.to_be_bytes());
        p.extend_from_slice(&self.yaw.to_be_bytes());
        p
    }
}

/// Link statistics payload (type 0x14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CrsfLinkStats {
    pub uplink_rssi_ant1: i8,
    pub uplink_rssi_ant2: i8,
    pub uplink_lq: i8,
    pub uplink_snr: i8,
    pub active_antenna: i8,
    pub rf_mode: i8,
    pub uplink_tx_power: u8,
    pub downlink_rssi: i8,
    pub downlink_lq: i8,
    pub downlink_snr: i8,
}

impl CrsfLinkStats {
    pub fn parse(p: &[u8]) -> Option<Self> {
        if p.len() < 10 {
            return None;
        }
        Some(Self {
            uplink_rssi_ant1: p[0] as i8,
            uplink_rssi_ant2: p[1] as i8,
            uplink_lq: p[2] as i8,
            uplink_snr: p[3] as i8,
            active_antenna: p[4] as i8,
            rf_mode: p[5] as i8,
            uplink_tx_power: p[6],
            downlink_rssi: p[7] as i8,
            downlink_lq: p[8] as i8,
            downlink_snr: p[9] as i8,
        })
    }

    pub fn to_payload(self) -> Vec<u8> {
        vec![
            self.uplink_rssi_ant1 as u8,
            self.uplink_rssi_ant2 as u8,
            self.uplink_lq as u8,
            self.uplink_snr as u8,
            self.active_antenna as u8,
            self.rf_mode as u8,
            self.uplink_tx_power,
            self.downlink_rssi as u8,
            self.downlink_lq as u8,
            self.downlink_snr as u8,
        ]
    }
}

/// Streaming CRSF decoder. Feed wire bytes in, take validated frames out.
pub struct CrsfPort {
    buf: Vec<u8>,
}

impl CrsfPort {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(CRSF_FRAME_SIZE_MAX),
        }
    }

    /// Append wire bytes and decode every complete frame in the buffer.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<CrsfFrame> {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > CRSF_FRAME_SIZE_MAX * 2 {
            let excess = self.buf.len() - CRSF_FRAME_SIZE_MAX * 2;
            self.buf.drain(..excess);
        }
        self.decode()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn has_buffered_data(&self) -> bool {
        !self.buf.is_empty()
    }

    fn decode(&mut self) -> Vec<CrsfFrame> {
        let mut frames = Vec::new();
        let mut start = 0;
        while self.buf.len() - start >= 2 {
            let frame_size = self.buf[start + 1] as usize;
            // Plausible frames carry at least type + crc and fit the
            // protocol maximum.
            if frame_size < 2 || frame_size > CRSF_PAYLOAD_SIZE_MAX + 2 {
                start += 1;
                continue;
            }
            let total = frame_size + CRSF_FRAME_NOT_COUNTED_BYTES;
            if self.buf.len() - start < total {
                break;
            }
            let received_crc = self.buf[start + total - 1];
            let expected_crc = crc8_dvb_s2_bytes(&self.buf[start + 2..start + total - 1]);
            if received_crc != expected_crc {
                warn!(
                    target: "crsf",
                    "CRC error in frame with size {total}: expected 0x{expected_crc:02x} but got 0x{received_crc:02x}"
                );
                start += 1;
                continue;
            }
            let frame_type = self.buf[start + 2];
            let body = &self.buf[start + 3..start + total - 1];
            let (ext, payload) = if is_extended_type(frame_type) && body.len() >= 2 {
                (Some((body[0], body[1])), body[2..].to_vec())
            } else {
                (None, body.to_vec())
            };
            frames.push(CrsfFrame {
                addr: self.buf[start],
                frame_type,
                ext,
                payload,
            });
            start += total;
        }
        if start > 0 {
            self.buf.drain(..start);
        }
        frames
    }
}

impl Default for CrsfPort {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_pack_center() {
        let channels = [CRSF_CHANNEL_VALUE_MID; CRSF_NUM_CHANNELS];
        let payload = pack_channels(&channels);
        // 992 = 0b011_1110_0000: the repeating pattern starts with 0xE0.
        assert_eq!(payload[0], 0xE0);
        assert_eq!(unpack_channels(&payload), channels);
    }

    #[test]
    fn test_channels_frame_round_trip() {
        let channels = [CRSF_CHANNEL_VALUE_MID; CRSF_NUM_CHANNELS];
        let frame = CrsfFrame::new(
            addr::FLIGHT_CONTROLLER,
            CrsfFrameType::RcChannelsPacked,
            pack_channels(&channels).to_vec(),
        );
        let bytes = frame.to_bytes();
        assert_eq!(bytes[0], 0xC8);
        assert_eq!(bytes[1], 24);
        assert_eq!(bytes[2], 0x16);
        let expected_crc = crc8_dvb_s2_bytes(&bytes[2..bytes.len() - 1]);
        assert_eq!(*bytes.last().unwrap(), expected_crc);

        let mut port = CrsfPort::new();
        let frames = port.feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_channels().unwrap(), channels);
    }

    #[test]
    fn test_channels_distinct_values() {
        let mut channels = [0u16; CRSF_NUM_CHANNELS];
        for (i, ch) in channels.iter_mut().enumerate() {
            *ch = CRSF_CHANNEL_VALUE_MIN + (i as u16) * 100;
        }
        assert_eq!(unpack_channels(&pack_channels(&channels)), channels);
    }

    #[test]
    fn test_bad_crc_resyncs_on_following_frames() {
        let frame = CrsfFrame::new(
            addr::FLIGHT_CONTROLLER,
            CrsfFrameType::FlightMode,
            b"ACRO\0".to_vec(),
        );
        let mut bytes = frame.to_bytes();
        *bytes.last_mut().unwrap() ^= 0x01;
        // The corrupt frame costs some scan distance; the stream catches
        // up on the traffic behind it.
        let good = frame.to_bytes();
        for _ in 0..3 {
            bytes.extend_from_slice(&good);
        }

        let mut port = CrsfPort::new();
        let frames = port.feed(&bytes);
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert_eq!(frame.as_str(), Some("ACRO"));
        }
    }

    #[test]
    fn test_extended_frame_round_trip() {
        let frame = CrsfFrame::new_extended(
            addr::BROADCAST,
            CrsfFrameType::MspReq,
            addr::FLIGHT_CONTROLLER,
            addr::RADIO_TRANSMITTER,
            vec![0x30, 0x00, 0x66, 0x66, 0x00, 0x00, 0x00, 0x00],
        );
        let bytes = frame.to_bytes();
        let mut port = CrsfPort::new();
        let frames = port.feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].ext,
            Some((addr::FLIGHT_CONTROLLER, addr::RADIO_TRANSMITTER))
        );
        assert_eq!(frames[0].payload.len(), CRSF_MSP_REQ_PAYLOAD_SIZE);
    }

    #[test]
    fn test_partial_frame_buffers() {
        let frame = CrsfFrame::new(
            addr::FLIGHT_CONTROLLER,
            CrsfFrameType::Attitude,
            CrsfAttitude {
                pitch: 1000,
                roll: -1000,
                yaw: 0,
            }
            .to_payload(),
        );
        let bytes = frame.to_bytes();
        let mut port = CrsfPort::new();
        assert!(port.feed(&bytes[..4]).is_empty());
        let frames = port.feed(&bytes[4..]);
        assert_eq!(frames.len(), 1);
        let att = frames[0].as_attitude().unwrap();
        assert_eq!(att.pitch, 1000);
        assert_eq!(att.roll, -1000);
    }

    #[test]
    fn test_gps_payload_round_trip() {
        let gps = CrsfGps {
            lat: 451234567,
            lon: -93456789,
            ground_speed: 123,
            heading: 18000,
            altitude: 1250,
            sats: 11,
        };
        assert_eq!(CrsfGps::parse(&gps.to_payload()), Some(gps));
    }

    #[test]
    fn test_battery_payload_round_trip() {
        let bat = CrsfBatterySensor {
            voltage: 168,
            current: 123,
            mah_drawn: 1_000_000,
            percentage_remaining: 78,
        };
        assert_eq!(CrsfBatterySensor::parse(&bat.to_payload()), Some(bat));
    }
}
