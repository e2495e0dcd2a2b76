//! # FPort Framing
//!
//! FPort multiplexes SBUS control data and SmartPort telemetry over one
//! inverted 115200 bps line. Frames are delimited by 0x7E markers:
//! `0x7E, LEN+1, TYPE, DATA[LEN], CRC, 0x7E`, with 0x7E and 0x7D inside
//! the frame escaped as `0x7D, byte ^ 0x20`. The checksum is
//! `0xFF - sum-with-carry-fold` over length, type and data.
//!
//! The master sends a control frame (SBUS channels + one RSSI byte) and
//! an empty telemetry request each control tick; the FC answers the
//! request with a telemetry response wrapping one SmartPort payload.

use log::warn;

use crate::protocols::sbus::SbusData;
use crate::protocols::smartport::SmartportPayload;

pub const FPORT_BAUDRATE: u32 = 115_200;
pub const FPORT_FRAME_MARKER: u8 = 0x7E;
pub const FPORT_ESCAPE_CHAR: u8 = 0x7D;
pub const FPORT_ESCAPE_MASK: u8 = 0x20;
pub const FPORT_CRC_VALUE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FportFrameType {
    /// SBUS channels + RSSI, master to slave.
    Control = 0x00,
    /// Empty request, master to slave.
    TelemetryRequest = 0x01,
    /// SmartPort payload, slave to master.
    TelemetryResponse = 0x81,
}

impl FportFrameType {
    pub fn from_u8(t: u8) -> Option<Self> {
        match t {
            0x00 => Some(FportFrameType::Control),
            0x01 => Some(FportFrameType::TelemetryRequest),
            0x81 => Some(FportFrameType::TelemetryResponse),
            _ => None,
        }
    }
}

fn checksum_from_sum(sum: u16) -> u8 {
    FPORT_CRC_VALUE.wrapping_sub(((sum & 0xFF) + (sum >> 8)) as u8)
}

/// Checksum over length, type and data bytes.
pub fn fport_checksum(data: &[u8]) -> u8 {
    checksum_from_sum(data.iter().map(|&b| u16::from(b)).sum())
}

fn push_escaped(out: &mut Vec<u8>, b: u8) {
    if b == FPORT_FRAME_MARKER || b == FPORT_ESCAPE_CHAR {
        out.push(FPORT_ESCAPE_CHAR);
        out.push(b ^ FPORT_ESCAPE_MASK);
    } else {
        out.push(b);
    }
}

/// Build one escape-encoded FPort frame.
pub fn write_frame(frame_type: FportFrameType, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2 + 6);
    out.push(FPORT_FRAME_MARKER);
    let mut sum: u16 = 0;
    let len = (data.len() + 1) as u8;
    sum += u16::from(len);
    push_escaped(&mut out, len);
    sum += u16::from(frame_type as u8);
    push_escaped(&mut out, frame_type as u8);
    for &b in data {
        sum += u16::from(b);
        push_escaped(&mut out, b);
    }
    push_escaped(&mut out, checksum_from_sum(sum));
    out.push(FPORT_FRAME_MARKER);
    out
}

/// Control frame payload: SBUS channel block + RSSI percentage.
pub fn write_control_frame(sbus: &SbusData, rssi: u8) -> Vec<u8> {
    let mut data = sbus.to_bytes().to_vec();
    data.push(rssi);
    write_frame(FportFrameType::Control, &data)
}

/// Telemetry request: the FC only checks the type, the payload is an
/// empty SmartPort shape.
pub fn write_telemetry_request() -> Vec<u8> {
    let payload = SmartportPayload {
        frame_id: 0,
        value_id: 0,
        data: 0,
    };
    write_frame(FportFrameType::TelemetryRequest, &payload.to_bytes())
}

/// One validated inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FportFrame {
    pub frame_type: u8,
    pub data: Vec<u8>,
}

impl FportFrame {
    pub fn smartport_payload(&self) -> Option<SmartportPayload> {
        SmartportPayload::from_bytes(&self.data)
    }
}

/// Streaming decoder for the slave's half of the line: collects bytes
/// between markers, unescapes them and validates the checksum.
pub struct FportReader {
    buf: Vec<u8>,
    in_frame: bool,
    escaping: bool,
}

const FPORT_MAX_FRAME_SIZE: usize = 64;

impl FportReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FPORT_MAX_FRAME_SIZE),
            in_frame: false,
            escaping: false,
        }
    }

    /// Feed wire bytes, returning every complete valid frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<FportFrame> {
        let mut frames = Vec::new();
        for &b in bytes {
            if b == FPORT_FRAME_MARKER {
                if self.in_frame && !self.buf.is_empty() {
                    if let Some(frame) = self.finish_frame() {
                        frames.push(frame);
                    }
                }
                // A marker both ends one frame and starts the next.
                self.buf.clear();
                self.in_frame = true;
                self.escaping = false;
                continue;
            }
            if !self.in_frame {
                continue;
            }
            let b = if self.escaping {
                self.escaping = false;
                b ^ FPORT_ESCAPE_MASK
            } else if b == FPORT_ESCAPE_CHAR {
                self.escaping = true;
                continue;
            } else {
                b
            };
            if self.buf.len() >= FPORT_MAX_FRAME_SIZE {
                // Runaway frame, drop it and resync on the next marker.
                self.buf.clear();
                self.in_frame = false;
                continue;
            }
            self.buf.push(b);
        }
        frames
    }

    fn finish_frame(&mut self) -> Option<FportFrame> {
        // LEN+1, TYPE, DATA[LEN-1], CRC.
        if self.buf.len() < 3 {
            return None;
        }
        let len = self.buf[0] as usize;
        if self.buf.len() != len + 2 {
            warn!(
                target: "fport",
                "frame length mismatch: length byte {len}, got {} bytes",
                self.buf.len()
            );
            return None;
        }
        let crc = *self.buf.last().unwrap();
        let expected = fport_checksum(&self.buf[..self.buf.len() - 1]);
        if crc != expected {
            warn!(
                target: "fport",
                "invalid checksum 0x{crc:02x}, expecting 0x{expected:02x}"
            );
            return None;
        }
        Some(FportFrame {
            frame_type: self.buf[1],
            data: self.buf[2..self.buf.len() - 1].to_vec(),
        })
    }
}

impl Default for FportReader {
    fn default() -> Self {
        Self::new()
    }
}
