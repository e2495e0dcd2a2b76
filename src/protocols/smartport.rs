//! # SmartPort Master
//!
//! FrSky S.Port is a half-duplex one-wire bus at 57600 bps. The master
//! polls one of 28 sensor IDs roughly every 11 ms by writing
//! `0x7E, sensor_id`; a present sensor answers with an 8-byte payload
//! `{frame_id, value_id, data, crc}` where 0x7E and 0x7D inside the
//! payload are escaped as `0x7D, byte ^ 0x20`.
//!
//! Once at least one sensor answered, polling alternates between the
//! found and the not-yet-found lists so discovery keeps running without
//! starving live sensors. Queued MSP chunks preempt the poll for their
//! tick, riding on sensor 0x0D.

use log::{debug, warn};

use crate::msp::MspTelemetry;
use crate::rc::telemetry::{TelemetryId, TelemetryValue};
use crate::util::{TimeMicros, MICROS_PER_MILLI};

pub const SMARTPORT_BAUDRATE: u32 = 57_600;
pub const SMARTPORT_START_STOP: u8 = 0x7E;
pub const SMARTPORT_BYTE_STUFF: u8 = 0x7D;
pub const SMARTPORT_XOR: u8 = 0x20;

pub const SMARTPORT_SENSOR_ID_COUNT: usize = 28;
pub const SMARTPORT_POLL_INTERVAL: TimeMicros = 11 * MICROS_PER_MILLI;

pub const SMARTPORT_DATA_FRAME_ID: u8 = 0x10;
pub const SMARTPORT_MSP_SENSOR_ID: u8 = 0x0D;
pub const SMARTPORT_MSP_CLIENT_FRAME_ID: u8 = 0x30;
pub const SMARTPORT_MSP_SERVER_FRAME_ID: u8 = 0x32;
pub const SMARTPORT_MSP_PAYLOAD_CHUNK_SIZE: usize = 6;

/// The 28 valid S.Port sensor IDs, in polling order. Betaflight and INAV
/// only answer the last one (0x1B) but rotate packet types per poll.
pub const SMARTPORT_SENSOR_IDS: [u8; SMARTPORT_SENSOR_ID_COUNT] = [
    0x00, // 01: Vari-H (altimeter high precision)
    0xA1, // 02: FLVSS / MLVSS (LiPo)
    0x22, // 03: FAS (current)
    0x83, // 04: GPS / Vari-N (altimeter normal precision)
    0xE4, // 05: RPM
    0x45, // 06: SP2UH
    0xC6, // 07: SP2UR
    0x67, 0x48, //
    0xE9, // 10: ASS (air speed)
    0x6A, 0xCB, 0xAC, 0x0D, 0x8E, 0x2F, 0xD0, 0x71, 0xF2, 0x53, 0x34, 0x95, 0x16, 0xB7, //
    0x98, // 25: RX / TX internal telemetry
    0x39, // 26: PowerBox
    0xBA, //
    0x1B, // 28: used by betaflight and inav
];

mod value_id {
    pub const SPEED: u16 = 0x0830;
    pub const VFAS: u16 = 0x0210;
    pub const CURRENT: u16 = 0x0200;
    pub const ALTITUDE: u16 = 0x0100;
    pub const FUEL: u16 = 0x0600;
    pub const VARIO: u16 = 0x0110;
    pub const HEADING: u16 = 0x0840;
    pub const ACCX: u16 = 0x0700;
    pub const ACCY: u16 = 0x0710;
    pub const ACCZ: u16 = 0x0720;
    pub const A4: u16 = 0x0910;
}

/// Decoded 7-byte S.Port payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmartportPayload {
    pub frame_id: u8,
    pub value_id: u16,
    pub data: u32,
}

impl SmartportPayload {
    pub const WIRE_SIZE: usize = 7;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0] = self.frame_id;
        out[1..3].copy_from_slice(&self.value_id.to_le_bytes());
        out[3..7].copy_from_slice(&self.data.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            frame_id: bytes[0],
            value_id: u16::from_le_bytes(bytes[1..3].try_into().unwrap()),
            data: u32::from_le_bytes(bytes[3..7].try_into().unwrap()),
        })
    }

    /// `0xFF - sum-with-carry-fold` over the payload bytes.
    pub fn checksum(&self) -> u8 {
        let bytes = self.to_bytes();
        let sum: u16 = bytes.iter().map(|&b| u16::from(b)).sum();
        0xFFu8.wrapping_sub(((sum & 0xFF) + (sum >> 8)) as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Incomplete,
    ByteStuff,
    Checksum,
    Invalid,
    Complete,
}

/// Escape-decoding accumulator for one inbound payload.
struct PayloadFrame {
    bytes: [u8; SmartportPayload::WIRE_SIZE],
    pos: usize,
    state: FrameState,
}

impl PayloadFrame {
    fn new() -> Self {
        Self {
            bytes: [0; SmartportPayload::WIRE_SIZE],
            pos: 0,
            state: FrameState::Incomplete,
        }
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.state = FrameState::Incomplete;
    }

    fn append(&mut self, mut c: u8) {
        match self.state {
            FrameState::Incomplete => {
                if c == SMARTPORT_START_STOP || c == SMARTPORT_BYTE_STUFF {
                    self.state = FrameState::ByteStuff;
                    return;
                }
            }
            FrameState::ByteStuff => {
                c ^= SMARTPORT_XOR;
                self.state = FrameState::Incomplete;
            }
            FrameState::Checksum => {
                let payload = SmartportPayload::from_bytes(&self.bytes).unwrap();
                let checksum = payload.checksum();
                if checksum == c {
                    self.state = FrameState::Complete;
                } else {
                    warn!(
                        target: "smartport",
                        "invalid checksum: expect 0x{checksum:02x} got 0x{c:02x}"
                    );
                    self.state = FrameState::Invalid;
                }
                return;
            }
            FrameState::Invalid | FrameState::Complete => return,
        }
        self.bytes[self.pos] = c;
        self.pos += 1;
        if self.pos == SmartportPayload::WIRE_SIZE {
            self.state = FrameState::Checksum;
        }
    }
}

/// Polling S.Port master. Inbound bytes go through [`feed`](Self::feed),
/// outbound poll/MSP frames come from [`update`](Self::update).
pub struct SmartportMaster {
    next_poll: TimeMicros,
    last_polled: usize,
    last_found_polled: usize,
    found: [bool; SMARTPORT_SENSOR_ID_COUNT],
    found_count: usize,
    last_poll_from_found: bool,
    frame: PayloadFrame,
    payload_ready: bool,
    msp_telemetry: MspTelemetry,
}

impl SmartportMaster {
    pub fn new() -> Self {
        Self {
            next_poll: 0,
            // Start the rotation at index zero.
            last_polled: SMARTPORT_SENSOR_ID_COUNT - 1,
            last_found_polled: SMARTPORT_SENSOR_ID_COUNT - 1,
            found: [false; SMARTPORT_SENSOR_ID_COUNT],
            found_count: 0,
            last_poll_from_found: false,
            frame: PayloadFrame::new(),
            payload_ready: false,
            msp_telemetry: MspTelemetry::output(SMARTPORT_MSP_PAYLOAD_CHUNK_SIZE),
        }
    }

    /// The MSP-over-telemetry transport riding on this bus.
    pub fn msp(&mut self) -> &mut MspTelemetry {
        &mut self.msp_telemetry
    }

    /// Feed reply bytes from the wire. Returns decoded telemetry values.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<(TelemetryId, TelemetryValue)> {
        let mut out = Vec::new();
        for &b in bytes {
            self.frame.append(b);
            if self.frame.state == FrameState::Complete {
                let payload = SmartportPayload::from_bytes(&self.frame.bytes).unwrap();
                debug!(
                    target: "smartport",
                    "got S.Port payload, value ID 0x{:04x}", payload.value_id
                );
                if let Some(update) = self.decode_payload(&payload) {
                    out.push(update);
                }
                if !self.last_poll_from_found && !self.found[self.last_polled] {
                    self.found[self.last_polled] = true;
                    self.found_count += 1;
                    self.last_poll_from_found = true;
                }
                self.payload_ready = true;
                self.frame.reset();
            }
        }
        out
    }

    /// Run the polling schedule. Returns the bytes to put on the wire for
    /// this tick, if it is time to send.
    pub fn update(&mut self, now: TimeMicros) -> Option<Vec<u8>> {
        if !self.payload_ready && self.next_poll > now {
            return None;
        }
        self.payload_ready = false;
        self.frame.reset();
        self.next_poll = now + SMARTPORT_POLL_INTERVAL;

        let mut chunk = [0u8; SMARTPORT_MSP_PAYLOAD_CHUNK_SIZE + 2];
        let chunk_size = self.msp_telemetry.pop_request_chunk(&mut chunk, now);
        if chunk_size > 0 {
            Some(self.encode_msp_chunk(&chunk[..chunk_size]))
        } else {
            Some(self.poll())
        }
    }

    fn poll(&mut self) -> Vec<u8> {
        let sensor_id;
        if self.found_count < SMARTPORT_SENSOR_ID_COUNT
            && (self.last_poll_from_found || self.found_count == 0)
        {
            // Nothing found yet, or the last poll hit the found list: poll
            // from the not-found list.
            let mut pos = (self.last_polled + 1) % SMARTPORT_SENSOR_ID_COUNT;
            while self.found[pos] {
                pos = (pos + 1) % SMARTPORT_SENSOR_ID_COUNT;
            }
            sensor_id = SMARTPORT_SENSOR_IDS[pos];
            self.last_polled = pos;
            self.last_poll_from_found = false;
        } else {
            let mut pos = (self.last_found_polled + 1) % SMARTPORT_SENSOR_ID_COUNT;
            while !self.found[pos] {
                pos = (pos + 1) % SMARTPORT_SENSOR_ID_COUNT;
            }
            sensor_id = SMARTPORT_SENSOR_IDS[pos];
            self.last_found_polled = pos;
            self.last_poll_from_found = true;
        }
        debug!(target: "smartport", "will poll sensor id 0x{sensor_id:X}");
        vec![SMARTPORT_START_STOP, sensor_id]
    }

    fn encode_msp_chunk(&self, chunk: &[u8]) -> Vec<u8> {
        let mut data = [0u8; SMARTPORT_MSP_PAYLOAD_CHUNK_SIZE];
        data[..chunk.len()].copy_from_slice(chunk);

        let mut out = Vec::with_capacity(SMARTPORT_MSP_PAYLOAD_CHUNK_SIZE * 2 + 4);
        out.push(SMARTPORT_START_STOP);
        out.push(SMARTPORT_MSP_SENSOR_ID);
        let mut checksum: u16 = 0;
        let mut push_escaped = |out: &mut Vec<u8>, mut c: u8| {
            checksum += u16::from(c);
            checksum += checksum >> 8;
            checksum &= 0x00FF;
            if c == SMARTPORT_START_STOP || c == SMARTPORT_BYTE_STUFF {
                out.push(SMARTPORT_BYTE_STUFF);
                c ^= SMARTPORT_XOR;
            }
            out.push(c);
        };
        push_escaped(&mut out, SMARTPORT_MSP_CLIENT_FRAME_ID);
        for &b in &data {
            push_escaped(&mut out, b);
        }
        let crc = 0xFFu8.wrapping_sub(checksum as u8);
        out.push(crc);
        out
    }

    /// Decode one complete payload. Also used by the FPort output, which
    /// receives S.Port payloads inside its own framing.
    pub fn decode_payload(
        &mut self,
        payload: &SmartportPayload,
    ) -> Option<(TelemetryId, TelemetryValue)> {
        match payload.frame_id {
            SMARTPORT_DATA_FRAME_ID => self.decode_data_payload(payload),
            SMARTPORT_MSP_SERVER_FRAME_ID => {
                let bytes = payload.to_bytes();
                self.msp_telemetry.push_response_chunk(&bytes[1..]);
                None
            }
            other => {
                warn!(target: "smartport", "unknown frame ID 0x{other:x}");
                None
            }
        }
    }

    fn decode_data_payload(
        &self,
        payload: &SmartportPayload,
    ) -> Option<(TelemetryId, TelemetryValue)> {
        let data = payload.data;
        let update = match payload.value_id {
            value_id::SPEED => {
                // Comes in knots / 1000, we want cm/s.
                (
                    TelemetryId::GpsSpeed,
                    TelemetryValue::U16((data.wrapping_mul(100) / 1944) as u16),
                )
            }
            value_id::VFAS => {
                // Comes in 0.1 V, we want 0.01 V.
                (
                    TelemetryId::BatVoltage,
                    TelemetryValue::U16(data.wrapping_mul(10) as u16),
                )
            }
            value_id::CURRENT => (
                TelemetryId::Current,
                TelemetryValue::I16((data as i32).wrapping_mul(10) as i16),
            ),
            value_id::ALTITUDE => (TelemetryId::Altitude, TelemetryValue::I32(data as i32)),
            value_id::FUEL => (TelemetryId::CurrentDrawn, TelemetryValue::I32(data as i32)),
            value_id::VARIO => (
                TelemetryId::VerticalSpeed,
                TelemetryValue::I16(data as i32 as i16),
            ),
            value_id::HEADING => (
                TelemetryId::Heading,
                TelemetryValue::U16((data / 10 + 180) as u16),
            ),
            value_id::ACCX => (TelemetryId::AccX, TelemetryValue::I32(data as i32)),
            value_id::ACCY => (TelemetryId::AccY, TelemetryValue::I32(data as i32)),
            value_id::ACCZ => (TelemetryId::AccZ, TelemetryValue::I32(data as i32)),
            value_id::A4 => (TelemetryId::AvgCellVoltage, TelemetryValue::U16(data as u16)),
            other => {
                warn!(target: "smartport", "unknown S.Port value ID 0x{other:04x}");
                return None;
            }
        };
        Some(update)
    }

    pub fn found_count(&self) -> usize {
        self.found_count
    }
}

impl Default for SmartportMaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msp::{MspDirection, MspTransport};

    #[test]
    fn test_poll_cadence() {
        let mut sp = SmartportMaster::new();
        assert_eq!(sp.update(0), Some(vec![SMARTPORT_START_STOP, 0x00]));
        // Not due yet.
        assert_eq!(sp.update(5 * MICROS_PER_MILLI), None);
        assert_eq!(
            sp.update(11 * MICROS_PER_MILLI),
            Some(vec![SMARTPORT_START_STOP, 0xA1])
        );
        assert_eq!(
            sp.update(22 * MICROS_PER_MILLI),
            Some(vec![SMARTPORT_START_STOP, 0x22])
        );
    }

    fn reply_bytes(payload: SmartportPayload) -> Vec<u8> {
        let mut out = Vec::new();
        for b in payload.to_bytes() {
            if b == SMARTPORT_START_STOP || b == SMARTPORT_BYTE_STUFF {
                out.push(SMARTPORT_BYTE_STUFF);
                out.push(b ^ SMARTPORT_XOR);
            } else {
                out.push(b);
            }
        }
        out.push(payload.checksum());
        out
    }

    #[test]
    fn test_sensor_discovery_alternates() {
        let mut sp = SmartportMaster::new();
        sp.update(0);
        // The polled sensor answers with a VFAS reading: 168 -> 16.80 V.
        let updates = sp.feed(&reply_bytes(SmartportPayload {
            frame_id: SMARTPORT_DATA_FRAME_ID,
            value_id: 0x0210,
            data: 168,
        }));
        assert_eq!(
            updates,
            vec![(TelemetryId::BatVoltage, TelemetryValue::U16(1680))]
        );
        assert_eq!(sp.found_count(), 1);
        // With a payload received, the next update sends immediately and
        // alternates to the not-found list.
        let next = sp.update(1_000).unwrap();
        assert_eq!(next[0], SMARTPORT_START_STOP);
        assert_eq!(next[1], 0xA1);
        // And the one after that polls the found sensor again.
        let next = sp.update(12_000).unwrap();
        assert_eq!(next[1], 0x00);
    }

    #[test]
    fn test_escaped_reply_decodes() {
        let mut sp = SmartportMaster::new();
        sp.update(0);
        // 0x7E in the data forces escaping on the wire.
        let payload = SmartportPayload {
            frame_id: SMARTPORT_DATA_FRAME_ID,
            value_id: 0x0100,
            data: 0x7E7D,
        };
        let wire = reply_bytes(payload);
        assert!(wire.len() > SmartportPayload::WIRE_SIZE + 1);
        let updates = sp.feed(&wire);
        assert_eq!(
            updates,
            vec![(TelemetryId::Altitude, TelemetryValue::I32(0x7E7D))]
        );
    }

    #[test]
    fn test_msp_chunk_preempts_poll() {
        let mut sp = SmartportMaster::new();
        sp.msp()
            .write(MspDirection::ToFc, crate::msp::MSP_RAW_IMU, &[])
            .unwrap();
        let wire = sp.update(0).unwrap();
        assert_eq!(wire[0], SMARTPORT_START_STOP);
        assert_eq!(wire[1], SMARTPORT_MSP_SENSOR_ID);
        assert_eq!(wire[2], SMARTPORT_MSP_CLIENT_FRAME_ID);
        // seq 0, start, version 1 header followed by size/cmd/crc.
        assert_eq!(&wire[3..7], &[0x30, 0x00, 0x66, 0x66]);
        // Back to plain polling on the next tick.
        let wire = sp.update(SMARTPORT_POLL_INTERVAL).unwrap();
        assert_eq!(wire.len(), 2);
    }

    #[test]
    fn test_heading_conversion() {
        let mut sp = SmartportMaster::new();
        sp.update(0);
        let updates = sp.feed(&reply_bytes(SmartportPayload {
            frame_id: SMARTPORT_DATA_FRAME_ID,
            value_id: 0x0840,
            data: 12000,
        }));
        assert_eq!(
            updates,
            vec![(TelemetryId::Heading, TelemetryValue::U16(1380))]
        );
    }
}
