//! # Air Stream
//!
//! A byte-stuffed pipe riding inside the variable window of every air
//! packet, multiplexing four record kinds. The top two bits of the first
//! payload byte classify a record:
//!
//! | bits | record |
//! |------|--------|
//! | `00` | full-precision channel: channel index in bits 5..2, ten value bits across two bytes |
//! | `01` | command: six-bit opcode, uvarint length for variable-size commands |
//! | `10` | telemetry: the byte is the wire telemetry id, payload follows |
//! | `11` | two-bit channel: channel index in bits 5..2, min/center/max in bits 1..0 |
//!
//! Records are separated by [`AIR_DATA_START_STOP`] markers and escaped
//! with [`AIR_DATA_BYTE_STUFF`]. The input side follows the air packet
//! sequence numbers: a gap flushes the partial record and drops sync
//! until the next marker.

use log::{debug, warn};

use crate::air::cmd::AirCmd;
use crate::air::{
    seq_next, AIR_DATA_BYTE_STUFF, AIR_DATA_START_STOP, AIR_DATA_XOR, AIR_SEQ_MASK,
};
use crate::msp::MSP_MAX_PAYLOAD_SIZE;
use crate::rc::data::{
    channel_from_air_bits, channel_to_air_bits, AIR_CHANNEL_BITS, CHANNEL_CENTER_VALUE,
    CHANNEL_MAX_VALUE, CHANNEL_MIN_VALUE, RC_CHANNELS_NUM,
};
use crate::rc::telemetry::{TelemetryId, TelemetryValue};
use crate::util::{uvarint_decode32, uvarint_encode32, RingBuffer, TimeMicros};

/// Largest logical record: an MSP payload plus direction, command and
/// length framing.
pub const AIR_STREAM_BUFFER_CAPACITY: usize = MSP_MAX_PAYLOAD_SIZE + 1 + 3 + 3;
/// Worst case all bytes arrive stuffed; markers are not buffered.
pub const AIR_STREAM_INPUT_BUFFER_CAPACITY: usize = AIR_STREAM_BUFFER_CAPACITY * 2;
/// Worst case all bytes stuffed plus a marker, with one byte left over in
/// the previous packet.
pub const AIR_STREAM_OUTPUT_BUFFER_CAPACITY: usize = AIR_STREAM_BUFFER_CAPACITY * 2 + 1 + 1;
pub const AIR_STREAM_MAX_PAYLOAD_SIZE: usize = AIR_STREAM_BUFFER_CAPACITY;

const TELEMETRY_MASK: u8 = 0x80;
const CMD_MASK: u8 = 0x40;
const FULL_CHANNEL_MASK: u8 = 0x00;
const TWO_BIT_CHANNEL_MASK: u8 = TELEMETRY_MASK | CMD_MASK;
const DATA_TYPE_MASK: u8 = TWO_BIT_CHANNEL_MASK;

/// Which half of the link this stream feeds. The transmitter sends
/// uplink records and receives downlink telemetry; the receiver does the
/// opposite and is the only side that receives channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Uplink,
    Downlink,
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum AirStreamEvent {
    Channel {
        chn: usize,
        /// Microseconds.
        value: u16,
    },
    Telemetry {
        id: TelemetryId,
        value: TelemetryValue,
    },
    Cmd {
        cmd: AirCmd,
        data: Vec<u8>,
    },
}

pub struct AirStream {
    role: StreamRole,
    input_in_sync: bool,
    input_seq: u8,
    input_buf: RingBuffer<u8>,
    output_buf: RingBuffer<u8>,
}

impl AirStream {
    pub fn new(role: StreamRole) -> Self {
        Self {
            role,
            input_in_sync: false,
            input_seq: 0,
            input_buf: RingBuffer::new(AIR_STREAM_INPUT_BUFFER_CAPACITY),
            output_buf: RingBuffer::new(AIR_STREAM_OUTPUT_BUFFER_CAPACITY),
        }
    }

    fn sends_uplink(&self) -> bool {
        self.role == StreamRole::Uplink
    }

    /// Feed the stream window of one received air packet. `seq` is the
    /// packet sequence; a gap resets the decoder.
    pub fn feed_input(
        &mut self,
        seq: u8,
        data: &[u8],
        now: TimeMicros,
    ) -> Vec<AirStreamEvent> {
        let expected = seq_next(self.input_seq);
        if expected != seq & AIR_SEQ_MASK {
            debug!(target: "air.stream", "resetting air stream sequence at {seq}");
            self.input_in_sync = false;
            self.input_buf.clear();
        }
        self.input_seq = seq & AIR_SEQ_MASK;

        let mut events = Vec::new();
        for &c in data {
            if !self.input_in_sync {
                self.input_in_sync = c == AIR_DATA_START_STOP;
                continue;
            }
            if c == AIR_DATA_START_STOP {
                if !self.input_buf.is_empty() {
                    if let Some(event) = self.decode(now) {
                        events.push(event);
                    }
                }
                continue;
            }
            self.input_buf.push(c);
        }
        events
    }

    fn decode(&mut self, _now: TimeMicros) -> Option<AirStreamEvent> {
        let mut buf = [0u8; AIR_STREAM_MAX_PAYLOAD_SIZE];
        let mut p = 0;
        while let Some(mut c) = self.input_buf.pop() {
            if c == AIR_DATA_BYTE_STUFF {
                match self.input_buf.pop() {
                    Some(next) => c = next ^ AIR_DATA_XOR,
                    None => {
                        // We missed a byte, ignore this payload.
                        self.input_buf.clear();
                        return None;
                    }
                }
            }
            if p >= buf.len() {
                // More data than any known record. A newer protocol?
                self.input_buf.clear();
                return None;
            }
            buf[p] = c;
            p += 1;
        }
        if p == 0 {
            return None;
        }
        let payload = &buf[..p];
        match payload[0] & DATA_TYPE_MASK {
            TWO_BIT_CHANNEL_MASK => self.decode_two_bit_channel(payload),
            TELEMETRY_MASK => self.decode_telemetry(payload),
            CMD_MASK => self.decode_cmd(payload),
            FULL_CHANNEL_MASK => self.decode_full_channel(payload),
            _ => unreachable!(),
        }
    }

    fn decode_two_bit_channel(&self, payload: &[u8]) -> Option<AirStreamEvent> {
        let chn = ((payload[0] & !TWO_BIT_CHANNEL_MASK) >> 2) as usize + 4;
        if chn >= RC_CHANNELS_NUM {
            return None;
        }
        let value = match payload[0] & 3 {
            0 => CHANNEL_MIN_VALUE,
            1 => CHANNEL_CENTER_VALUE,
            2 => CHANNEL_MAX_VALUE,
            _ => return None,
        };
        Some(AirStreamEvent::Channel { chn, value })
    }

    fn decode_full_channel(&self, payload: &[u8]) -> Option<AirStreamEvent> {
        if payload.len() < 2 {
            return None;
        }
        let chn = (payload[0] >> (AIR_CHANNEL_BITS - 8)) as usize + 4;
        if chn >= RC_CHANNELS_NUM {
            return None;
        }
        let air_value = (u16::from(payload[0]) << 8 | u16::from(payload[1]))
            & ((1 << AIR_CHANNEL_BITS) - 1);
        Some(AirStreamEvent::Channel {
            chn,
            value: channel_from_air_bits(air_value, AIR_CHANNEL_BITS),
        })
    }

    fn decode_telemetry(&self, payload: &[u8]) -> Option<AirStreamEvent> {
        let mut wire_id = payload[0];
        if self.sends_uplink() {
            // We send uplink, so what arrives is downlink telemetry and
            // its real id has the mask cleared.
            wire_id &= !TELEMETRY_MASK;
        }
        let id = match TelemetryId::from_wire_id(wire_id) {
            Some(id) => id,
            None => {
                warn!(target: "air.stream", "unknown telemetry id 0x{wire_id:02x}");
                return None;
            }
        };
        let data = &payload[1..];
        let expected = id.data_size();
        if expected == 0 {
            // Variable size, must be zero terminated.
            if data.last() != Some(&0) {
                warn!(
                    target: "air.stream",
                    "discarding variable sized telemetry data, not zero terminated"
                );
                return None;
            }
        } else if expected != data.len() {
            warn!(
                target: "air.stream",
                "discarding fixed sized telemetry data (id = {}), expected {expected} != {} actual",
                id.wire_id(),
                data.len()
            );
            return None;
        }
        let value = TelemetryValue::from_wire(id.telemetry_type(), data)?;
        Some(AirStreamEvent::Telemetry { id, value })
    }

    fn decode_cmd(&self, payload: &[u8]) -> Option<AirStreamEvent> {
        let op = payload[0] & !CMD_MASK;
        let cmd = match AirCmd::from_u8(op) {
            Some(cmd) => cmd,
            None => {
                warn!(target: "air.stream", "discarding unknown CMD {op}");
                return None;
            }
        };
        let mut data = &payload[1..];
        let expected = match cmd.size() {
            Some(fixed) => fixed,
            None => {
                let (explicit, used) = match uvarint_decode32(data) {
                    Ok(v) => v,
                    Err(_) => {
                        warn!(
                            target: "air.stream",
                            "invalid uvarint in encoded variable size command"
                        );
                        return None;
                    }
                };
                data = &data[used..];
                explicit as usize
            }
        };
        if expected != data.len() {
            warn!(
                target: "air.stream",
                "invalid command size {}, expecting {expected}",
                data.len()
            );
            return None;
        }
        Some(AirStreamEvent::Cmd {
            cmd,
            data: data.to_vec(),
        })
    }

    /// Escape-encode `data` into the output ring. Returns the bytes
    /// written, escapes included.
    fn feed_output(&mut self, data: &[u8]) -> usize {
        let mut n = 0;
        for &b in data {
            let mut c = b;
            if c == AIR_DATA_START_STOP || c == AIR_DATA_BYTE_STUFF {
                self.output_buf.push(AIR_DATA_BYTE_STUFF);
                c ^= AIR_DATA_XOR;
                n += 1;
            }
            self.output_buf.push(c);
            n += 1;
        }
        n
    }

    /// Queue a channel update. Channels at exactly min, center or max use
    /// the compact two-bit record.
    pub fn feed_output_channel(&mut self, chn: usize, value: u16) -> usize {
        assert!((4..20).contains(&chn), "stream channels start at four");
        let n = (chn - 4) as u8;
        self.output_buf.push(AIR_DATA_START_STOP);
        let mut buf = [0u8; 2];
        let record = match value {
            CHANNEL_MIN_VALUE => {
                buf[0] = TWO_BIT_CHANNEL_MASK | (n << 2);
                &buf[..1]
            }
            CHANNEL_CENTER_VALUE => {
                buf[0] = TWO_BIT_CHANNEL_MASK | (n << 2) | 1;
                &buf[..1]
            }
            CHANNEL_MAX_VALUE => {
                buf[0] = TWO_BIT_CHANNEL_MASK | (n << 2) | 2;
                &buf[..1]
            }
            _ => {
                let air_value = channel_to_air_bits(value, AIR_CHANNEL_BITS);
                buf[0] = (n << (AIR_CHANNEL_BITS - 8)) | (air_value >> 8) as u8;
                buf[1] = air_value as u8;
                &buf[..2]
            }
        };
        let record = record.to_owned();
        1 + self.feed_output(&record)
    }

    /// Queue an uplink telemetry value. Only valid on the uplink side.
    pub fn feed_output_uplink_telemetry(
        &mut self,
        id: TelemetryId,
        value: &TelemetryValue,
    ) -> usize {
        assert!(self.sends_uplink());
        debug_assert!(id.is_uplink());
        // Uplink ids carry the mask already, the wire id is the id.
        self.feed_output_telemetry(id.wire_id(), value)
    }

    /// Queue a downlink telemetry value. Only valid on the downlink side.
    pub fn feed_output_downlink_telemetry(
        &mut self,
        id: TelemetryId,
        value: &TelemetryValue,
    ) -> usize {
        assert!(!self.sends_uplink());
        debug_assert!(id.is_downlink());
        self.feed_output_telemetry(id.wire_id() | TELEMETRY_MASK, value)
    }

    fn feed_output_telemetry(&mut self, wire_id: u8, value: &TelemetryValue) -> usize {
        self.output_buf.push(AIR_DATA_START_STOP);
        let mut n = self.feed_output(&[wire_id]);
        n += self.feed_output(&value.to_wire());
        1 + n
    }

    /// Queue a command. Variable-size commands get a uvarint length.
    pub fn feed_output_cmd(&mut self, cmd: AirCmd, data: &[u8]) -> usize {
        self.output_buf.push(AIR_DATA_START_STOP);
        let mut n = self.feed_output(&[cmd as u8 | CMD_MASK]);
        if cmd.size().is_none() {
            let mut size_buf = [0u8; 5];
            let used = uvarint_encode32(&mut size_buf, data.len() as u32)
                .expect("five bytes always fit a u32");
            n += self.feed_output(&size_buf[..used]);
        }
        n += self.feed_output(data);
        1 + n
    }

    pub fn output_count(&self) -> usize {
        self.output_buf.len()
    }

    /// Drop all queued output. Used before sending urgent data.
    pub fn reset_output(&mut self) {
        self.output_buf.clear();
    }

    /// Pull one byte for the current packet's stream window.
    pub fn pop_output(&mut self) -> Option<u8> {
        self.output_buf.pop()
    }

    /// Fill `buf` from the output ring, returning the bytes written.
    pub fn pop_output_into(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.pop_output() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}
