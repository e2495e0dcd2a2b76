//! # MSP over Telemetry
//!
//! Splits MSP messages into chunks small enough to ride in S.Port, CRSF or
//! FPort telemetry slots and reassembles them on the other end. One
//! message is in flight at a time per direction.
//!
//! Request chunks carry `{seq:4, start:1, version:3}` in their first byte;
//! the first chunk continues with the payload size and the command.
//! Response chunks carry `{seq:4, start:1, error:1, reserved:2}` and omit
//! the command byte, so the transport remembers the command of the request
//! it is answering. Both directions end with an XOR checksum folded over
//! size, command and payload.
//!
//! A transport runs in one of two roles:
//! - **input**: facing the handset/radio carrier, reassembling requests
//!   and chunking responses.
//! - **output**: facing the FC carrier, chunking requests and reassembling
//!   responses.

use log::{debug, warn};

use crate::msp::{MspDirection, MspError, MspPacket, MspTransport};
use crate::util::{crc_xor, RingBuffer, TimeMicros, MICROS_PER_MILLI};

pub const MSP_TELEMETRY_QUEUE_SIZE: usize = 512;
pub const MSP_TELEMETRY_MSP_VERSION: u8 = 1;

/// An in-flight transfer older than this is reclaimed by the next start
/// chunk.
pub const MSP_TELEMETRY_TIMEOUT: TimeMicros = 1_000 * MICROS_PER_MILLI;

const SEQ_MASK: u8 = 0x0F;
const START_BIT: u8 = 1 << 4;
const REQ_VERSION_SHIFT: u8 = 5;
const RESP_ERROR_BIT: u8 = 1 << 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Input,
    Output,
}

pub struct MspTelemetry {
    role: Role,
    req: RingBuffer<u8>,
    resp: RingBuffer<u8>,
    /// Complete messages waiting in the ingress ring.
    count: usize,
    /// Maximum chunk size (header byte included) asked by the carrier.
    max_size: usize,
    /// Command of the request in flight. Zero is a valid MSP command, so
    /// the in-use state lives in `in_use_since`.
    cmd: u8,
    in_use_since: TimeMicros,
    req_seq: u8,
    resp_seq: u8,
    /// Expected total bytes of the message being reassembled.
    size: usize,
    /// Bytes of it received so far.
    recv: usize,
}

impl MspTelemetry {
    /// Input role: reassemble requests, chunk responses.
    pub fn input(max_resp_chunk_size: usize) -> Self {
        Self::new(Role::Input, max_resp_chunk_size)
    }

    /// Output role: chunk requests, reassemble responses.
    pub fn output(max_req_chunk_size: usize) -> Self {
        Self::new(Role::Output, max_req_chunk_size)
    }

    fn new(role: Role, max_size: usize) -> Self {
        assert!(max_size >= 4, "chunk size cannot fit the message framing");
        Self {
            role,
            req: RingBuffer::new(MSP_TELEMETRY_QUEUE_SIZE),
            resp: RingBuffer::new(MSP_TELEMETRY_QUEUE_SIZE),
            count: 0,
            max_size,
            cmd: 0,
            in_use_since: 0,
            req_seq: 0,
            resp_seq: 0,
            size: 0,
            recv: 0,
        }
    }

    fn max_chunk_data_size(&self) -> usize {
        self.max_size - 1
    }

    fn in_use(&self, now: TimeMicros) -> bool {
        self.in_use_since > 0 && now.saturating_sub(self.in_use_since) <= MSP_TELEMETRY_TIMEOUT
    }

    /// Feed one request chunk received from the carrier (input role).
    pub fn push_request_chunk(&mut self, payload: &[u8], now: TimeMicros) -> bool {
        debug_assert_eq!(self.role, Role::Input);
        if payload.is_empty() {
            return false;
        }
        let header = payload[0];
        if header >> REQ_VERSION_SHIFT != MSP_TELEMETRY_MSP_VERSION {
            return false;
        }
        let seq = header & SEQ_MASK;
        let start = header & START_BIT != 0;
        let data = &payload[1..];

        let chunk_payload;
        if start {
            if self.in_use(now) {
                warn!(target: "msp.telemetry", "request chunk with request in flight");
                return false;
            }
            if self.in_use_since > 0 {
                // Reclaiming a timed-out transfer: its partial bytes
                // would poison everything behind them.
                self.req.clear();
                self.count = 0;
            }
            if data.len() < 2 {
                return false;
            }
            let payload_size = data[0];
            let cmd = data[1];
            if !self.req.push(payload_size) || !self.req.push(cmd) {
                return false;
            }
            self.req_seq = seq;
            // Payload plus size, cmd and crc bytes.
            self.size = payload_size as usize + 3;
            self.recv = 2;
            chunk_payload = &data[2..];
            self.in_use_since = now;
        } else {
            self.req_seq = (self.req_seq + 1) & SEQ_MASK;
            if self.req_seq != seq {
                warn!(
                    target: "msp.telemetry",
                    "MSP request with invalid seq, expected {} but got {seq}", self.req_seq
                );
                self.req.clear();
                self.count = 0;
                return false;
            }
            chunk_payload = data;
        }

        let data_size = chunk_payload.len().min(self.size - self.recv);
        for &b in &chunk_payload[..data_size] {
            self.req.push(b);
        }
        self.recv += data_size;
        if self.size == self.recv {
            self.in_use_since = 0;
            self.count += 1;
            debug!(target: "msp.telemetry", "MSP req complete");
        }
        true
    }

    /// Pop the next response chunk to hand to the carrier (input role).
    /// Returns the number of bytes written into `buf`, zero when idle.
    pub fn pop_response_chunk(&mut self, buf: &mut [u8]) -> usize {
        debug_assert_eq!(self.role, Role::Input);
        let (start, size) = match self.pop_chunk_header(false) {
            Some(h) => h,
            None => return 0,
        };
        buf[0] = (self.resp_seq & SEQ_MASK) | if start { START_BIT } else { 0 };
        self.resp_seq = (self.resp_seq + 1) & SEQ_MASK;
        for i in 0..size {
            match self.resp.pop() {
                Some(b) => buf[1 + i] = b,
                None => return 0,
            }
        }
        // Padding is added by the carrier when required.
        size + 1
    }

    /// Feed one response chunk received from the carrier (output role).
    pub fn push_response_chunk(&mut self, payload: &[u8]) -> bool {
        debug_assert_eq!(self.role, Role::Output);
        if payload.is_empty() {
            return false;
        }
        let header = payload[0];
        let seq = header & SEQ_MASK;
        let start = header & START_BIT != 0;
        let error = header & RESP_ERROR_BIT != 0;
        debug!(
            target: "msp.telemetry",
            "got chunk {} bytes (error: {error}, start: {start})",
            payload.len()
        );
        if error {
            warn!(target: "msp.telemetry", "MSP reply with error flag");
            self.in_use_since = 0;
            return false;
        }
        let mut data = &payload[1..];
        if start {
            if data.is_empty() {
                return false;
            }
            self.resp_seq = seq;
            let payload_size = data[0];
            if !self.resp.push(payload_size) || !self.resp.push(self.cmd) {
                return false;
            }
            // Expect the payload plus the trailing checksum.
            self.size = payload_size as usize + 1;
            self.recv = 0;
            debug!(target: "msp.telemetry", "expecting response of size {}", self.size);
            data = &data[1..];
        } else {
            self.resp_seq = (self.resp_seq + 1) & SEQ_MASK;
            if self.resp_seq != seq {
                warn!(
                    target: "msp.telemetry",
                    "MSP response with invalid seq, expected {} but got {seq}", self.resp_seq
                );
                self.in_use_since = 0;
                return false;
            }
        }
        for &b in data {
            if self.recv >= self.size {
                break;
            }
            self.resp.push(b);
            self.recv += 1;
        }
        if self.recv == self.size {
            self.in_use_since = 0;
            self.count += 1;
            debug!(target: "msp.telemetry", "MSP resp complete");
        }
        true
    }

    /// Pop the next request chunk to hand to the carrier (output role).
    /// Returns the number of bytes written into `buf`, zero when idle or
    /// while an earlier request is still in flight.
    pub fn pop_request_chunk(&mut self, buf: &mut [u8], now: TimeMicros) -> usize {
        debug_assert_eq!(self.role, Role::Output);
        if self.next_chunk_starts() && self.in_use(now) {
            return 0;
        }
        let (start, size) = match self.pop_chunk_header(true) {
            Some(h) => h,
            None => return 0,
        };
        buf[0] = (self.req_seq & SEQ_MASK)
            | if start { START_BIT } else { 0 }
            | (MSP_TELEMETRY_MSP_VERSION << REQ_VERSION_SHIFT);
        self.req_seq = (self.req_seq + 1) & SEQ_MASK;
        for i in 0..size {
            match self.req.pop() {
                Some(b) => buf[1 + i] = b,
                None => return 0,
            }
        }
        if start {
            self.in_use_since = now;
            // First data byte is the size, the second the command.
            self.cmd = buf[2];
        }
        size + 1
    }

    fn next_chunk_starts(&self) -> bool {
        matches!(self.req.peek(), Some(&b) if b != 0)
    }

    fn pop_chunk_header(&mut self, from_req: bool) -> Option<(bool, usize)> {
        let rb = if from_req { &mut self.req } else { &mut self.resp };
        let start = rb.pop()? != 0;
        let size = rb.pop()? as usize;
        Some((start, size))
    }

    fn push_chunk_header(rb: &mut RingBuffer<u8>, start: bool, size: usize) -> bool {
        rb.push(u8::from(start)) && rb.push(size as u8)
    }

    fn write_message(
        &mut self,
        to_fc: bool,
        cmd: u16,
        payload: &[u8],
    ) -> Result<usize, MspError> {
        if payload.len() > u8::MAX as usize {
            return Err(MspError::PayloadTooLarge(payload.len()));
        }
        let max_data = self.max_chunk_data_size();
        // The egress ring is fixed by the role: requests leave through the
        // output side, responses through the input side.
        let rb = match self.role {
            Role::Input => &mut self.resp,
            Role::Output => &mut self.req,
        };
        // Size byte + crc byte, plus the cmd byte on the way to the FC.
        let mut remaining = payload.len() + 2 + usize::from(to_fc);
        let mut chunk_size = remaining.min(max_data) as isize;
        if !Self::push_chunk_header(rb, true, chunk_size as usize) {
            return Err(MspError::Busy);
        }
        let mut crc = 0u8;
        let size8 = payload.len() as u8;
        crc = crc_xor(crc, size8);
        if !rb.push(size8) {
            return Err(MspError::Busy);
        }
        let cmd8 = cmd as u8;
        crc = crc_xor(crc, cmd8);
        remaining -= 1;
        chunk_size -= 1;
        if to_fc {
            if !rb.push(cmd8) {
                return Err(MspError::Busy);
            }
            remaining -= 1;
            chunk_size -= 1;
        }
        // Push the payload, opening further chunks as needed. `remaining`
        // includes the trailing checksum, which always fits because a new
        // chunk is opened the moment the current one fills up.
        let mut payload_iter = payload.iter();
        while remaining > 1 {
            let &b = payload_iter.next().expect("remaining tracks the payload");
            if !rb.push(b) {
                return Err(MspError::Busy);
            }
            crc = crc_xor(crc, b);
            remaining -= 1;
            chunk_size -= 1;
            if chunk_size == 0 {
                chunk_size = remaining.min(max_data) as isize;
                if !Self::push_chunk_header(rb, false, chunk_size as usize) {
                    return Err(MspError::Busy);
                }
            }
        }
        if !rb.push(crc) {
            return Err(MspError::Busy);
        }
        Ok(payload.len())
    }

    fn read_message(&mut self, payload: &mut [u8]) -> Option<MspPacket> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;
        let rb = match self.role {
            Role::Input => &mut self.req,
            Role::Output => &mut self.resp,
        };
        let payload_size = rb.pop()? as usize;
        let cmd = rb.pop()?;
        let mut crc = crc_xor(0, payload_size as u8);
        crc = crc_xor(crc, cmd);
        let mut stored = 0;
        for i in 0..payload_size {
            let b = rb.pop()?;
            crc = crc_xor(crc, b);
            if i < payload.len() {
                payload[i] = b;
                stored += 1;
            }
        }
        let received_crc = rb.pop()?;
        if received_crc != crc {
            // Every carrier already checksums its frames, so the inner
            // XOR is advisory on this hop.
            warn!(
                target: "msp.telemetry",
                "invalid CRC {received_crc}, expecting {crc}"
            );
        }
        let result = if stored < payload_size {
            Err(MspError::BufTooSmall)
        } else {
            Ok(payload_size)
        };
        let direction = match self.role {
            Role::Input => MspDirection::ToFc,
            Role::Output => MspDirection::FromFc,
        };
        Some(MspPacket {
            direction,
            cmd: u16::from(cmd),
            payload: result,
        })
    }
}

impl MspTransport for MspTelemetry {
    fn read(&mut self, payload: &mut [u8]) -> Option<MspPacket> {
        self.read_message(payload)
    }

    fn write(
        &mut self,
        direction: MspDirection,
        cmd: u16,
        payload: &[u8],
    ) -> Result<usize, MspError> {
        self.write_message(direction == MspDirection::ToFc, cmd, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msp::MSP_RAW_IMU;

    #[test]
    fn test_single_chunk_request() {
        let mut output = MspTelemetry::output(6);
        output
            .write(MspDirection::ToFc, MSP_RAW_IMU, &[])
            .unwrap();
        let mut chunk = [0u8; 8];
        let n = output.pop_request_chunk(&mut chunk, 1_000);
        assert_eq!(n, 4);
        // seq 0, start, version 1.
        assert_eq!(chunk[0], 0x30);
        assert_eq!(&chunk[1..4], &[0x00, 0x66, 0x66]);
        // The request is now in flight, nothing more to send.
        assert_eq!(output.pop_request_chunk(&mut chunk, 2_000), 0);
    }

    #[test]
    fn test_request_round_trip_chunked() {
        let payload: Vec<u8> = (0..40).collect();
        let mut output = MspTelemetry::output(6);
        let mut input = MspTelemetry::input(6);
        output
            .write(MspDirection::ToFc, 200, &payload)
            .unwrap();

        let mut chunk = [0u8; 8];
        loop {
            let n = output.pop_request_chunk(&mut chunk, 1_000);
            if n == 0 {
                break;
            }
            assert!(input.push_request_chunk(&chunk[..n], 1_000));
        }

        let mut decoded = [0u8; 64];
        let pkt = input.read(&mut decoded).unwrap();
        assert_eq!(pkt.direction, MspDirection::ToFc);
        assert_eq!(pkt.cmd, 200);
        assert_eq!(pkt.payload, Ok(payload.len()));
        assert_eq!(&decoded[..payload.len()], payload.as_slice());
    }

    #[test]
    fn test_response_round_trip() {
        let payload: Vec<u8> = (0..18).collect();
        let mut input = MspTelemetry::input(6);
        let mut output = MspTelemetry::output(6);
        // Prime the output side with the in-flight command.
        output.write(MspDirection::ToFc, 102, &[]).unwrap();
        let mut chunk = [0u8; 8];
        let n = output.pop_request_chunk(&mut chunk, 0);
        assert!(n > 0);

        input
            .write(MspDirection::FromFc, 102, &payload)
            .unwrap();
        loop {
            let n = input.pop_response_chunk(&mut chunk);
            if n == 0 {
                break;
            }
            assert!(output.push_response_chunk(&chunk[..n]));
        }

        let mut decoded = [0u8; 64];
        let pkt = output.read(&mut decoded).unwrap();
        assert_eq!(pkt.direction, MspDirection::FromFc);
        assert_eq!(pkt.cmd, 102);
        assert_eq!(pkt.payload, Ok(payload.len()));
        assert_eq!(&decoded[..payload.len()], payload.as_slice());
    }

    #[test]
    fn test_bad_seq_drops_in_flight() {
        let mut input = MspTelemetry::input(6);
        // Start of a 10-byte request.
        let start = [0x30, 10, 200, 1, 2, 3];
        assert!(input.push_request_chunk(&start, 1_000));
        // A continuation with the wrong sequence (5 instead of 1) aborts
        // the reassembly.
        let bad = [0x25, 4, 5, 6, 7, 8];
        assert!(!input.push_request_chunk(&bad, 2_000));
        let mut decoded = [0u8; 32];
        assert!(input.read(&mut decoded).is_none());
    }

    #[test]
    fn test_in_flight_timeout_reclaim() {
        let mut input = MspTelemetry::input(6);
        let start = [0x30, 10, 200, 1, 2, 3];
        assert!(input.push_request_chunk(&start, 1_000));
        // Another start while in flight is rejected...
        assert!(!input.push_request_chunk(&start, 500_000));
        // ...but accepted once the transfer is stale.
        assert!(input.push_request_chunk(&start, 1_000_000 + 2_000));
    }

    #[test]
    fn test_error_response_clears_in_flight() {
        let mut output = MspTelemetry::output(8);
        output.write(MspDirection::ToFc, 102, &[]).unwrap();
        let mut chunk = [0u8; 8];
        assert!(output.pop_request_chunk(&mut chunk, 1_000) > 0);
        // seq 0, start, error bit set.
        let error_chunk = [START_BIT | RESP_ERROR_BIT, 0];
        assert!(!output.push_response_chunk(&error_chunk));
        // With the slot reclaimed, a fresh request may go out immediately.
        output.write(MspDirection::ToFc, 110, &[]).unwrap();
        assert!(output.pop_request_chunk(&mut chunk, 2_000) > 0);
    }
}
