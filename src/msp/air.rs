//! # MSP over the Air Stream
//!
//! Tunnels MSP dialogs through the radio link as air-stream commands. The
//! encoded payload is `direction char, uvarint cmd, payload`; the command
//! number rides as a varint because MSP v2 codes exceed one byte while the
//! common v1 codes stay single-byte on the wire.
//!
//! The transport does not write into the stream directly: encoded messages
//! queue here and the protocol task drains them into the stream when it
//! owns the output window. Reads never produce data; inbound MSP arrives
//! through the stream decoder, which hands payloads to
//! [`MspAirTransport::dispatch`].

use log::warn;

use crate::msp::{MspConn, MspDirection, MspError, MspPacket, MspTransport};
use crate::util::{uvarint_decode16, uvarint_encode16, RingBuffer};

const MSP_AIR_QUEUE_SIZE: usize = 8;

pub struct MspAirTransport {
    pending: RingBuffer<Vec<u8>>,
}

impl MspAirTransport {
    pub fn new() -> Self {
        Self {
            pending: RingBuffer::new(MSP_AIR_QUEUE_SIZE),
        }
    }

    /// Take the next encoded message destined for the air stream.
    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        self.pending.pop()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Decode an MSP payload received from the air stream.
    pub fn decode(payload: &[u8]) -> Option<(MspDirection, u16, &[u8])> {
        let (&dir_char, rest) = payload.split_first()?;
        let direction = match MspDirection::from_wire_char(dir_char) {
            Some(d) => d,
            None => {
                warn!(target: "msp.air", "invalid direction character {dir_char}");
                return None;
            }
        };
        let (cmd, used) = match uvarint_decode16(rest) {
            Ok(v) => v,
            Err(_) => return None,
        };
        Some((direction, cmd, &rest[used..]))
    }

    /// Decode a payload received from the air stream and dispatch it into
    /// the connection.
    pub fn dispatch(conn: &mut MspConn, payload: &[u8]) {
        match Self::decode(payload) {
            Some((direction, cmd, data)) => {
                conn.dispatch_message(direction, cmd, Ok(data));
            }
            None => {
                warn!(
                    target: "msp.air",
                    "invalid MSP payload: {}",
                    hex::encode(payload)
                );
            }
        }
    }
}

impl Default for MspAirTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MspTransport for MspAirTransport {
    fn read(&mut self, _payload: &mut [u8]) -> Option<MspPacket> {
        // The air transport is push based, see `dispatch`.
        None
    }

    fn write(
        &mut self,
        direction: MspDirection,
        cmd: u16,
        payload: &[u8],
    ) -> Result<usize, MspError> {
        let mut buf = Vec::with_capacity(payload.len() + 4);
        buf.push(direction.wire_char());
        let mut cmd_buf = [0u8; 3];
        let used = uvarint_encode16(&mut cmd_buf, cmd).expect("3 bytes always fit a u16");
        buf.extend_from_slice(&cmd_buf[..used]);
        buf.extend_from_slice(payload);
        if !self.pending.push(buf) {
            return Err(MspError::Busy);
        }
        Ok(payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_decode() {
        let mut tr = MspAirTransport::new();
        tr.write(MspDirection::FromFc, 300, &[1, 2, 3]).unwrap();
        let encoded = tr.take_pending().unwrap();
        assert_eq!(encoded[0], b'>');
        let (direction, cmd, data) = MspAirTransport::decode(&encoded).unwrap();
        assert_eq!(direction, MspDirection::FromFc);
        assert_eq!(cmd, 300);
        assert_eq!(data, &[1, 2, 3]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(MspAirTransport::decode(&[]).is_none());
        assert!(MspAirTransport::decode(&[b'x', 1]).is_none());
        // Truncated varint.
        assert!(MspAirTransport::decode(&[b'<', 0x80]).is_none());
    }

    #[test]
    fn test_queue_bound() {
        let mut tr = MspAirTransport::new();
        for _ in 0..MSP_AIR_QUEUE_SIZE {
            tr.write(MspDirection::ToFc, 1, &[]).unwrap();
        }
        assert_eq!(
            tr.write(MspDirection::ToFc, 1, &[]),
            Err(MspError::Busy)
        );
    }
}
