//! # MSP v1 Serial Framing
//!
//! Wire format: `'$' 'M' DIR LEN CMD PAYLOAD[LEN] CRC`, where DIR is one
//! of `<` (to FC), `>` (from FC) or `!` (error response) and CRC is the
//! XOR of LEN, CMD and the payload bytes.
//!
//! The decoder is a streaming scanner: bytes are appended with
//! [`MspSerial::feed`], garbage before `$M` is skipped one byte at a
//! time, and a frame that fails its checksum is still consumed so the
//! stream stays aligned.

use log::{debug, warn};
use nom::bytes::streaming::{tag, take};
use nom::number::streaming::u8 as parse_u8;
use nom::IResult;

use crate::msp::{MspDirection, MspError, MspPacket, MspTransport, MSP_MAX_PAYLOAD_SIZE};
use crate::util::crc_xor_bytes;

/// Preamble + direction + len + cmd + crc.
pub const MSP_V1_PROTOCOL_BYTES: usize = 6;

/// Baud rate used for MSP serial links.
pub const MSP_SERIAL_BAUDRATE: u32 = 115_200;

struct RawFrame<'a> {
    direction: u8,
    cmd: u8,
    payload: &'a [u8],
    crc: u8,
}

fn parse_frame(input: &[u8]) -> IResult<&[u8], RawFrame<'_>> {
    let (input, _) = tag(&b"$M"[..])(input)?;
    let (input, direction) = parse_u8(input)?;
    let (input, len) = parse_u8(input)?;
    let (input, cmd) = parse_u8(input)?;
    let (input, payload) = take(len as usize)(input)?;
    let (input, crc) = parse_u8(input)?;
    Ok((
        input,
        RawFrame {
            direction,
            cmd,
            payload,
            crc,
        },
    ))
}

/// Pack an MSP v1 frame for the wire.
pub fn pack_frame(direction: MspDirection, cmd: u16, payload: &[u8]) -> Result<Vec<u8>, MspError> {
    if payload.len() > MSP_MAX_PAYLOAD_SIZE || payload.len() > u8::MAX as usize {
        return Err(MspError::PayloadTooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(payload.len() + MSP_V1_PROTOCOL_BYTES);
    buf.push(b'$');
    buf.push(b'M');
    buf.push(direction.wire_char());
    buf.push(payload.len() as u8);
    buf.push(cmd as u8);
    buf.extend_from_slice(payload);
    // Preamble and direction are not covered by the checksum.
    buf.push(crc_xor_bytes(&buf[3..]));
    Ok(buf)
}

/// Streaming MSP v1 encoder/decoder.
///
/// Incoming wire bytes go in through [`feed`](Self::feed); decoded packets
/// come out of the [`MspTransport::read`] implementation. Outgoing frames
/// are queued internally and drained with [`take_output`](Self::take_output)
/// by whoever owns the wire.
pub struct MspSerial {
    buf: Vec<u8>,
    out: Vec<u8>,
}

impl MspSerial {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MSP_MAX_PAYLOAD_SIZE + MSP_V1_PROTOCOL_BYTES),
            out: Vec::new(),
        }
    }

    /// Append raw bytes received from the wire.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        // Bound the scratch buffer: older bytes cannot start a frame we
        // would still be able to complete.
        let cap = MSP_MAX_PAYLOAD_SIZE + MSP_V1_PROTOCOL_BYTES;
        if self.buf.len() > cap {
            let excess = self.buf.len() - cap;
            self.buf.drain(..excess);
        }
    }

    /// Take the bytes queued for the wire.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    pub fn has_output(&self) -> bool {
        !self.out.is_empty()
    }
}

impl Default for MspSerial {
    fn default() -> Self {
        Self::new()
    }
}

impl MspTransport for MspSerial {
    fn read(&mut self, payload: &mut [u8]) -> Option<MspPacket> {
        loop {
            // Skip garbage until a potential frame start.
            let start = self
                .buf
                .windows(2)
                .position(|w| w == b"$M")
                .unwrap_or(self.buf.len().saturating_sub(1));
            if start > 0 {
                self.buf.drain(..start);
            }

            match parse_frame(&self.buf) {
                Ok((rest, frame)) => {
                    let consumed = self.buf.len() - rest.len();
                    let direction = MspDirection::from_wire_char(frame.direction);
                    let calculated = crc_xor_bytes(&self.buf[3..consumed - 1]);
                    let cmd = u16::from(frame.cmd);
                    let payload_len = frame.payload.len();

                    let result = if direction.is_none() {
                        // Not a real frame start, drop the '$' and rescan.
                        self.buf.drain(..1);
                        continue;
                    } else if frame.crc != calculated {
                        warn!(
                            target: "msp.serial",
                            "invalid CRC 0x{:02x}, expecting 0x{:02x}",
                            frame.crc, calculated
                        );
                        Err(MspError::InvalidChecksum {
                            received: frame.crc,
                            calculated,
                        })
                    } else if payload_len > payload.len() {
                        Err(MspError::BufTooSmall)
                    } else {
                        payload[..payload_len].copy_from_slice(frame.payload);
                        Ok(payload_len)
                    };

                    debug!(
                        target: "msp.serial",
                        "got serial code {cmd} (payload size {payload_len})"
                    );
                    self.buf.drain(..consumed);
                    return Some(MspPacket {
                        direction: direction.unwrap(),
                        cmd,
                        payload: result,
                    });
                }
                Err(nom::Err::Incomplete(_)) => return None,
                Err(_) => {
                    // Malformed beyond recovery at this offset.
                    if self.buf.is_empty() {
                        return None;
                    }
                    self.buf.drain(..1);
                }
            }
        }
    }

    fn write(
        &mut self,
        direction: MspDirection,
        cmd: u16,
        payload: &[u8],
    ) -> Result<usize, MspError> {
        let frame = pack_frame(direction, cmd, payload)?;
        self.out.extend_from_slice(&frame);
        Ok(payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_frame() {
        let frame = pack_frame(MspDirection::ToFc, 102, &[]).unwrap();
        assert_eq!(frame, vec![b'$', b'M', b'<', 0, 102, 102]);
    }

    #[test]
    fn test_decode_round_trip() {
        let mut serial = MspSerial::new();
        let frame = pack_frame(MspDirection::FromFc, 110, &[0x11, 0x22]).unwrap();
        serial.feed(&frame);
        let mut payload = [0u8; 16];
        let pkt = serial.read(&mut payload).unwrap();
        assert_eq!(pkt.direction, MspDirection::FromFc);
        assert_eq!(pkt.cmd, 110);
        assert_eq!(pkt.payload, Ok(2));
        assert_eq!(&payload[..2], &[0x11, 0x22]);
        assert!(serial.read(&mut payload).is_none());
    }

    #[test]
    fn test_skips_garbage() {
        let mut serial = MspSerial::new();
        serial.feed(&[0xDE, 0xAD, 0x24]);
        let frame = pack_frame(MspDirection::FromFc, 3, &[1, 2, 3]).unwrap();
        serial.feed(&frame);
        let mut payload = [0u8; 16];
        let pkt = serial.read(&mut payload).unwrap();
        assert_eq!(pkt.cmd, 3);
        assert_eq!(pkt.payload, Ok(3));
    }

    #[test]
    fn test_invalid_checksum_consumes_frame() {
        let mut serial = MspSerial::new();
        let mut frame = pack_frame(MspDirection::FromFc, 3, &[1, 2, 3]).unwrap();
        *frame.last_mut().unwrap() ^= 0xFF;
        serial.feed(&frame);
        let good = pack_frame(MspDirection::FromFc, 4, &[9]).unwrap();
        serial.feed(&good);

        let mut payload = [0u8; 16];
        let pkt = serial.read(&mut payload).unwrap();
        assert_eq!(pkt.cmd, 3);
        assert!(matches!(pkt.payload, Err(MspError::InvalidChecksum { .. })));
        // The stream stays aligned and the next frame decodes.
        let pkt = serial.read(&mut payload).unwrap();
        assert_eq!(pkt.cmd, 4);
        assert_eq!(pkt.payload, Ok(1));
    }

    #[test]
    fn test_buffer_too_small_consumes_frame() {
        let mut serial = MspSerial::new();
        let frame = pack_frame(MspDirection::FromFc, 7, &[1, 2, 3, 4]).unwrap();
        serial.feed(&frame);
        let mut payload = [0u8; 2];
        let pkt = serial.read(&mut payload).unwrap();
        assert_eq!(pkt.payload, Err(MspError::BufTooSmall));
        assert!(serial.read(&mut payload).is_none());
    }

    #[test]
    fn test_error_direction() {
        let mut serial = MspSerial::new();
        let frame = pack_frame(MspDirection::Error, 200, &[]).unwrap();
        serial.feed(&frame);
        let mut payload = [0u8; 4];
        let pkt = serial.read(&mut payload).unwrap();
        assert_eq!(pkt.direction, MspDirection::Error);
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut serial = MspSerial::new();
        let frame = pack_frame(MspDirection::FromFc, 3, &[1, 2, 3]).unwrap();
        serial.feed(&frame[..4]);
        let mut payload = [0u8; 16];
        assert!(serial.read(&mut payload).is_none());
        serial.feed(&frame[4..]);
        assert!(serial.read(&mut payload).is_some());
    }
}
