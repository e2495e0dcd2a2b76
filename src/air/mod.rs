//! # Air Protocol
//!
//! Everything that crosses the radio: pairing and bind packets, the five
//! air modes, the byte-stuffed multiplexing stream, the per-mode data
//! packets with their key-seeded CRC, and the cycle-driven protocol state
//! machine that ties them together.

pub mod cmd;
pub mod mode;
pub mod packet;
pub mod pairing;
pub mod protocol;
pub mod radio;
pub mod stream;

pub use cmd::{AirCmd, SwitchModeAck};
pub use mode::{AirMode, AirModeMask};
pub use packet::{AirRxPacket, AirTxPacket};
pub use pairing::{AirAddr, AirBindPacket, AirKey, AirPairing, BindPacketType, Capabilities};
pub use protocol::{AirProtocol, AirProtocolConfig, AirProtocolEvent, AirRole};
pub use radio::{FakeRadio, Radio, RadioError};
pub use stream::{AirStream, AirStreamEvent};

/// Marker byte between records in the air stream.
pub const AIR_DATA_START_STOP: u8 = 0x7E;
/// Escape introducer inside a record.
pub const AIR_DATA_BYTE_STUFF: u8 = 0x7D;
/// XOR applied to escaped bytes.
pub const AIR_DATA_XOR: u8 = 0x20;

/// Width of air packet sequence numbers. Bounded by the one-byte
/// switch-mode acknowledge, which packs a mode index next to a sequence.
pub const AIR_SEQ_BITS: u32 = 4;
pub const AIR_SEQ_MASK: u8 = (1 << AIR_SEQ_BITS) - 1;

/// Advance a sequence number.
#[inline]
pub fn seq_next(seq: u8) -> u8 {
    (seq + 1) & AIR_SEQ_MASK
}
