//! # MultiWii Serial Protocol
//!
//! MSP v1 is the request/reply protocol spoken by the flight controller.
//! The link carries it over three different transports with one shared
//! connection layer:
//!
//! - [`serial`]: the classic `$M<`/`$M>` framing over a UART.
//! - [`telemetry`]: chunked MSP riding in S.Port / CRSF / FPort telemetry
//!   slots.
//! - [`air`]: MSP tunneled through the air stream as commands.
//!
//! [`conn::MspConn`] dispatches replies to queued callbacks independently
//! of which transport produced them.

pub mod air;
pub mod conn;
pub mod serial;
pub mod telemetry;

pub use air::MspAirTransport;
pub use conn::{MspCallback, MspConn};
pub use serial::MspSerial;
pub use telemetry::MspTelemetry;

use thiserror::Error;

// MSP command codes used by the link.
pub const MSP_FC_VARIANT: u16 = 2;
pub const MSP_FC_VERSION: u16 = 3;
pub const MSP_NAME: u16 = 10;
pub const MSP_CURRENT_METER_CONFIG: u16 = 40;
pub const MSP_RSSI_CONFIG: u16 = 50;
pub const MSP_RAW_IMU: u16 = 102;
pub const MSP_RAW_GPS: u16 = 106;
pub const MSP_ATTITUDE: u16 = 108;
pub const MSP_ALTITUDE: u16 = 109;
pub const MSP_ANALOG: u16 = 110;
pub const MSP_MISC: u16 = 114;
pub const MSP_SET_TX_INFO: u16 = 186;
pub const MSP_SET_RAW_RC: u16 = 200;

/// Maximum payload accepted per message. MSP itself has no upper bound,
/// this is the buffer limit of this implementation.
pub const MSP_MAX_PAYLOAD_SIZE: usize = 512;

/// Pending callback queue depth per connection.
pub const MSP_QUEUE_MAX_SIZE: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MspError {
    /// The frame arrived with a bad XOR checksum. The frame has already
    /// been consumed from the input.
    #[error("invalid checksum 0x{received:02x}, expecting 0x{calculated:02x}")]
    InvalidChecksum { received: u8, calculated: u8 },

    /// The caller's buffer cannot hold the payload. The frame has already
    /// been consumed from the input.
    #[error("payload buffer too small")]
    BufTooSmall,

    /// The transport cannot accept the message right now.
    #[error("transport busy")]
    Busy,

    /// The payload exceeds [`MSP_MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// The request was displaced from a full callback queue before a reply
    /// arrived.
    #[error("request displaced from callback queue")]
    Displaced,

    /// The peer flagged the request as failed.
    #[error("error response from peer")]
    ErrorResponse,
}

/// Direction of an MSP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MspDirection {
    /// Request going to the flight controller (`<`).
    ToFc,
    /// Response coming from the flight controller (`>`).
    FromFc,
    /// Error response from the flight controller (`!`).
    Error,
}

impl MspDirection {
    pub fn wire_char(self) -> u8 {
        match self {
            MspDirection::ToFc => b'<',
            MspDirection::FromFc => b'>',
            MspDirection::Error => b'!',
        }
    }

    pub fn from_wire_char(c: u8) -> Option<Self> {
        match c {
            b'<' => Some(MspDirection::ToFc),
            b'>' => Some(MspDirection::FromFc),
            b'!' => Some(MspDirection::Error),
            _ => None,
        }
    }
}

/// One decoded MSP message. `payload` is the byte count written into the
/// caller's buffer, or the per-frame error when the frame was consumed but
/// could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MspPacket {
    pub direction: MspDirection,
    pub cmd: u16,
    pub payload: Result<usize, MspError>,
}

/// Byte-level transport for MSP messages. Implementations decode from and
/// encode to their carrier; they never block.
pub trait MspTransport {
    /// Decode the next message into `payload`. `None` means no complete
    /// message is available.
    fn read(&mut self, payload: &mut [u8]) -> Option<MspPacket>;

    /// Encode and queue a message. Returns the payload size on success.
    fn write(
        &mut self,
        direction: MspDirection,
        cmd: u16,
        payload: &[u8],
    ) -> Result<usize, MspError>;
}
