//! # raven-rs - The Raven Long-Range RC Link Protocol Stack
//!
//! raven-rs implements the protocol core of Raven, a long-range radio
//! control link: control channels travel from a transmitter to a
//! receiver over a narrow-band LoRa radio, telemetry comes back, and a
//! flight controller is reached over short-range serial buses (SBUS +
//! S.Port, FPort, CRSF or MSP).
//!
//! ## Features
//!
//! - Cryptographic-style pairing with key-seeded packet CRCs and a
//!   key-derived radio sync word
//! - Byte-stuffed air stream multiplexing channels, telemetry, commands
//!   and tunneled MSP inside fixed-size air packets
//! - Adaptive switching across five air modes, fastest to longest range
//! - CRSF, SmartPort, SBUS and FPort framers for the FC side
//! - MSP v1 serial framing plus a chunked MSP-over-telemetry transport
//! - A typed 36-slot telemetry registry with change-driven scheduling
//! - Namespaced typed storage for pairings and settings
//!
//! ## Usage
//!
//! ```no_run
//! use raven_rs::air::{AirProtocol, AirProtocolConfig, AirRole, AirAddr, FakeRadio};
//! use raven_rs::rc::{RcData, TelemetryRegistry};
//!
//! let (radio, _peer) = FakeRadio::pair();
//! let config = AirProtocolConfig::new(AirRole::Tx, AirAddr([0xA4, 0xCF, 0x12, 0x04, 0x05, 0xF6]));
//! let mut protocol = AirProtocol::new(radio, config);
//! let mut rc = RcData::new();
//! let mut telemetry = TelemetryRegistry::new();
//! let _events = protocol.update(&mut rc, &mut telemetry, 0).unwrap();
//! ```

pub mod air;
pub mod constants;
pub mod error;
pub mod io;
pub mod logging;
pub mod msp;
pub mod output;
pub mod protocols;
pub mod rc;
pub mod storage;
pub mod util;

pub use crate::error::RavenError;
pub use crate::logging::{init_logger, log_info};

// Core link types.
pub use air::{
    AirAddr, AirBindPacket, AirCmd, AirKey, AirMode, AirPairing, AirProtocol, AirRole, AirStream,
    FakeRadio, Radio,
};
pub use rc::{RcData, TelemetryId, TelemetryRegistry, TelemetryValue};

// FC-side adapters.
pub use output::{Output, OutputBytes, OutputCrsf, OutputFport, OutputMsp, OutputSbus};
pub use protocols::{CrsfFrame, CrsfPort, FportReader, SbusData, SmartportMaster};

// MSP plumbing.
pub use msp::{MspConn, MspDirection, MspError, MspSerial, MspTelemetry};

// Persistence.
pub use storage::{FileBackend, MemoryBackend, Storage, StorageNamespace};
