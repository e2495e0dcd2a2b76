//! # Serial Protocol Adapters
//!
//! The framers spoken on the FC side of the link: CRSF, FrSky SmartPort,
//! SBUS and FPort. Each one is a pure state machine fed wire bytes and
//! drained for wire bytes; the outputs own the serial ports and shuttle
//! data in both directions.

pub mod crsf;
pub mod fport;
pub mod sbus;
pub mod smartport;

pub use crsf::{CrsfFrame, CrsfFrameType, CrsfPort};
pub use fport::{FportFrameType, FportReader};
pub use sbus::SbusData;
pub use smartport::{SmartportMaster, SmartportPayload};
