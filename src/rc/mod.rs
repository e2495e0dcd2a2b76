//! # RC Data and Telemetry
//!
//! The channel model shared by every protocol adapter, plus the typed
//! telemetry value registry that both ends of the link keep in sync.

pub mod data;
pub mod telemetry;

pub use data::{Failsafe, RcData};
pub use telemetry::{Telemetry, TelemetryId, TelemetryRegistry, TelemetryType, TelemetryValue};
