//! # FC-Facing Outputs
//!
//! An output turns the RC model into whatever the flight controller
//! speaks and feeds FC telemetry back into the registry. All outputs are
//! pure state machines: wire bytes come in through [`Output::feed`] and
//! leave through [`Output::update`]; the serial ports live in the
//! runtime.

pub mod crsf;
pub mod fport;
pub mod msp;
pub mod sbus;

pub use crsf::OutputCrsf;
pub use fport::OutputFport;
pub use msp::OutputMsp;
pub use sbus::OutputSbus;

use crate::rc::data::RcData;
use crate::rc::telemetry::{TelemetryId, TelemetryRegistry, TelemetryValue};
use crate::util::TimeMicros;

/// Bytes an output wants on its serial line(s) after an update. Outputs
/// with a second line (SBUS + S.Port) use `aux` for it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutputBytes {
    pub control: Vec<u8>,
    pub aux: Vec<u8>,
}

impl OutputBytes {
    pub fn is_empty(&self) -> bool {
        self.control.is_empty() && self.aux.is_empty()
    }
}

pub trait Output {
    fn name(&self) -> &'static str;

    /// Process bytes received from the FC.
    fn feed(&mut self, bytes: &[u8], telemetry: &mut TelemetryRegistry, now: TimeMicros);

    /// Run one output cycle. `update_control` says whether fresh control
    /// data should go out this tick.
    fn update(
        &mut self,
        rc: &RcData,
        telemetry: &mut TelemetryRegistry,
        update_control: bool,
        now: TimeMicros,
    ) -> OutputBytes;
}

/// Derive the battery-remaining percentage from capacity and drawn
/// charge, for FCs that do not report it themselves.
pub fn calculate_battery_remaining(telemetry: &mut TelemetryRegistry, now: TimeMicros) {
    let capacity = match telemetry.get(TelemetryId::BatCapacity).value() {
        TelemetryValue::U16(v) if *v > 0 => i64::from(*v),
        _ => return,
    };
    let drawn = match telemetry.get(TelemetryId::CurrentDrawn).value() {
        TelemetryValue::I32(v) => i64::from(*v),
        _ => return,
    };
    let percent = (100 - drawn * 100 / capacity).clamp(0, 100) as u8;
    telemetry.set_u8(TelemetryId::BatRemainingPercent, percent, now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_remaining_calculation() {
        let mut telemetry = TelemetryRegistry::new();
        // Without a capacity nothing is derived.
        telemetry.set_i32(TelemetryId::CurrentDrawn, 500, 1);
        calculate_battery_remaining(&mut telemetry, 2);
        assert!(!telemetry.get(TelemetryId::BatRemainingPercent).has_value());

        telemetry.set_u16(TelemetryId::BatCapacity, 2000, 3);
        calculate_battery_remaining(&mut telemetry, 4);
        assert_eq!(telemetry.format(TelemetryId::BatRemainingPercent), "75%");

        // Overdrawn batteries clamp at zero.
        telemetry.set_i32(TelemetryId::CurrentDrawn, 2500, 5);
        calculate_battery_remaining(&mut telemetry, 6);
        assert_eq!(telemetry.format(TelemetryId::BatRemainingPercent), "0%");
    }
}
