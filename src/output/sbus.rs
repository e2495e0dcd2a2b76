//! # SBUS + S.Port Output
//!
//! The classic FrSky wiring: SBUS control frames on one line, a polled
//! SmartPort telemetry bus on another. Control goes out on every control
//! tick; the S.Port master runs on its own 11 ms cadence regardless.

use crate::msp::MspTelemetry;
use crate::output::{Output, OutputBytes};
use crate::protocols::sbus::SbusData;
use crate::protocols::smartport::SmartportMaster;
use crate::rc::data::RcData;
use crate::rc::telemetry::TelemetryRegistry;
use crate::util::TimeMicros;

pub struct OutputSbus {
    sport_master: SmartportMaster,
}

impl OutputSbus {
    pub fn new() -> Self {
        Self {
            sport_master: SmartportMaster::new(),
        }
    }

    /// The MSP-over-telemetry transport riding the S.Port line.
    pub fn msp(&mut self) -> &mut MspTelemetry {
        self.sport_master.msp()
    }
}

impl Default for OutputSbus {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for OutputSbus {
    fn name(&self) -> &'static str {
        "SBUS"
    }

    fn feed(&mut self, bytes: &[u8], telemetry: &mut TelemetryRegistry, now: TimeMicros) {
        for (id, value) in self.sport_master.feed(bytes) {
            telemetry.set(id, value, now);
        }
    }

    fn update(
        &mut self,
        rc: &RcData,
        telemetry: &mut TelemetryRegistry,
        update_control: bool,
        now: TimeMicros,
    ) -> OutputBytes {
        let _ = telemetry;
        let mut out = OutputBytes::default();
        if update_control && rc.is_ready() {
            let sbus = SbusData::from_rc(rc, rc.failsafe.is_active());
            out.control = sbus.to_frame();
        }
        if let Some(poll) = self.sport_master.update(now) {
            out.aux = poll;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::sbus::SBUS_START_BYTE;
    use crate::protocols::smartport::SMARTPORT_START_STOP;
    use crate::rc::telemetry::TelemetryId;

    #[test]
    fn test_control_and_poll_lines() {
        let mut output = OutputSbus::new();
        let mut telemetry = TelemetryRegistry::new();
        let mut rc = RcData::new();
        rc.set_channel(2, 1750, 1);
        let out = output.update(&rc, &mut telemetry, true, 0);
        assert_eq!(out.control[0], SBUS_START_BYTE);
        assert_eq!(out.aux[0], SMARTPORT_START_STOP);
        // The S.Port keeps its cadence when control is idle.
        let out = output.update(&rc, &mut telemetry, false, 11_000);
        assert!(out.control.is_empty());
        assert!(!out.aux.is_empty());
    }

    #[test]
    fn test_sensor_reply_updates_registry() {
        let mut output = OutputSbus::new();
        let mut telemetry = TelemetryRegistry::new();
        let mut rc = RcData::new();
        rc.set_channel(0, 1500, 1);
        output.update(&rc, &mut telemetry, true, 0);

        let payload = crate::protocols::smartport::SmartportPayload {
            frame_id: crate::protocols::smartport::SMARTPORT_DATA_FRAME_ID,
            value_id: 0x0210,
            data: 221,
        };
        let mut wire = Vec::new();
        for b in payload.to_bytes() {
            wire.push(b);
        }
        wire.push(payload.checksum());
        output.feed(&wire, &mut telemetry, 5_000);
        assert_eq!(telemetry.format(TelemetryId::BatVoltage), "22.10V");
    }
}
