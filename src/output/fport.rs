//! # FPort Output
//!
//! One inverted line to the FC: each control tick writes an SBUS control
//! frame (with the link quality as the RSSI byte) followed by a
//! telemetry request. The FC answers with telemetry responses carrying
//! SmartPort payloads, decoded through the S.Port value tables. Queued
//! MSP chunks replace the empty telemetry request for their tick.

use crate::msp::MspTelemetry;
use crate::output::{Output, OutputBytes};
use crate::protocols::fport::{
    write_control_frame, write_frame, write_telemetry_request, FportFrameType, FportReader,
};
use crate::protocols::sbus::SbusData;
use crate::protocols::smartport::{
    SmartportMaster, SMARTPORT_MSP_CLIENT_FRAME_ID, SMARTPORT_MSP_PAYLOAD_CHUNK_SIZE,
};
use crate::rc::data::RcData;
use crate::rc::telemetry::{TelemetryId, TelemetryRegistry, TelemetryValue};
use crate::util::TimeMicros;

pub struct OutputFport {
    reader: FportReader,
    sport_master: SmartportMaster,
}

impl OutputFport {
    pub fn new() -> Self {
        Self {
            reader: FportReader::new(),
            sport_master: SmartportMaster::new(),
        }
    }

    /// The MSP-over-telemetry transport riding this output.
    pub fn msp(&mut self) -> &mut MspTelemetry {
        self.sport_master.msp()
    }

    fn rssi_byte(telemetry: &TelemetryRegistry) -> u8 {
        // The RSSI field carries a percentage, so the link quality maps
        // straight onto it.
        match telemetry.get(TelemetryId::RxLinkQuality).value() {
            TelemetryValue::I8(lq) if *lq > 0 => *lq as u8,
            _ => 0,
        }
    }
}

impl Default for OutputFport {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for OutputFport {
    fn name(&self) -> &'static str {
        "FPort"
    }

    fn feed(&mut self, bytes: &[u8], telemetry: &mut TelemetryRegistry, now: TimeMicros) {
        for frame in self.reader.feed(bytes) {
            if frame.frame_type != FportFrameType::TelemetryResponse as u8 {
                continue;
            }
            let payload = match frame.smartport_payload() {
                Some(p) => p,
                None => continue,
            };
            if payload.frame_id == 0 {
                // Empty frame, the FC had nothing to send.
                continue;
            }
            if let Some((id, value)) = self.sport_master.decode_payload(&payload) {
                telemetry.set(id, value, now);
            }
        }
    }

    fn update(
        &mut self,
        rc: &RcData,
        telemetry: &mut TelemetryRegistry,
        update_control: bool,
        now: TimeMicros,
    ) -> OutputBytes {
        let mut out = OutputBytes::default();
        if !update_control || !rc.is_ready() {
            return out;
        }
        let sbus = SbusData::from_rc(rc, rc.failsafe.is_active());
        out.control
            .extend_from_slice(&write_control_frame(&sbus, Self::rssi_byte(telemetry)));

        // A queued MSP chunk takes this tick's telemetry slot, shaped
        // like the S.Port client frame.
        let mut chunk = [0u8; SMARTPORT_MSP_PAYLOAD_CHUNK_SIZE + 2];
        let n = self.sport_master.msp().pop_request_chunk(&mut chunk, now);
        if n > 0 {
            let mut payload = [0u8; SMARTPORT_MSP_PAYLOAD_CHUNK_SIZE + 1];
            payload[0] = SMARTPORT_MSP_CLIENT_FRAME_ID;
            payload[1..1 + n].copy_from_slice(&chunk[..n]);
            out.control
                .extend_from_slice(&write_frame(FportFrameType::TelemetryRequest, &payload));
        } else {
            out.control.extend_from_slice(&write_telemetry_request());
        }
        out
    }
}
