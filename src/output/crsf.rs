//! # CRSF Output
//!
//! Sends packed RC channels to the FC at the control rate, pings for
//! device discovery every ten seconds and tunnels MSP requests as
//! extended frames. Telemetry frames coming back (GPS, battery,
//! attitude, flight mode) land in the registry after unit conversion.

use std::f32::consts::PI;

use log::{debug, warn};

use crate::msp::MspTelemetry;
use crate::output::{Output, OutputBytes};
use crate::protocols::crsf::{
    self, addr, pack_channels, CrsfFrame, CrsfFrameType, CrsfPort, CRSF_MSP_REQ_PAYLOAD_SIZE,
    CRSF_NUM_CHANNELS, CRSF_PING_INTERVAL,
};
use crate::rc::data::{channel_to_digital, RcData};
use crate::rc::telemetry::{TelemetryId, TelemetryRegistry};
use crate::util::TimeMicros;

/// rad/10000 to 0.01 degree.
fn dec_att_angle(val: i16) -> i16 {
    (f32::from(val) * (100.0 / (10_000.0 * (PI / 180.0)))) as i16
}

fn dec_att_heading(val: u16) -> u16 {
    (f32::from(val) * (100.0 / (10_000.0 * (PI / 180.0)))) as u16
}

/// Yaw comes as [0, 360); attitude wants (-180, 180].
fn dec_att_z(val: u16) -> i16 {
    let mut v = i32::from(dec_att_heading(val));
    if v > 180 * 100 {
        v -= 360 * 100;
    }
    v as i16
}

/// km/h / 10 to cm/s.
fn decikmh_to_cms(val: u16) -> u16 {
    (f32::from(val) * (10.0 / 3.6)) as u16
}

pub struct OutputCrsf {
    port: CrsfPort,
    msp_telemetry: MspTelemetry,
    next_ping: TimeMicros,
}

impl OutputCrsf {
    pub fn new() -> Self {
        Self {
            port: CrsfPort::new(),
            msp_telemetry: MspTelemetry::output(CRSF_MSP_REQ_PAYLOAD_SIZE),
            next_ping: 0,
        }
    }

    /// The MSP-over-telemetry transport riding this output.
    pub fn msp(&mut self) -> &mut MspTelemetry {
        &mut self.msp_telemetry
    }

    fn handle_frame(
        &mut self,
        frame: &CrsfFrame,
        telemetry: &mut TelemetryRegistry,
        now: TimeMicros,
    ) {
        match frame.known_type() {
            Some(CrsfFrameType::Gps) => {
                if let Some(gps) = frame.as_gps() {
                    telemetry.set_i32(TelemetryId::GpsLat, gps.lat, now);
                    telemetry.set_i32(TelemetryId::GpsLon, gps.lon, now);
                    telemetry.set_u16(TelemetryId::GpsSpeed, decikmh_to_cms(gps.ground_speed), now);
                    telemetry.set_u16(TelemetryId::GpsHeading, gps.heading, now);
                    telemetry.set_i32(
                        TelemetryId::Altitude,
                        (i32::from(gps.altitude) - 1000) * 100,
                        now,
                    );
                    telemetry.set_u8(TelemetryId::GpsNumSats, gps.sats, now);
                }
            }
            Some(CrsfFrameType::Attitude) => {
                if let Some(att) = frame.as_attitude() {
                    telemetry.set_i16(TelemetryId::AttitudeX, dec_att_angle(att.pitch), now);
                    telemetry.set_i16(TelemetryId::AttitudeY, dec_att_angle(att.roll), now);
                    // Yaw arrives as [0, 360); it becomes the heading as
                    // is and wraps into (-180, 180] for the attitude.
                    telemetry.set_i16(TelemetryId::AttitudeZ, dec_att_z(att.yaw as u16), now);
                    telemetry.set_u16(TelemetryId::Heading, dec_att_heading(att.yaw as u16), now);
                }
            }
            Some(CrsfFrameType::BatterySensor) => {
                if let Some(bat) = frame.as_battery_sensor() {
                    telemetry.set_u16(TelemetryId::BatVoltage, bat.voltage.wrapping_mul(10), now);
                    telemetry.set_i16(TelemetryId::Current, (i32::from(bat.current) * 10) as i16, now);
                    telemetry.set_i32(TelemetryId::CurrentDrawn, bat.mah_drawn as i32, now);
                    telemetry.set_u8(
                        TelemetryId::BatRemainingPercent,
                        bat.percentage_remaining,
                        now,
                    );
                }
            }
            Some(CrsfFrameType::FlightMode) => {
                if let Some(mode) = frame.as_str() {
                    telemetry.set_str(TelemetryId::FlightModeName, mode, now);
                }
            }
            Some(CrsfFrameType::MspResp) => {
                self.msp_telemetry.push_response_chunk(&frame.payload);
            }
            Some(CrsfFrameType::DeviceInfo) => {
                if let Some(name) = frame.as_str() {
                    debug!(target: "crsf.output", "device name {name}");
                }
            }
            _ => {
                warn!(
                    target: "crsf.output",
                    "unknown frame type 0x{:02X}", frame.frame_type
                );
            }
        }
    }
}

impl Default for OutputCrsf {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for OutputCrsf {
    fn name(&self) -> &'static str {
        "CRSF"
    }

    fn feed(&mut self, bytes: &[u8], telemetry: &mut TelemetryRegistry, now: TimeMicros) {
        for frame in self.port.feed(bytes) {
            self.handle_frame(&frame, telemetry, now);
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
        if !rc.is_ready() {
            return out;
        }
        if rc.failsafe.is_active() {
            // CRSF has no failsafe signalling, we just stop sending
            // control frames and the FC applies its own failsafe.
            return out;
        }
        if update_control {
            let mut channels = [crsf::CRSF_CHANNEL_VALUE_MID; CRSF_NUM_CHANNELS];
            for (i, ch) in channels.iter_mut().enumerate() {
                *ch = channel_to_digital(rc.channel(i));
            }
            let frame = CrsfFrame::new(
                addr::BROADCAST,
                CrsfFrameType::RcChannelsPacked,
                pack_channels(&channels).to_vec(),
            );
            out.control.extend_from_slice(&frame.to_bytes());
        }
        if self.next_ping <= now {
            let ping = CrsfFrame::new_extended(
                addr::BROADCAST,
                CrsfFrameType::DevicePing,
                addr::BROADCAST,
                addr::RADIO_TRANSMITTER,
                Vec::new(),
            );
            out.control.extend_from_slice(&ping.to_bytes());
            self.next_ping = now + CRSF_PING_INTERVAL;
        } else {
            let mut chunk = [0u8; CRSF_MSP_REQ_PAYLOAD_SIZE + 2];
            let n = self.msp_telemetry.pop_request_chunk(&mut chunk, now);
            if n > 0 {
                let mut payload = vec![0u8; CRSF_MSP_REQ_PAYLOAD_SIZE];
                payload[..n].copy_from_slice(&chunk[..n]);
                let frame = CrsfFrame::new_extended(
                    addr::BROADCAST,
                    CrsfFrameType::MspReq,
                    addr::FLIGHT_CONTROLLER,
                    addr::RADIO_TRANSMITTER,
                    payload,
                );
                out.control.extend_from_slice(&frame.to_bytes());
            }
        }
        out
    }
}
