//! # MSP Output
//!
//! Talks MSP v1 straight to the FC: control goes out as `MSP_SET_RAW_RC`
//! (up to 18 channels of plain microseconds), telemetry comes back from
//! a polling schedule over the analog, GPS, attitude, altitude and IMU
//! commands. Slow polls fetch configuration (battery capacity, current
//! meter style) that changes how the fast data is interpreted.

use std::sync::{Arc, Mutex};

use log::debug;

use crate::msp::{
    MspConn, MspSerial, MSP_ALTITUDE, MSP_ANALOG, MSP_ATTITUDE, MSP_CURRENT_METER_CONFIG,
    MSP_MISC, MSP_RAW_GPS, MSP_RAW_IMU, MSP_SET_RAW_RC,
};
use crate::output::{calculate_battery_remaining, Output, OutputBytes};
use crate::rc::data::{RcData, RC_CHANNELS_NUM};
use crate::rc::telemetry::{TelemetryId, TelemetryRegistry};
use crate::util::{TimeMicros, MICROS_PER_MILLI, MICROS_PER_SEC};

/// iNav and betaflight accept up to this many channels per request.
pub const MSP_RC_MAX_SUPPORTED_CHANNELS: usize = 18;

const POLL_INTERVAL_SLOW: TimeMicros = 10 * MICROS_PER_SEC;
const POLL_INTERVAL_NORMAL: TimeMicros = 500 * MICROS_PER_MILLI;
const POLL_INTERVAL_FAST: TimeMicros = 250 * MICROS_PER_MILLI;

struct MspPoll {
    cmd: u16,
    interval: TimeMicros,
    next_poll: TimeMicros,
}

impl MspPoll {
    fn new(cmd: u16, interval: TimeMicros) -> Self {
        Self {
            cmd,
            interval,
            next_poll: 0,
        }
    }
}

type Inbox = Arc<Mutex<Vec<(u16, Vec<u8>)>>>;

pub struct OutputMsp {
    serial: MspSerial,
    conn: MspConn,
    inbox: Inbox,
    polls: Vec<MspPoll>,
    multiwii_current_meter_output: bool,
}

impl OutputMsp {
    pub fn new() -> Self {
        Self {
            serial: MspSerial::new(),
            conn: MspConn::new(),
            inbox: Arc::new(Mutex::new(Vec::new())),
            polls: vec![
                MspPoll::new(MSP_ANALOG, POLL_INTERVAL_NORMAL),
                MspPoll::new(MSP_CURRENT_METER_CONFIG, POLL_INTERVAL_SLOW),
                MspPoll::new(MSP_ALTITUDE, POLL_INTERVAL_NORMAL),
                MspPoll::new(MSP_ATTITUDE, POLL_INTERVAL_FAST),
                MspPoll::new(MSP_RAW_IMU, POLL_INTERVAL_FAST),
                MspPoll::new(MSP_RAW_GPS, POLL_INTERVAL_NORMAL),
                MspPoll::new(MSP_MISC, POLL_INTERVAL_SLOW),
            ],
            multiwii_current_meter_output: false,
        }
    }

    fn handle_message(
        &mut self,
        cmd: u16,
        payload: &[u8],
        telemetry: &mut TelemetryRegistry,
        now: TimeMicros,
    ) {
        match cmd {
            MSP_RAW_GPS => {
                if payload.len() < 18 {
                    return;
                }
                // fix, sats, lat, lon, alt (m), speed (cm/s),
                // course (0.1 deg), hdop.
                telemetry.set_u8(TelemetryId::GpsFix, payload[0], now);
                telemetry.set_u8(TelemetryId::GpsNumSats, payload[1], now);
                telemetry.set_i32(
                    TelemetryId::GpsLat,
                    i32::from_le_bytes(payload[2..6].try_into().unwrap()),
                    now,
                );
                telemetry.set_i32(
                    TelemetryId::GpsLon,
                    i32::from_le_bytes(payload[6..10].try_into().unwrap()),
                    now,
                );
                let alt_m = u16::from_le_bytes(payload[10..12].try_into().unwrap());
                telemetry.set_i32(TelemetryId::GpsAlt, i32::from(alt_m) * 100, now);
                telemetry.set_u16(
                    TelemetryId::GpsSpeed,
                    u16::from_le_bytes(payload[12..14].try_into().unwrap()),
                    now,
                );
                let course = u16::from_le_bytes(payload[14..16].try_into().unwrap());
                telemetry.set_u16(TelemetryId::GpsHeading, course.wrapping_mul(10), now);
                telemetry.set_u16(
                    TelemetryId::GpsHdop,
                    u16::from_le_bytes(payload[16..18].try_into().unwrap()),
                    now,
                );
            }
            MSP_ANALOG => {
                if payload.len() < 7 {
                    return;
                }
                // vbat (0.1 V), mah drawn, rssi, current.
                telemetry.set_u16(TelemetryId::BatVoltage, u16::from(payload[0]) * 10, now);
                let mah = u16::from_le_bytes(payload[1..3].try_into().unwrap());
                telemetry.set_i32(TelemetryId::CurrentDrawn, i32::from(mah), now);
                calculate_battery_remaining(telemetry, now);
                let current = i16::from_le_bytes(payload[5..7].try_into().unwrap());
                let current = if self.multiwii_current_meter_output {
                    // multiwii style, 0.001 A.
                    current / 10
                } else {
                    current
                };
                telemetry.set_i16(TelemetryId::Current, current, now);
            }
            MSP_CURRENT_METER_CONFIG => {
                if payload.len() < 7 {
                    return;
                }
                let capacity = u16::from_le_bytes(payload[5..7].try_into().unwrap());
                telemetry.set_u16(TelemetryId::BatCapacity, capacity, now);
            }
            MSP_ALTITUDE => {
                if payload.len() < 6 {
                    return;
                }
                telemetry.set_i32(
                    TelemetryId::Altitude,
                    i32::from_le_bytes(payload[0..4].try_into().unwrap()),
                    now,
                );
                telemetry.set_i16(
                    TelemetryId::VerticalSpeed,
                    i16::from_le_bytes(payload[4..6].try_into().unwrap()),
                    now,
                );
            }
            MSP_ATTITUDE => {
                if payload.len() < 6 {
                    return;
                }
                // roll and pitch in 0.1 deg, yaw in whole degrees.
                let roll = i16::from_le_bytes(payload[0..2].try_into().unwrap());
                let pitch = i16::from_le_bytes(payload[2..4].try_into().unwrap());
                let yaw = i16::from_le_bytes(payload[4..6].try_into().unwrap());
                telemetry.set_i16(TelemetryId::AttitudeX, pitch.wrapping_mul(10), now);
                telemetry.set_i16(TelemetryId::AttitudeY, roll.wrapping_mul(10), now);
                let wrapped = if yaw > 180 { yaw - 360 } else { yaw };
                telemetry.set_i16(TelemetryId::AttitudeZ, wrapped.wrapping_mul(100), now);
                telemetry.set_u16(TelemetryId::Heading, (yaw as u16).wrapping_mul(100), now);
            }
            MSP_RAW_IMU => {
                if payload.len() < 6 {
                    return;
                }
                // Accelerometer in 1G * 512, converted to 0.01 G.
                for (i, id) in [TelemetryId::AccX, TelemetryId::AccY, TelemetryId::AccZ]
                    .into_iter()
                    .enumerate()
                {
                    let acc =
                        i16::from_le_bytes(payload[i * 2..i * 2 + 2].try_into().unwrap());
                    telemetry.set_i32(id, (f32::from(acc) * (100.0 / 512.0)) as i32, now);
                }
            }
            MSP_MISC => {
                if payload.len() < 16 {
                    return;
                }
                self.multiwii_current_meter_output = payload[13] != 0;
                debug!(
                    target: "msp.output",
                    "multiwii current meter output: {}", self.multiwii_current_meter_output
                );
            }
            _ => {}
        }
    }

    fn poll_callback(&self) -> crate::msp::MspCallback {
        let inbox = self.inbox.clone();
        Box::new(move |cmd, payload| {
            if let Ok(data) = payload {
                inbox.lock().unwrap().push((cmd, data.to_vec()));
            }
        })
    }
}

impl Default for OutputMsp {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for OutputMsp {
    fn name(&self) -> &'static str {
        "MSP"
    }

    fn feed(&mut self, bytes: &[u8], telemetry: &mut TelemetryRegistry, now: TimeMicros) {
        self.serial.feed(bytes);
        self.conn.update(&mut self.serial);
        let messages: Vec<(u16, Vec<u8>)> = self.inbox.lock().unwrap().drain(..).collect();
        for (cmd, payload) in messages {
            self.handle_message(cmd, &payload, telemetry, now);
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
        // Failsafe over MSP is signalled by going silent: the FC detects
        // the missing SET_RAW_RC updates by timeout.
        if update_control && rc.is_ready() && !rc.failsafe.is_active() {
            let mut payload = Vec::with_capacity(MSP_RC_MAX_SUPPORTED_CHANNELS * 2);
            for i in 0..MSP_RC_MAX_SUPPORTED_CHANNELS {
                let value = if i < RC_CHANNELS_NUM {
                    rc.channel(i)
                } else {
                    1000
                };
                payload.extend_from_slice(&value.to_le_bytes());
            }
            let _ = self
                .conn
                .send(&mut self.serial, MSP_SET_RAW_RC, &payload, None);
        }
        for i in 0..self.polls.len() {
            if self.polls[i].next_poll <= now {
                let cmd = self.polls[i].cmd;
                let callback = self.poll_callback();
                if self
                    .conn
                    .send(&mut self.serial, cmd, &[], Some(callback))
                    .is_ok()
                {
                    let interval = self.polls[i].interval;
                    self.polls[i].next_poll = now + interval;
                }
            }
        }
        out.control = self.serial.take_output();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msp::serial::pack_frame;
    use crate::msp::MspDirection;

    fn ready_rc() -> RcData {
        let mut rc = RcData::new();
        rc.set_channel(0, 1500, 1);
        rc
    }

    #[test]
    fn test_set_raw_rc_payload() {
        let mut output = OutputMsp::new();
        let mut telemetry = TelemetryRegistry::new();
        let mut rc = ready_rc();
        rc.set_channel(1, 1234, 1);
        let out = output.update(&rc, &mut telemetry, true, 0);
        // The first frame is SET_RAW_RC with 18 u16 channels.
        assert_eq!(&out.control[..3], b"$M<");
        assert_eq!(out.control[3] as usize, MSP_RC_MAX_SUPPORTED_CHANNELS * 2);
        assert_eq!(out.control[4], MSP_SET_RAW_RC as u8);
        let ch1 = u16::from_le_bytes([out.control[7], out.control[8]]);
        assert_eq!(ch1, 1234);
    }

    #[test]
    fn test_poll_schedule() {
        let mut output = OutputMsp::new();
        let mut telemetry = TelemetryRegistry::new();
        let rc = ready_rc();
        let frame_count = |bytes: &[u8]| {
            bytes
                .windows(2)
                .filter(|w| w[0] == b'$' && w[1] == b'M')
                .count()
        };
        let first = output.update(&rc, &mut telemetry, false, 0);
        // All seven polls fire on the first pass.
        assert_eq!(frame_count(&first.control), 7);
        // Nothing is due right away.
        let second = output.update(&rc, &mut telemetry, false, 1_000);
        assert!(second.control.is_empty());
        // The fast polls come back after their interval.
        let third = output.update(&rc, &mut telemetry, false, POLL_INTERVAL_FAST + 1);
        assert_eq!(frame_count(&third.control), 2);
    }

    #[test]
    fn test_analog_response_updates_telemetry() {
        let mut output = OutputMsp::new();
        let mut telemetry = TelemetryRegistry::new();
        let rc = ready_rc();
        output.update(&rc, &mut telemetry, false, 0);

        // vbat 16.8 V, 1000 mAh drawn, rssi 0, 12.3 A.
        let mut payload = vec![168];
        payload.extend_from_slice(&1000u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&1230i16.to_le_bytes());
        let frame = pack_frame(MspDirection::FromFc, MSP_ANALOG, &payload).unwrap();
        output.feed(&frame, &mut telemetry, 10);
        assert_eq!(telemetry.format(TelemetryId::BatVoltage), "16.80V");
        assert_eq!(telemetry.format(TelemetryId::CurrentDrawn), "1000mAh");
        assert_eq!(telemetry.format(TelemetryId::Current), "12.30A");
    }

    #[test]
    fn test_attitude_response() {
        let mut output = OutputMsp::new();
        let mut telemetry = TelemetryRegistry::new();
        let rc = ready_rc();
        output.update(&rc, &mut telemetry, false, 0);

        let mut payload = Vec::new();
        payload.extend_from_slice(&100i16.to_le_bytes()); // roll 10 deg
        payload.extend_from_slice(&(-50i16).to_le_bytes()); // pitch -5 deg
        payload.extend_from_slice(&270i16.to_le_bytes()); // yaw 270 deg
        let frame = pack_frame(MspDirection::FromFc, MSP_ATTITUDE, &payload).unwrap();
        output.feed(&frame, &mut telemetry, 10);
        assert_eq!(telemetry.format(TelemetryId::AttitudeY), "+10.00deg");
        assert_eq!(telemetry.format(TelemetryId::AttitudeX), "-5.00deg");
        assert_eq!(telemetry.format(TelemetryId::AttitudeZ), "-90.00deg");
        assert_eq!(telemetry.format(TelemetryId::Heading), "270deg");
    }

    #[test]
    fn test_failsafe_goes_silent() {
        let mut output = OutputMsp::new();
        let mut telemetry = TelemetryRegistry::new();
        let mut rc = ready_rc();
        rc.failsafe.activate(5);
        let out = output.update(&rc, &mut telemetry, true, 10);
        // Polls still run, but no SET_RAW_RC goes out.
        assert!(!out
            .control
            .windows(5)
            .any(|w| w[..2] == *b"$M" && w[4] == MSP_SET_RAW_RC as u8));
    }
}
