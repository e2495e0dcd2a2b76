//! # Telemetry Value Registry
//!
//! The link keeps 36 typed telemetry slots in sync: 31 downlink values
//! flowing FC → RX → TX and 5 uplink values flowing TX → RX → FC. Uplink
//! identifiers have the top bit set on the wire, downlink identifiers do
//! not.
//!
//! Every set compares against the stored value and marks the slot dirty
//! through its [`DataState`] when it changed; the air scheduler then picks
//! the highest scoring dirty slot for the next free stream window.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::util::{DataState, TimeMicros};

pub const TELEMETRY_STRING_MAX_SIZE: usize = 32;
pub const TELEMETRY_UPLINK_MASK: u8 = 0x80;
pub const TELEMETRY_UPLINK_COUNT: usize = 5;
pub const TELEMETRY_DOWNLINK_COUNT: usize = 31;

/// SNR telemetry is carried in 0.25 dB steps.
pub const TELEMETRY_SNR_MULTIPLIER: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TelemetryId {
    // Downlink, FC -> RX -> TX.
    CraftName = 0x00,
    FlightModeName = 0x01,
    BatVoltage = 0x02,
    AvgCellVoltage = 0x03,
    Current = 0x04,
    CurrentDrawn = 0x05,
    BatCapacity = 0x06,
    BatRemainingPercent = 0x07,
    Altitude = 0x08,
    VerticalSpeed = 0x09,
    Heading = 0x0A,
    AccX = 0x0B,
    AccY = 0x0C,
    AccZ = 0x0D,
    AttitudeX = 0x0E,
    AttitudeY = 0x0F,
    AttitudeZ = 0x10,
    GpsFix = 0x11,
    GpsNumSats = 0x12,
    GpsLat = 0x13,
    GpsLon = 0x14,
    GpsAlt = 0x15,
    GpsSpeed = 0x16,
    GpsHeading = 0x17,
    GpsHdop = 0x18,
    RxRssiAnt1 = 0x19,
    RxRssiAnt2 = 0x1A,
    RxLinkQuality = 0x1B,
    RxSnr = 0x1C,
    RxActiveAnt = 0x1D,
    RxRfPower = 0x1E,
    // Uplink, TX -> RX -> FC.
    PilotName = 0x80,
    TxRssiAnt1 = 0x81,
    TxLinkQuality = 0x82,
    TxSnr = 0x83,
    TxRfPower = 0x84,
}

impl TelemetryId {
    pub const ALL: [TelemetryId; TELEMETRY_UPLINK_COUNT + TELEMETRY_DOWNLINK_COUNT] = [
        TelemetryId::CraftName,
        TelemetryId::FlightModeName,
        TelemetryId::BatVoltage,
        TelemetryId::AvgCellVoltage,
        TelemetryId::Current,
        TelemetryId::CurrentDrawn,
        TelemetryId::BatCapacity,
        TelemetryId::BatRemainingPercent,
        TelemetryId::Altitude,
        TelemetryId::VerticalSpeed,
        TelemetryId::Heading,
        TelemetryId::AccX,
        TelemetryId::AccY,
        TelemetryId::AccZ,
        TelemetryId::AttitudeX,
        TelemetryId::AttitudeY,
        TelemetryId::AttitudeZ,
        TelemetryId::GpsFix,
        TelemetryId::GpsNumSats,
        TelemetryId::GpsLat,
        TelemetryId::GpsLon,
        TelemetryId::GpsAlt,
        TelemetryId::GpsSpeed,
        TelemetryId::GpsHeading,
        TelemetryId::GpsHdop,
        TelemetryId::RxRssiAnt1,
        TelemetryId::RxRssiAnt2,
        TelemetryId::RxLinkQuality,
        TelemetryId::RxSnr,
        TelemetryId::RxActiveAnt,
        TelemetryId::RxRfPower,
        TelemetryId::PilotName,
        TelemetryId::TxRssiAnt1,
        TelemetryId::TxLinkQuality,
        TelemetryId::TxSnr,
        TelemetryId::TxRfPower,
    ];

    pub fn wire_id(self) -> u8 {
        self as u8
    }

    pub fn from_wire_id(id: u8) -> Option<Self> {
        TelemetryId::ALL.iter().copied().find(|t| t.wire_id() == id)
    }

    pub fn is_uplink(self) -> bool {
        self.wire_id() & TELEMETRY_UPLINK_MASK != 0
    }

    pub fn is_downlink(self) -> bool {
        !self.is_uplink()
    }

    pub fn telemetry_type(self) -> TelemetryType {
        info(self).ttype
    }

    pub fn name(self) -> &'static str {
        info(self).name
    }

    /// Wire size of the value, zero for variable-size (string) slots.
    pub fn data_size(self) -> usize {
        match self.telemetry_type() {
            TelemetryType::U8 | TelemetryType::I8 => 1,
            TelemetryType::U16 | TelemetryType::I16 => 2,
            TelemetryType::U32 | TelemetryType::I32 => 4,
            TelemetryType::String => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    /// Null terminated on the wire, at most 32 characters.
    String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    Str(String),
}

impl TelemetryValue {
    pub fn telemetry_type(&self) -> TelemetryType {
        match self {
            TelemetryValue::U8(_) => TelemetryType::U8,
            TelemetryValue::I8(_) => TelemetryType::I8,
            TelemetryValue::U16(_) => TelemetryType::U16,
            TelemetryValue::I16(_) => TelemetryType::I16,
            TelemetryValue::U32(_) => TelemetryType::U32,
            TelemetryValue::I32(_) => TelemetryType::I32,
            TelemetryValue::Str(_) => TelemetryType::String,
        }
    }

    fn zero(ttype: TelemetryType) -> Self {
        match ttype {
            TelemetryType::U8 => TelemetryValue::U8(0),
            TelemetryType::I8 => TelemetryValue::I8(0),
            TelemetryType::U16 => TelemetryValue::U16(0),
            TelemetryType::I16 => TelemetryValue::I16(0),
            TelemetryType::U32 => TelemetryValue::U32(0),
            TelemetryType::I32 => TelemetryValue::I32(0),
            TelemetryType::String => TelemetryValue::Str(String::new()),
        }
    }

    /// Little-endian wire bytes; strings carry their terminator.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            TelemetryValue::U8(v) => vec![*v],
            TelemetryValue::I8(v) => vec![*v as u8],
            TelemetryValue::U16(v) => v.to_le_bytes().to_vec(),
            TelemetryValue::I16(v) => v.to_le_bytes().to_vec(),
            TelemetryValue::U32(v) => v.to_le_bytes().to_vec(),
            TelemetryValue::I32(v) => v.to_le_bytes().to_vec(),
            TelemetryValue::Str(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.truncate(TELEMETRY_STRING_MAX_SIZE);
                bytes.push(0);
                bytes
            }
        }
    }

    /// Decode wire bytes for the given type. Strings may or may not carry
    /// their terminator.
    pub fn from_wire(ttype: TelemetryType, data: &[u8]) -> Option<Self> {
        let v = match ttype {
            TelemetryType::U8 => TelemetryValue::U8(*data.first()?),
            TelemetryType::I8 => TelemetryValue::I8(*data.first()? as i8),
            TelemetryType::U16 => TelemetryValue::U16(u16::from_le_bytes(data.try_into().ok()?)),
            TelemetryType::I16 => TelemetryValue::I16(i16::from_le_bytes(data.try_into().ok()?)),
            TelemetryType::U32 => TelemetryValue::U32(u32::from_le_bytes(data.try_into().ok()?)),
            TelemetryType::I32 => TelemetryValue::I32(i32::from_le_bytes(data.try_into().ok()?)),
            TelemetryType::String => {
                let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                let mut s = String::from_utf8_lossy(&data[..end]).into_owned();
                s.truncate(TELEMETRY_STRING_MAX_SIZE);
                TelemetryValue::Str(s)
            }
        };
        Some(v)
    }
}

struct TelemetryInfo {
    ttype: TelemetryType,
    name: &'static str,
    format: fn(&TelemetryValue) -> String,
}

fn format_str(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::Str(s) => s.clone(),
        _ => String::new(),
    }
}

fn format_dbm(v: &TelemetryValue) -> String {
    if let TelemetryValue::I8(dbm) = v {
        let mw = 10f32.powf(f32::from(*dbm) / 10.0).round() as i32;
        format!("{mw}mW")
    } else {
        String::new()
    }
}

fn format_db(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::I8(db) => format!("{db}dB"),
        _ => String::new(),
    }
}

fn format_snr(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::I8(snr) => {
            format!("{:.1}dB", f32::from(*snr) / TELEMETRY_SNR_MULTIPLIER)
        }
        _ => String::new(),
    }
}

fn format_voltage(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::U16(mv) => format!("{:.2}V", f32::from(*mv) / 100.0),
        _ => String::new(),
    }
}

fn format_current(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::I16(ca) => format!("{:.2}A", f32::from(*ca) / 100.0),
        _ => String::new(),
    }
}

fn format_mah_i32(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::I32(mah) => format!("{mah}mAh"),
        _ => String::new(),
    }
}

fn format_mah_u16(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::U16(mah) => format!("{mah}mAh"),
        _ => String::new(),
    }
}

fn format_percentage(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::U8(p) => format!("{p}%"),
        TelemetryValue::I8(p) => format!("{p}%"),
        _ => String::new(),
    }
}

fn format_altitude(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::I32(cm) => format!("{:.2}m", *cm as f32 / 100.0),
        _ => String::new(),
    }
}

fn format_vertical_speed(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::I16(cms) => format!("{:.2}m/s", f32::from(*cms) / 100.0),
        _ => String::new(),
    }
}

fn format_deg(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::U16(cdeg) => format!("{}deg", cdeg / 100),
        _ => String::new(),
    }
}

fn format_acc(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::I32(cg) => format!("{:.2}G", *cg as f32 / 100.0),
        _ => String::new(),
    }
}

fn format_att(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::I16(cdeg) => format!("{:+.2}deg", f32::from(*cdeg) / 100.0),
        _ => String::new(),
    }
}

fn format_gps_fix(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::U8(0) => "None".to_string(),
        TelemetryValue::U8(1) => "2D".to_string(),
        TelemetryValue::U8(2) => "3D".to_string(),
        _ => String::new(),
    }
}

fn format_u8(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::U8(n) => format!("{n}"),
        _ => String::new(),
    }
}

fn format_coordinate(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::I32(deg) => format!("{:.6}", *deg as f64 / 10_000_000.0),
        _ => String::new(),
    }
}

fn format_horizontal_speed(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::U16(cms) => {
            format!("{:.2}km/h", (f32::from(*cms) / 100.0) * 3.6)
        }
        _ => String::new(),
    }
}

fn format_hdop(v: &TelemetryValue) -> String {
    match v {
        TelemetryValue::U16(hdop) => format!("{:.2}", f32::from(*hdop) / 100.0),
        _ => String::new(),
    }
}

static TELEMETRY_INFO: Lazy<HashMap<u8, TelemetryInfo>> = Lazy::new(|| {
    use TelemetryId::*;
    use TelemetryType::*;
    let entries: [(TelemetryId, TelemetryType, &'static str, fn(&TelemetryValue) -> std::string::String); 36] = [
        (CraftName, String, "Craft", format_str),
        (FlightModeName, String, "Flight Mode", format_str),
        (BatVoltage, U16, "Batt. V.", format_voltage),
        (AvgCellVoltage, U16, "Avg Cell V.", format_voltage),
        (Current, I16, "Current", format_current),
        (CurrentDrawn, I32, "mAh Drawn", format_mah_i32),
        (BatCapacity, U16, "Batt. Cap.", format_mah_u16),
        (BatRemainingPercent, U8, "Batt. Rem.", format_percentage),
        (Altitude, I32, "Altitude", format_altitude),
        (VerticalSpeed, I16, "Vert. Speed", format_vertical_speed),
        (Heading, U16, "Heading", format_deg),
        (AccX, I32, "Accel X", format_acc),
        (AccY, I32, "Accel Y", format_acc),
        (AccZ, I32, "Accel Z", format_acc),
        (AttitudeX, I16, "Attitude P", format_att),
        (AttitudeY, I16, "Attitude R", format_att),
        (AttitudeZ, I16, "Attitude Y", format_att),
        (GpsFix, U8, "GPS Fix Type", format_gps_fix),
        (GpsNumSats, U8, "GPS Satellites", format_u8),
        (GpsLat, I32, "Lat", format_coordinate),
        (GpsLon, I32, "Long", format_coordinate),
        (GpsAlt, I32, "GPS Alt.", format_altitude),
        (GpsSpeed, U16, "Speed", format_horizontal_speed),
        (GpsHeading, U16, "GPS Heading", format_deg),
        (GpsHdop, U16, "GPS HDOP", format_hdop),
        (RxRssiAnt1, I8, "RX RSSI A1", format_db),
        (RxRssiAnt2, I8, "RX RSSI A2", format_db),
        (RxLinkQuality, I8, "RX LQ", format_percentage),
        (RxSnr, I8, "RX SNR", format_snr),
        (RxActiveAnt, U8, "RX Ant.", format_u8),
        (RxRfPower, I8, "RX Pwr.", format_dbm),
        (PilotName, String, "Pilot", format_str),
        (TxRssiAnt1, I8, "TX RSSI", format_db),
        (TxLinkQuality, I8, "TX LQ", format_percentage),
        (TxSnr, I8, "TX SNR", format_snr),
        (TxRfPower, I8, "TX Pwr.", format_dbm),
    ];
    entries
        .into_iter()
        .map(|(id, ttype, name, format)| (id.wire_id(), TelemetryInfo { ttype, name, format }))
        .collect()
});

fn info(id: TelemetryId) -> &'static TelemetryInfo {
    &TELEMETRY_INFO[&id.wire_id()]
}

/// One telemetry slot: its value plus scheduling state.
#[derive(Debug, Clone)]
pub struct Telemetry {
    value: TelemetryValue,
    state: DataState,
}

impl Telemetry {
    fn new(ttype: TelemetryType) -> Self {
        Self {
            value: TelemetryValue::zero(ttype),
            state: DataState::new(),
        }
    }

    pub fn value(&self) -> &TelemetryValue {
        &self.value
    }

    pub fn state(&self) -> &DataState {
        &self.state
    }

    pub fn has_value(&self) -> bool {
        self.state.has_value()
    }
}

/// All 36 telemetry slots.
pub struct TelemetryRegistry {
    slots: HashMap<u8, Telemetry>,
}

impl TelemetryRegistry {
    pub fn new() -> Self {
        let slots = TelemetryId::ALL
            .iter()
            .map(|&id| (id.wire_id(), Telemetry::new(id.telemetry_type())))
            .collect();
        Self { slots }
    }

    pub fn get(&self, id: TelemetryId) -> &Telemetry {
        &self.slots[&id.wire_id()]
    }

    fn get_mut(&mut self, id: TelemetryId) -> &mut Telemetry {
        self.slots.get_mut(&id.wire_id()).expect("all ids present")
    }

    /// Store a new value, returning whether it changed.
    pub fn set(&mut self, id: TelemetryId, value: TelemetryValue, now: TimeMicros) -> bool {
        debug_assert_eq!(value.telemetry_type(), id.telemetry_type());
        let slot = self.get_mut(id);
        let changed = slot.value != value;
        if changed {
            slot.value = value;
        }
        slot.state.update(changed, now);
        changed
    }

    pub fn set_u8(&mut self, id: TelemetryId, v: u8, now: TimeMicros) -> bool {
        self.set(id, TelemetryValue::U8(v), now)
    }

    pub fn set_i8(&mut self, id: TelemetryId, v: i8, now: TimeMicros) -> bool {
        self.set(id, TelemetryValue::I8(v), now)
    }

    pub fn set_u16(&mut self, id: TelemetryId, v: u16, now: TimeMicros) -> bool {
        self.set(id, TelemetryValue::U16(v), now)
    }

    pub fn set_i16(&mut self, id: TelemetryId, v: i16, now: TimeMicros) -> bool {
        self.set(id, TelemetryValue::I16(v), now)
    }

    pub fn set_u32(&mut self, id: TelemetryId, v: u32, now: TimeMicros) -> bool {
        self.set(id, TelemetryValue::U32(v), now)
    }

    pub fn set_i32(&mut self, id: TelemetryId, v: i32, now: TimeMicros) -> bool {
        self.set(id, TelemetryValue::I32(v), now)
    }

    pub fn set_str(&mut self, id: TelemetryId, s: &str, now: TimeMicros) -> bool {
        let mut s = s.to_string();
        s.truncate(TELEMETRY_STRING_MAX_SIZE);
        self.set(id, TelemetryValue::Str(s), now)
    }

    /// Store a value decoded from wire bytes, returning whether it
    /// changed. `None` when the bytes do not fit the slot type.
    pub fn set_wire(&mut self, id: TelemetryId, data: &[u8], now: TimeMicros) -> Option<bool> {
        let value = TelemetryValue::from_wire(id.telemetry_type(), data)?;
        Some(self.set(id, value, now))
    }

    /// Human-readable rendering of the slot value.
    pub fn format(&self, id: TelemetryId) -> String {
        (info(id).format)(&self.get(id).value)
    }

    /// Record that a slot was sent over the air.
    pub fn sent(&mut self, id: TelemetryId, ack_at_seq: Option<u8>, now: TimeMicros) {
        self.get_mut(id).state.sent(ack_at_seq, now);
    }

    /// Propagate a peer acknowledge to every slot waiting on it.
    pub fn update_ack_received(&mut self, seq: u8) {
        for slot in self.slots.values_mut() {
            slot.state.update_ack_received(seq);
        }
    }

    /// The dirty slot with the highest scheduling score in the given
    /// direction, if any.
    pub fn highest_scoring_dirty(&self, uplink: bool, now: TimeMicros) -> Option<TelemetryId> {
        TelemetryId::ALL
            .iter()
            .copied()
            .filter(|id| id.is_uplink() == uplink)
            .filter(|id| {
                let slot = self.get(*id);
                slot.has_value() && slot.state.is_dirty()
            })
            .max_by_key(|id| self.get(*id).state.score(now))
    }
}

impl Default for TelemetryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_spaces() {
        assert_eq!(
            TelemetryId::ALL.iter().filter(|id| id.is_uplink()).count(),
            TELEMETRY_UPLINK_COUNT
        );
        assert_eq!(
            TelemetryId::ALL.iter().filter(|id| id.is_downlink()).count(),
            TELEMETRY_DOWNLINK_COUNT
        );
        assert_eq!(TelemetryId::from_wire_id(0x80), Some(TelemetryId::PilotName));
        assert_eq!(TelemetryId::from_wire_id(0x1E), Some(TelemetryId::RxRfPower));
        assert_eq!(TelemetryId::from_wire_id(0x1F), None);
    }

    #[test]
    fn test_change_detection() {
        let mut reg = TelemetryRegistry::new();
        assert!(reg.set_u16(TelemetryId::BatVoltage, 1680, 100));
        assert!(!reg.set_u16(TelemetryId::BatVoltage, 1680, 200));
        assert!(reg.set_u16(TelemetryId::BatVoltage, 1679, 300));
        assert!(reg.get(TelemetryId::BatVoltage).state().is_dirty());
    }

    #[test]
    fn test_formatting() {
        let mut reg = TelemetryRegistry::new();
        reg.set_u16(TelemetryId::BatVoltage, 2345, 1);
        assert_eq!(reg.format(TelemetryId::BatVoltage), "23.45V");
        reg.set_i8(TelemetryId::RxRssiAnt1, -12, 1);
        assert_eq!(reg.format(TelemetryId::RxRssiAnt1), "-12dB");
        reg.set_u8(TelemetryId::BatRemainingPercent, 87, 1);
        assert_eq!(reg.format(TelemetryId::BatRemainingPercent), "87%");
        reg.set_i8(TelemetryId::TxSnr, 10, 1);
        assert_eq!(reg.format(TelemetryId::TxSnr), "2.5dB");
        reg.set_u8(TelemetryId::GpsFix, 2, 1);
        assert_eq!(reg.format(TelemetryId::GpsFix), "3D");
        reg.set_i8(TelemetryId::TxRfPower, 20, 1);
        assert_eq!(reg.format(TelemetryId::TxRfPower), "100mW");
    }

    #[test]
    fn test_wire_round_trip() {
        let mut reg = TelemetryRegistry::new();
        reg.set_i32(TelemetryId::GpsLat, -123_456_789, 10);
        let wire = reg.get(TelemetryId::GpsLat).value().to_wire();
        assert_eq!(wire.len(), 4);
        let mut other = TelemetryRegistry::new();
        assert_eq!(other.set_wire(TelemetryId::GpsLat, &wire, 20), Some(true));
        assert_eq!(
            other.get(TelemetryId::GpsLat).value(),
            &TelemetryValue::I32(-123_456_789)
        );

        reg.set_str(TelemetryId::CraftName, "Raven", 30);
        let wire = reg.get(TelemetryId::CraftName).value().to_wire();
        assert_eq!(wire.last(), Some(&0));
        assert_eq!(other.set_wire(TelemetryId::CraftName, &wire, 40), Some(true));
        assert_eq!(other.format(TelemetryId::CraftName), "Raven");
    }

    #[test]
    fn test_scheduling_priority() {
        let mut reg = TelemetryRegistry::new();
        reg.set_u16(TelemetryId::BatVoltage, 1680, 1_000);
        reg.set_i32(TelemetryId::Altitude, 150, 2_000);
        // The older change scores higher.
        assert_eq!(
            reg.highest_scoring_dirty(false, 10_000),
            Some(TelemetryId::BatVoltage)
        );
        reg.sent(TelemetryId::BatVoltage, None, 10_000);
        assert_eq!(
            reg.highest_scoring_dirty(false, 11_000),
            Some(TelemetryId::Altitude)
        );
        // Uplink slots are scheduled separately.
        assert_eq!(reg.highest_scoring_dirty(true, 11_000), None);
        reg.set_str(TelemetryId::PilotName, "ace", 12_000);
        assert_eq!(
            reg.highest_scoring_dirty(true, 13_000),
            Some(TelemetryId::PilotName)
        );
    }
}
