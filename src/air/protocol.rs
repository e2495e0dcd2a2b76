//! # Air Protocol Core
//!
//! The cycle-driven state machine over the radio. Two phases:
//!
//! - **Bind**: the transmitter broadcasts bind requests carrying a fresh
//!   pairing key on well-known radio parameters; a receiver in bind mode
//!   adopts the pairing and answers with an accept packet. Both sides
//!   persist the pairing and derive the sync word from the key.
//! - **Active**: every cycle the TX sends a data packet with the four
//!   stick channels and a stream window; the RX answers with diagnostics
//!   and its own stream window. Frequencies hop per cycle along a
//!   key-derived sequence. Sustained quality promotes the link to a
//!   faster mode, consecutive downlink losses demote it to a longer one;
//!   switches are armed via `SwitchModeAck` and applied right before the
//!   agreed sequence number is transmitted.

use log::{debug, info, warn};

use crate::air::cmd::{AirCmd, SwitchModeAck};
use crate::air::mode::{AirMode, AirModeMask};
use crate::air::packet::{AirRxPacket, AirTxPacket};
use crate::air::pairing::{
    AirAddr, AirBindPacket, AirKey, AirPairing, BindPacketType, Capabilities, BIND_PACKET_SIZE,
};
use crate::air::radio::{Radio, RadioError};
use crate::air::stream::{AirStream, AirStreamEvent, StreamRole};
use crate::air::{seq_next, AIR_SEQ_MASK};
use crate::msp::MspAirTransport;
use crate::rc::data::{RcData, RC_CHANNELS_NUM};
use crate::rc::telemetry::{TelemetryId, TelemetryRegistry};
use crate::util::{crc8_dvb_s2_bytes_from, TimeMicros, MICROS_PER_MILLI};

/// Sync word used while binding, before a key exists.
pub const BIND_SYNC_WORD: u8 = 0x12;
pub const BIND_PACKET_INTERVAL: TimeMicros = 500 * MICROS_PER_MILLI;

/// Channels in the hopping sequence.
pub const AIR_NUM_HOP_FREQUENCIES: usize = 24;
/// Spacing between hop channels.
pub const AIR_HOP_SPACING_HZ: u64 = 250_000;

/// Switch is armed this many sequence numbers ahead, leaving one full
/// round trip for the acknowledge to land.
const SWITCH_SEQ_DELAY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirRole {
    Tx,
    Rx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Bind,
    Active,
}

/// Things the owner of the protocol needs to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum AirProtocolEvent {
    /// A pairing was established; persist it.
    Bound(AirPairing),
    /// The active mode changed.
    ModeChanged(AirMode),
    /// An MSP payload arrived over the stream; route it to the local MSP
    /// endpoint (`MspAirTransport::decode` understands the bytes).
    MspPayload(Vec<u8>),
    /// A remote-protocol payload arrived over the stream.
    RmpPayload(Vec<u8>),
    /// No valid peer packet within the failsafe interval.
    FailsafeActivated,
    /// The link recovered.
    FailsafeCleared,
}

pub struct AirProtocolConfig {
    pub role: AirRole,
    pub local_addr: AirAddr,
    /// Band base frequency the hop sequence starts from.
    pub base_frequency_hz: u64,
    pub supported_modes: AirModeMask,
    pub initial_mode: AirMode,
    pub capabilities: Capabilities,
    /// Values the RX emits to the FC while in failsafe.
    pub failsafe_channels: [u16; RC_CHANNELS_NUM],
    /// Demote to a longer mode after this many consecutive lost downlink
    /// packets.
    pub demote_after_lost: u32,
}

impl AirProtocolConfig {
    pub fn new(role: AirRole, local_addr: AirAddr) -> Self {
        Self {
            role,
            local_addr,
            base_frequency_hz: crate::constants::Band::Band433.base_frequency_hz(),
            supported_modes: AirModeMask::all(),
            initial_mode: AirMode::Mode2,
            capabilities: Capabilities::FREQUENCY_433MHZ,
            failsafe_channels: [crate::rc::data::CHANNEL_CENTER_VALUE; RC_CHANNELS_NUM],
            demote_after_lost: 5,
        }
    }
}

/// Hop frequency for the given cycle counter, derived from the key so
/// mispaired links do not even share a channel plan.
pub fn hop_frequency(key: &AirKey, base_hz: u64, hop: u32) -> u64 {
    let idx = crc8_dvb_s2_bytes_from(key.crc_seed(), &hop.to_le_bytes());
    base_hz + u64::from(idx) % AIR_NUM_HOP_FREQUENCIES as u64 * AIR_HOP_SPACING_HZ
}

pub struct AirProtocol<R: Radio> {
    radio: R,
    config: AirProtocolConfig,
    phase: Phase,
    pairing: Option<AirPairing>,
    /// Key offered in our bind requests (TX role only).
    bind_key: Option<AirKey>,
    mode: AirMode,
    stream: AirStream,
    msp_air: MspAirTransport,
    tx_seq: u8,
    next_packet: TimeMicros,
    hop: u32,
    last_valid_peer_packet: TimeMicros,
    consecutive_downlink_lost: u32,
    good_cycles: u32,
    /// Mode we proposed and are waiting to see acknowledged.
    proposed_mode: Option<AirMode>,
    /// Armed switch, applied right before transmitting its sequence.
    armed_switch: Option<SwitchModeAck>,
    failsafe_active: bool,
    activated: bool,
}

impl<R: Radio> AirProtocol<R> {
    pub fn new(radio: R, config: AirProtocolConfig) -> Self {
        let stream_role = match config.role {
            AirRole::Tx => StreamRole::Uplink,
            AirRole::Rx => StreamRole::Downlink,
        };
        let mode = config.initial_mode;
        Self {
            radio,
            config,
            phase: Phase::Bind,
            pairing: None,
            bind_key: None,
            mode,
            stream: AirStream::new(stream_role),
            msp_air: MspAirTransport::new(),
            tx_seq: 0,
            next_packet: 0,
            hop: 0,
            last_valid_peer_packet: 0,
            consecutive_downlink_lost: 0,
            good_cycles: 0,
            proposed_mode: None,
            armed_switch: None,
            failsafe_active: false,
            activated: false,
        }
    }

    /// Start with a stored pairing, skipping the bind phase.
    pub fn with_pairing(radio: R, config: AirProtocolConfig, pairing: AirPairing) -> Self {
        let mut proto = Self::new(radio, config);
        proto.pairing = Some(pairing);
        proto.phase = Phase::Active;
        proto
    }

    pub fn role(&self) -> AirRole {
        self.config.role
    }

    pub fn mode(&self) -> AirMode {
        self.mode
    }

    pub fn pairing(&self) -> Option<&AirPairing> {
        self.pairing.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.pairing.is_some()
    }

    pub fn is_failsafe_active(&self) -> bool {
        self.failsafe_active
    }

    /// The MSP tunnel riding this link.
    pub fn msp(&mut self) -> &mut MspAirTransport {
        &mut self.msp_air
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Direct access to the stream, for queueing commands out of band.
    pub fn stream(&mut self) -> &mut AirStream {
        &mut self.stream
    }

    /// Drive the protocol. Call at least once per cycle time.
    pub fn update(
        &mut self,
        rc: &mut RcData,
        telemetry: &mut TelemetryRegistry,
        now: TimeMicros,
    ) -> Result<Vec<AirProtocolEvent>, RadioError> {
        match self.phase {
            Phase::Bind => self.update_bind(now),
            Phase::Active => self.update_active(rc, telemetry, now),
        }
    }

    fn update_bind(&mut self, now: TimeMicros) -> Result<Vec<AirProtocolEvent>, RadioError> {
        let mut events = Vec::new();
        if !self.activated {
            self.radio.set_frequency(self.config.base_frequency_hz)?;
            self.radio.set_sync_word(BIND_SYNC_WORD)?;
            self.radio.set_mode(AirMode::LONGEST)?;
            self.activated = true;
        }

        let mut buf = [0u8; BIND_PACKET_SIZE];
        while let Some(n) = self.radio.receive(&mut buf)? {
            let packet = match AirBindPacket::unpack(&buf[..n]) {
                Some(p) => p,
                None => continue,
            };
            match (self.config.role, packet.packet_type) {
                (AirRole::Rx, BindPacketType::Request) => {
                    info!(target: "air", "bind request from {}", packet.addr);
                    let pairing = packet.pairing();
                    let accept = AirBindPacket::new(
                        BindPacketType::Accept,
                        self.config.local_addr,
                        pairing.key.clone(),
                        self.config.capabilities,
                        RC_CHANNELS_NUM as u8,
                    );
                    self.radio.transmit(&accept.pack())?;
                    events.push(AirProtocolEvent::Bound(pairing.clone()));
                    self.enter_active(pairing, now)?;
                    return Ok(events);
                }
                (AirRole::Tx, BindPacketType::Accept) => {
                    let offered = match &self.bind_key {
                        Some(k) => k,
                        None => continue,
                    };
                    if packet.key != *offered {
                        debug!(target: "air", "bind accept under a foreign key, ignoring");
                        continue;
                    }
                    info!(target: "air", "bind accepted by {}", packet.addr);
                    let pairing = AirPairing {
                        addr: packet.addr,
                        key: offered.clone(),
                    };
                    events.push(AirProtocolEvent::Bound(pairing.clone()));
                    self.enter_active(pairing, now)?;
                    return Ok(events);
                }
                _ => {}
            }
        }

        if self.config.role == AirRole::Tx && self.next_packet <= now {
            let key = match &self.bind_key {
                Some(k) => k.clone(),
                None => {
                    let key = AirKey::generate(&mut rand::thread_rng());
                    self.bind_key = Some(key.clone());
                    key
                }
            };
            let request = AirBindPacket::new(
                BindPacketType::Request,
                self.config.local_addr,
                key,
                self.config.capabilities,
                RC_CHANNELS_NUM as u8,
            );
            self.radio.transmit(&request.pack())?;
            self.next_packet = now + BIND_PACKET_INTERVAL;
        }
        Ok(events)
    }

    fn enter_active(&mut self, pairing: AirPairing, now: TimeMicros) -> Result<(), RadioError> {
        self.pairing = Some(pairing);
        self.activate_radio()?;
        self.phase = Phase::Active;
        self.tx_seq = 0;
        self.next_packet = now;
        self.last_valid_peer_packet = now;
        Ok(())
    }

    /// Install the pairing-derived radio parameters.
    fn activate_radio(&mut self) -> Result<(), RadioError> {
        let key = match &self.pairing {
            Some(p) => p.key.clone(),
            None => return Ok(()),
        };
        self.radio.open()?;
        self.radio.set_sync_word(key.sync_word())?;
        self.radio.set_mode(self.mode)?;
        self.hop = 0;
        self.radio.set_frequency(hop_frequency(
            &key,
            self.config.base_frequency_hz,
            self.hop,
        ))?;
        self.activated = true;
        Ok(())
    }

    fn update_active(
        &mut self,
        rc: &mut RcData,
        telemetry: &mut TelemetryRegistry,
        now: TimeMicros,
    ) -> Result<Vec<AirProtocolEvent>, RadioError> {
        let mut events = Vec::new();
        if !self.activated {
            // Started from a stored pairing, the radio still needs its
            // parameters.
            self.activate_radio()?;
            self.last_valid_peer_packet = now;
        }
        self.receive_peer_packets(rc, telemetry, now, &mut events)?;

        // Both ends pace on the cycle timer; on the RX it doubles as
        // recovery traffic while the link is down.
        let send_due = self.next_packet <= now;
        if send_due {
            self.apply_armed_switch(&mut events)?;
            self.schedule_stream_data(telemetry, now);
            self.consider_mode_switch(telemetry, now);
            self.send_packet(rc, now)?;
        }

        self.update_failsafe(rc, now, &mut events);
        Ok(events)
    }

    fn receive_peer_packets(
        &mut self,
        rc: &mut RcData,
        telemetry: &mut TelemetryRegistry,
        now: TimeMicros,
        events: &mut Vec<AirProtocolEvent>,
    ) -> Result<(), RadioError> {
        let key = match &self.pairing {
            Some(p) => p.key.clone(),
            None => return Ok(()),
        };
        let mut buf = [0u8; 64];
        while let Some(n) = self.radio.receive(&mut buf)? {
            let (seq, stream_bytes) = match self.config.role {
                AirRole::Tx => {
                    let packet = match AirRxPacket::unpack(&buf[..n], &key) {
                        Some(p) => p,
                        None => {
                            debug!(target: "air", "dropping packet with invalid keyed CRC");
                            continue;
                        }
                    };
                    // The RX's view of the uplink travels in the packet
                    // header; our own measurement of the downlink feeds
                    // the uplink diagnostics.
                    telemetry.set_i8(TelemetryId::RxRssiAnt1, packet.rssi, now);
                    telemetry.set_i8(TelemetryId::RxSnr, packet.snr, now);
                    telemetry.set_i8(TelemetryId::RxLinkQuality, packet.lq as i8, now);
                    telemetry.set_u8(TelemetryId::RxActiveAnt, packet.active_antenna, now);
                    let snapshot = self.radio.link_snapshot();
                    telemetry.set_i8(TelemetryId::TxRssiAnt1, snapshot.rssi, now);
                    telemetry.set_i8(TelemetryId::TxSnr, snapshot.snr, now);
                    telemetry.set_i8(TelemetryId::TxLinkQuality, snapshot.lq as i8, now);
                    (packet.seq, packet.stream)
                }
                AirRole::Rx => {
                    let packet = match AirTxPacket::unpack(&buf[..n], &key) {
                        Some(p) => p,
                        None => {
                            debug!(target: "air", "dropping packet with invalid keyed CRC");
                            continue;
                        }
                    };
                    for (i, &ch) in packet.channels.iter().enumerate() {
                        rc.set_channel(i, ch, now);
                    }
                    let snapshot = self.radio.link_snapshot();
                    telemetry.set_i8(TelemetryId::RxRssiAnt1, snapshot.rssi, now);
                    telemetry.set_i8(TelemetryId::RxSnr, snapshot.snr, now);
                    telemetry.set_i8(TelemetryId::RxLinkQuality, snapshot.lq as i8, now);
                    (packet.seq, packet.stream)
                }
            };
            self.last_valid_peer_packet = now;
            self.consecutive_downlink_lost = 0;
            self.good_cycles = self.good_cycles.saturating_add(1);
            telemetry.update_ack_received(seq);
            for event in self.stream.feed_input(seq, &stream_bytes, now) {
                self.handle_stream_event(rc, telemetry, event, now, events);
            }
        }
        Ok(())
    }

    fn handle_stream_event(
        &mut self,
        rc: &mut RcData,
        telemetry: &mut TelemetryRegistry,
        event: AirStreamEvent,
        now: TimeMicros,
        events: &mut Vec<AirProtocolEvent>,
    ) {
        match event {
            AirStreamEvent::Channel { chn, value } => {
                rc.set_channel(chn, value, now);
            }
            AirStreamEvent::Telemetry { id, value } => {
                telemetry.set(id, value, now);
            }
            AirStreamEvent::Cmd { cmd, data } => {
                self.handle_cmd(cmd, &data, events);
            }
        }
    }

    fn handle_cmd(&mut self, cmd: AirCmd, data: &[u8], events: &mut Vec<AirProtocolEvent>) {
        match cmd {
            AirCmd::SwitchMode1
            | AirCmd::SwitchMode2
            | AirCmd::SwitchMode3
            | AirCmd::SwitchMode4
            | AirCmd::SwitchMode5 => {
                let mode = cmd.switch_mode().expect("switch commands carry a mode");
                if self.config.supported_modes.contains(mode) {
                    let ack = SwitchModeAck {
                        mode,
                        at_tx_seq: (self.tx_seq + SWITCH_SEQ_DELAY) & AIR_SEQ_MASK,
                    };
                    self.armed_switch = Some(ack);
                    self.stream.feed_output_cmd(AirCmd::SwitchModeAck, &[ack.pack()]);
                    info!(
                        target: "air",
                        "peer proposed mode {}, switching at seq {}", mode.index(), ack.at_tx_seq
                    );
                } else {
                    self.stream
                        .feed_output_cmd(AirCmd::RejectMode, &[mode.index() as u8]);
                    info!(target: "air", "rejecting unsupported mode {}", mode.index());
                }
            }
            AirCmd::SwitchModeAck => {
                if let Some(ack) = data.first().copied().and_then(SwitchModeAck::unpack) {
                    if self.proposed_mode == Some(ack.mode) {
                        self.armed_switch = Some(ack);
                        self.proposed_mode = None;
                    } else {
                        warn!(
                            target: "air",
                            "acknowledge for mode {} we did not propose", ack.mode.index()
                        );
                    }
                }
            }
            AirCmd::RejectMode => {
                info!(target: "air", "peer rejected mode switch");
                self.proposed_mode = None;
                self.good_cycles = 0;
            }
            AirCmd::Msp => events.push(AirProtocolEvent::MspPayload(data.to_vec())),
            AirCmd::Rmp => events.push(AirProtocolEvent::RmpPayload(data.to_vec())),
        }
    }

    fn apply_armed_switch(
        &mut self,
        events: &mut Vec<AirProtocolEvent>,
    ) -> Result<(), RadioError> {
        if let Some(ack) = self.armed_switch {
            if ack.proceed_at(self.tx_seq) {
                info!(target: "air", "switching to mode {}", ack.mode.index());
                self.mode = ack.mode;
                self.radio.set_mode(self.mode)?;
                self.good_cycles = 0;
                self.consecutive_downlink_lost = 0;
                self.armed_switch = None;
                events.push(AirProtocolEvent::ModeChanged(self.mode));
            }
        }
        Ok(())
    }

    fn schedule_stream_data(&mut self, telemetry: &mut TelemetryRegistry, now: TimeMicros) {
        // MSP data preempts telemetry; reset the output if a message
        // would not fit behind what is already queued.
        if let Some(payload) = self.msp_air.take_pending() {
            let worst_case = payload.len() * 2 + 8;
            if self.stream.output_count() + worst_case
                > crate::air::stream::AIR_STREAM_OUTPUT_BUFFER_CAPACITY
            {
                self.stream.reset_output();
            }
            self.stream.feed_output_cmd(AirCmd::Msp, &payload);
            return;
        }
        if self.stream.output_count() > 0 {
            return;
        }
        let uplink = self.config.role == AirRole::Tx;
        if let Some(id) = telemetry.highest_scoring_dirty(uplink, now) {
            let value = telemetry.get(id).value().clone();
            if uplink {
                self.stream.feed_output_uplink_telemetry(id, &value);
            } else {
                self.stream.feed_output_downlink_telemetry(id, &value);
            }
            telemetry.sent(id, Some(self.tx_seq), now);
        }
    }

    fn consider_mode_switch(&mut self, _telemetry: &TelemetryRegistry, _now: TimeMicros) {
        if self.proposed_mode.is_some() || self.armed_switch.is_some() {
            return;
        }
        // Only the TX originates switches, the RX follows.
        if self.config.role != AirRole::Tx {
            return;
        }
        if self.consecutive_downlink_lost >= self.config.demote_after_lost {
            if let Some(longer) = self.mode.longer() {
                if self.config.supported_modes.contains(longer) {
                    info!(
                        target: "air",
                        "{} downlink packets lost, proposing mode {}",
                        self.consecutive_downlink_lost,
                        longer.index()
                    );
                    self.propose_mode(longer);
                    return;
                }
            }
        }
        if let Some(faster) = self.config.supported_modes.best_faster_than(self.mode) {
            let needed = self.radio.confirmations_required_for_switch(self.mode, faster);
            if self.good_cycles >= needed && self.radio.supports_faster_mode(self.mode, faster) {
                info!(
                    target: "air",
                    "{} good cycles, proposing faster mode {}", self.good_cycles, faster.index()
                );
                self.propose_mode(faster);
            }
        }
    }

    fn propose_mode(&mut self, mode: AirMode) {
        self.proposed_mode = Some(mode);
        self.good_cycles = 0;
        self.stream.feed_output_cmd(AirCmd::for_switch_to(mode), &[]);
    }

    fn send_packet(&mut self, rc: &RcData, now: TimeMicros) -> Result<(), RadioError> {
        let key = match &self.pairing {
            Some(p) => p.key.clone(),
            None => return Ok(()),
        };
        let params = self.mode.params();
        self.radio.set_frequency(hop_frequency(
            &key,
            self.config.base_frequency_hz,
            self.hop,
        ))?;
        self.hop = self.hop.wrapping_add(1);

        let wire = match self.config.role {
            AirRole::Tx => {
                let mut stream = vec![0u8; AirTxPacket::stream_capacity(params.tx_packet_size)];
                let n = self.stream.pop_output_into(&mut stream);
                stream.truncate(n);
                let packet = AirTxPacket {
                    seq: self.tx_seq,
                    channels: [rc.channel(0), rc.channel(1), rc.channel(2), rc.channel(3)],
                    stream,
                };
                // A cycle without a reply counts as a lost downlink until
                // proven otherwise.
                self.consecutive_downlink_lost = self.consecutive_downlink_lost.saturating_add(1);
                packet.pack(params.tx_packet_size, &key)
            }
            AirRole::Rx => {
                let mut stream = vec![0u8; AirRxPacket::stream_capacity(params.rx_packet_size)];
                let n = self.stream.pop_output_into(&mut stream);
                stream.truncate(n);
                let snapshot = self.radio.link_snapshot();
                let packet = AirRxPacket {
                    seq: self.tx_seq,
                    rssi: snapshot.rssi,
                    snr: snapshot.snr,
                    lq: snapshot.lq,
                    active_antenna: 0,
                    stream,
                };
                packet.pack(params.rx_packet_size, &key)
            }
        };
        self.radio.transmit(&wire)?;
        self.tx_seq = seq_next(self.tx_seq);
        self.next_packet = now + params.cycle_time;
        Ok(())
    }

    fn update_failsafe(
        &mut self,
        rc: &mut RcData,
        now: TimeMicros,
        events: &mut Vec<AirProtocolEvent>,
    ) {
        let interval = match self.config.role {
            AirRole::Tx => self.mode.tx_failsafe_interval(),
            AirRole::Rx => self.mode.rx_failsafe_interval(),
        };
        let lost = now.saturating_sub(self.last_valid_peer_packet) > interval;
        if lost && !self.failsafe_active {
            warn!(target: "air", "no valid peer packet for {interval}us, failsafe");
            self.failsafe_active = true;
            if self.config.role == AirRole::Rx {
                let failsafe_channels = self.config.failsafe_channels;
                rc.apply_failsafe(&failsafe_channels, now);
            } else {
                rc.failsafe.activate(now);
            }
            events.push(AirProtocolEvent::FailsafeActivated);
        } else if !lost && self.failsafe_active {
            self.failsafe_active = false;
            rc.failsafe.deactivate();
            events.push(AirProtocolEvent::FailsafeCleared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::air::radio::FakeRadio;
    use crate::rc::telemetry::TelemetryValue;

    struct Link {
        tx: AirProtocol<FakeRadio>,
        rx: AirProtocol<FakeRadio>,
        tx_rc: RcData,
        rx_rc: RcData,
        tx_telemetry: TelemetryRegistry,
        rx_telemetry: TelemetryRegistry,
        now: TimeMicros,
    }

    impl Link {
        fn new() -> Self {
            let (radio_a, radio_b) = FakeRadio::pair();
            let tx = AirProtocol::new(
                radio_a,
                AirProtocolConfig::new(AirRole::Tx, AirAddr([1, 1, 1, 1, 1, 1])),
            );
            let rx = AirProtocol::new(
                radio_b,
                AirProtocolConfig::new(AirRole::Rx, AirAddr([2, 2, 2, 2, 2, 2])),
            );
            Self {
                tx,
                rx,
                tx_rc: RcData::new(),
                rx_rc: RcData::new(),
                tx_telemetry: TelemetryRegistry::new(),
                rx_telemetry: TelemetryRegistry::new(),
                now: 0,
            }
        }

        fn bound() -> Self {
            let mut link = Self::new();
            // Request/accept, then the accept reaches the TX.
            link.step();
            link.step();
            assert!(link.tx.is_bound() && link.rx.is_bound());
            link
        }

        /// One full exchange: TX update, then RX update, advancing time
        /// by one cycle.
        fn step(&mut self) -> (Vec<AirProtocolEvent>, Vec<AirProtocolEvent>) {
            let tx_events = self
                .tx
                .update(&mut self.tx_rc, &mut self.tx_telemetry, self.now)
                .unwrap();
            let rx_events = self
                .rx
                .update(&mut self.rx_rc, &mut self.rx_telemetry, self.now)
                .unwrap();
            self.now += AirMode::Mode2.cycle_time();
            (tx_events, rx_events)
        }
    }

    #[test]
    fn test_bind_handshake() {
        let mut link = Link::new();
        // TX broadcasts a request, RX accepts, TX sees the accept.
        let (tx_events, rx_events) = link.step();
        assert!(tx_events.is_empty());
        assert!(matches!(rx_events[0], AirProtocolEvent::Bound(_)));
        let (tx_events, _) = link.step();
        assert!(matches!(tx_events[0], AirProtocolEvent::Bound(_)));
        let tx_pairing = link.tx.pairing().unwrap();
        let rx_pairing = link.rx.pairing().unwrap();
        assert_eq!(tx_pairing.key, rx_pairing.key);
        assert_eq!(tx_pairing.addr, AirAddr([2, 2, 2, 2, 2, 2]));
        assert_eq!(rx_pairing.addr, AirAddr([1, 1, 1, 1, 1, 1]));
        // The sync word moved off the bind value onto the keyed one.
        assert_eq!(link.tx.radio.sync_word, tx_pairing.key.sync_word());
        assert_eq!(link.rx.radio.sync_word, link.tx.radio.sync_word);
    }

    #[test]
    fn test_channels_reach_rx() {
        let mut link = Link::bound();
        link.tx_rc.set_channel(0, 1100, 1);
        link.tx_rc.set_channel(3, 1900, 1);
        for _ in 0..4 {
            link.step();
        }
        assert_eq!(link.rx_rc.channel(0), 1100);
        assert_eq!(link.rx_rc.channel(3), 1900);
    }

    #[test]
    fn test_downlink_telemetry_reaches_tx() {
        let mut link = Link::bound();
        link.rx_telemetry
            .set(TelemetryId::CraftName, TelemetryValue::Str("QUAD".into()), 1);
        for _ in 0..6 {
            link.step();
        }
        assert_eq!(link.tx_telemetry.format(TelemetryId::CraftName), "QUAD");
    }

    #[test]
    fn test_uplink_telemetry_reaches_rx() {
        let mut link = Link::bound();
        link.tx_telemetry
            .set(TelemetryId::PilotName, TelemetryValue::Str("ACE".into()), 1);
        for _ in 0..6 {
            link.step();
        }
        assert_eq!(link.rx_telemetry.format(TelemetryId::PilotName), "ACE");
    }

    #[test]
    fn test_link_quality_propagates() {
        let mut link = Link::bound();
        for _ in 0..4 {
            link.step();
        }
        // The TX learns the RX's view from the downlink packet header.
        assert_eq!(link.tx_telemetry.format(TelemetryId::RxLinkQuality), "100%");
        assert_eq!(link.tx_telemetry.format(TelemetryId::RxRssiAnt1), "-60dB");
    }

    #[test]
    fn test_mode_promotes_on_sustained_quality() {
        let mut link = Link::bound();
        let mut tx_changed = false;
        let mut rx_changed = false;
        for _ in 0..150 {
            let (tx_events, rx_events) = link.step();
            tx_changed |= tx_events
                .iter()
                .any(|e| *e == AirProtocolEvent::ModeChanged(AirMode::Mode1));
            rx_changed |= rx_events
                .iter()
                .any(|e| *e == AirProtocolEvent::ModeChanged(AirMode::Mode1));
        }
        assert!(tx_changed && rx_changed);
        assert_eq!(link.tx.mode(), AirMode::Mode1);
        assert_eq!(link.rx.mode(), AirMode::Mode1);
    }

    #[test]
    fn test_unsupported_mode_rejected() {
        let (radio_a, radio_b) = FakeRadio::pair();
        let tx = AirProtocol::new(
            radio_a,
            AirProtocolConfig::new(AirRole::Tx, AirAddr([1; 6])),
        );
        let mut rx_config = AirProtocolConfig::new(AirRole::Rx, AirAddr([2; 6]));
        // The RX only supports the slow half of the table.
        let mut modes = AirModeMask::empty();
        modes.insert(AirMode::Mode2);
        modes.insert(AirMode::Mode3);
        modes.insert(AirMode::Mode4);
        modes.insert(AirMode::Mode5);
        rx_config.supported_modes = modes;
        let rx = AirProtocol::new(radio_b, rx_config);

        let mut link = Link::new();
        link.tx = tx;
        link.rx = rx;
        link.step();
        link.step();
        assert!(link.tx.is_bound());
        for _ in 0..150 {
            link.step();
        }
        // The proposal was rejected, nobody moved.
        assert_eq!(link.tx.mode(), AirMode::Mode2);
        assert_eq!(link.rx.mode(), AirMode::Mode2);
    }

    #[test]
    fn test_failsafe_on_link_loss() {
        let mut link = Link::bound();
        for _ in 0..4 {
            link.step();
        }
        assert!(!link.tx.is_failsafe_active());
        // The RX goes silent; its in-flight frames are lost too.
        link.tx.radio.drop_in_flight();
        let mut activated = false;
        for _ in 0..60 {
            link.tx.radio.drop_in_flight();
            let events = link
                .tx
                .update(&mut link.tx_rc, &mut link.tx_telemetry, link.now)
                .unwrap();
            activated |= events.contains(&AirProtocolEvent::FailsafeActivated);
            link.now += AirMode::Mode2.cycle_time();
        }
        assert!(activated);
        assert!(link.tx.is_failsafe_active());
        assert!(link.tx_rc.failsafe.is_active());
    }

    #[test]
    fn test_rx_failsafe_emits_configured_channels() {
        let mut link = Link::bound();
        link.tx_rc.set_channel(0, 1200, 1);
        for _ in 0..4 {
            link.step();
        }
        assert_eq!(link.rx_rc.channel(0), 1200);
        // The TX goes silent.
        for _ in 0..60 {
            link.rx.radio.drop_in_flight();
            link.rx
                .update(&mut link.rx_rc, &mut link.rx_telemetry, link.now)
                .unwrap();
            link.now += AirMode::Mode2.cycle_time();
        }
        assert!(link.rx.is_failsafe_active());
        assert!(link.rx_rc.failsafe.is_active());
        assert_eq!(
            link.rx_rc.channel(0),
            crate::rc::data::CHANNEL_CENTER_VALUE
        );
    }

    #[test]
    fn test_msp_payload_surfaces() {
        let mut link = Link::bound();
        use crate::msp::{MspDirection, MspTransport};
        link.tx
            .msp()
            .write(MspDirection::ToFc, 102, &[])
            .unwrap();
        let mut payloads = Vec::new();
        for _ in 0..4 {
            let (_, rx_events) = link.step();
            for e in rx_events {
                if let AirProtocolEvent::MspPayload(p) = e {
                    payloads.push(p);
                }
            }
        }
        assert_eq!(payloads.len(), 1);
        let (direction, cmd, data) = MspAirTransport::decode(&payloads[0]).unwrap();
        assert_eq!(direction, MspDirection::ToFc);
        assert_eq!(cmd, 102);
        assert!(data.is_empty());
    }

    #[test]
    fn test_stored_pairing_skips_bind() {
        let pairing = AirPairing {
            addr: AirAddr([9; 6]),
            key: AirKey::new(0x1357_9BDF).unwrap(),
        };
        let (radio_a, radio_b) = FakeRadio::pair();
        let tx = AirProtocol::with_pairing(
            radio_a,
            AirProtocolConfig::new(AirRole::Tx, AirAddr([1; 6])),
            pairing.clone(),
        );
        let rx = AirProtocol::with_pairing(
            radio_b,
            AirProtocolConfig::new(AirRole::Rx, AirAddr([2; 6])),
            pairing.clone(),
        );
        let mut link = Link::new();
        link.tx = tx;
        link.rx = rx;
        link.tx_rc.set_channel(0, 1750, 1);
        for _ in 0..4 {
            link.step();
        }
        // No bind traffic, the stored key drives the link directly.
        assert_eq!(link.tx.radio.sync_word, pairing.key.sync_word());
        assert_eq!(link.rx_rc.channel(0), 1750);
    }

    #[test]
    fn test_hop_frequency_keyed() {
        let key = AirKey::new(0x1234_5678).unwrap();
        let other = AirKey::new(0xCAFE_F00D).unwrap();
        let base = 433_420_000;
        let ours: Vec<u64> = (0..8).map(|h| hop_frequency(&key, base, h)).collect();
        let theirs: Vec<u64> = (0..8).map(|h| hop_frequency(&other, base, h)).collect();
        assert_ne!(ours, theirs);
        for f in &ours {
            assert!(*f >= base);
            assert!(*f < base + AIR_NUM_HOP_FREQUENCIES as u64 * AIR_HOP_SPACING_HZ);
        }
    }
}
