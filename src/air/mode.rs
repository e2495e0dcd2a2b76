//! # Air Modes
//!
//! Five LoRa presets ordered from fastest (lowest airtime, shortest
//! range) to longest (highest airtime, longest range). Each mode fixes
//! the modulation parameters, the packet sizes and the cycle time; the
//! failsafe intervals derive from the cycle time with a floor so the
//! fastest modes do not trip on a single missed packet.

use crate::util::{TimeMicros, MICROS_PER_MILLI};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AirMode {
    /// SF6/500 kHz, ~111 Hz.
    Mode1,
    /// SF7/500 kHz, 50 Hz.
    Mode2,
    /// SF8/500 kHz, ~32 Hz.
    Mode3,
    /// SF9/500 kHz, ~13 Hz.
    Mode4,
    /// SF10/500 kHz, ~6 Hz.
    Mode5,
}

/// Modulation parameters of one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirModeParams {
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    /// Denominator of the 4/x coding rate.
    pub coding_rate: u8,
    pub cycle_time: TimeMicros,
    pub tx_packet_size: usize,
    pub rx_packet_size: usize,
}

impl AirMode {
    pub const ALL: [AirMode; 5] = [
        AirMode::Mode1,
        AirMode::Mode2,
        AirMode::Mode3,
        AirMode::Mode4,
        AirMode::Mode5,
    ];

    pub const FASTEST: AirMode = AirMode::Mode1;
    pub const LONGEST: AirMode = AirMode::Mode5;

    /// One-based index, matching the switch command opcodes.
    pub fn index(self) -> usize {
        match self {
            AirMode::Mode1 => 1,
            AirMode::Mode2 => 2,
            AirMode::Mode3 => 3,
            AirMode::Mode4 => 4,
            AirMode::Mode5 => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            1 => Some(AirMode::Mode1),
            2 => Some(AirMode::Mode2),
            3 => Some(AirMode::Mode3),
            4 => Some(AirMode::Mode4),
            5 => Some(AirMode::Mode5),
            _ => None,
        }
    }

    pub fn params(self) -> AirModeParams {
        match self {
            AirMode::Mode1 => AirModeParams {
                bandwidth_hz: 500_000,
                spreading_factor: 6,
                coding_rate: 5,
                cycle_time: 9 * MICROS_PER_MILLI,
                tx_packet_size: 20,
                rx_packet_size: 20,
            },
            AirMode::Mode2 => AirModeParams {
                bandwidth_hz: 500_000,
                spreading_factor: 7,
                coding_rate: 5,
                cycle_time: 20 * MICROS_PER_MILLI,
                tx_packet_size: 18,
                rx_packet_size: 18,
            },
            AirMode::Mode3 => AirModeParams {
                bandwidth_hz: 500_000,
                spreading_factor: 8,
                coding_rate: 5,
                cycle_time: 31 * MICROS_PER_MILLI,
                tx_packet_size: 16,
                rx_packet_size: 16,
            },
            AirMode::Mode4 => AirModeParams {
                bandwidth_hz: 500_000,
                spreading_factor: 9,
                coding_rate: 5,
                cycle_time: 75 * MICROS_PER_MILLI,
                tx_packet_size: 14,
                rx_packet_size: 14,
            },
            AirMode::Mode5 => AirModeParams {
                bandwidth_hz: 500_000,
                spreading_factor: 10,
                coding_rate: 5,
                cycle_time: 165 * MICROS_PER_MILLI,
                tx_packet_size: 12,
                rx_packet_size: 12,
            },
        }
    }

    pub fn cycle_time(self) -> TimeMicros {
        self.params().cycle_time
    }

    /// How long the RX keeps emitting before declaring failsafe.
    pub fn rx_failsafe_interval(self) -> TimeMicros {
        (self.cycle_time() * 6).max(250 * MICROS_PER_MILLI)
    }

    /// The TX tolerates twice the RX interval before declaring loss.
    pub fn tx_failsafe_interval(self) -> TimeMicros {
        self.rx_failsafe_interval() * 2
    }

    /// The next mode with lower airtime, if any.
    pub fn faster(self) -> Option<Self> {
        Self::from_index(self.index() - 1)
    }

    /// The next mode with longer range, if any.
    pub fn longer(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn is_faster_than(self, other: Self) -> bool {
        self.index() < other.index()
    }
}

/// Set of supported modes, exchanged during pairing so both peers only
/// negotiate switches into common ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirModeMask(u8);

impl AirModeMask {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        let mut mask = Self::empty();
        for mode in AirMode::ALL {
            mask.insert(mode);
        }
        mask
    }

    pub fn insert(&mut self, mode: AirMode) {
        self.0 |= 1 << mode.index();
    }

    pub fn contains(&self, mode: AirMode) -> bool {
        self.0 & (1 << mode.index()) != 0
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0 & other.0)
    }

    /// The fastest mode in the set that is faster than `current`.
    pub fn best_faster_than(&self, current: AirMode) -> Option<AirMode> {
        AirMode::ALL
            .into_iter()
            .find(|m| self.contains(*m) && m.is_faster_than(current))
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        let mut mask = Self::empty();
        for mode in AirMode::ALL {
            if bits & (1 << mode.index()) != 0 {
                mask.insert(mode);
            }
        }
        mask
    }
}
