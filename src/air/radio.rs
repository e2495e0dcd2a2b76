//! # Radio Abstraction
//!
//! The protocol core drives the physical radio through this trait. The
//! driver owns modulation details; the protocol only asks for frequency,
//! sync word, mode presets and frame I/O, and consults the driver when
//! judging whether the link supports a faster mode.
//!
//! [`FakeRadio`] is a loopback implementation for tests and the CLI: two
//! fakes can be wired back to back to run a whole link in memory.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::air::mode::AirMode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("radio I/O error: {0}")]
    Io(String),

    #[error("timeout waiting for radio operation")]
    Timeout,

    #[error("invalid radio configuration: {0}")]
    InvalidConfig(String),
}

/// Link quality snapshot of the last received frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSnapshot {
    /// dB.
    pub rssi: i8,
    /// 0.25 dB steps.
    pub snr: i8,
    /// Percent.
    pub lq: u8,
}

pub trait Radio {
    /// Bring the radio out of reset. Defaults to a no-op for drivers
    /// that configure the hardware at construction.
    fn open(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_frequency(&mut self, freq_hz: u64) -> Result<(), RadioError>;
    fn set_sync_word(&mut self, sync_word: u8) -> Result<(), RadioError>;
    fn set_mode(&mut self, mode: AirMode) -> Result<(), RadioError>;

    /// Queue one frame for transmission. Completion is assumed by the
    /// next cycle deadline.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError>;

    /// Non-blocking receive: `Ok(None)` when no frame is pending.
    fn receive(&mut self, buf: &mut [u8]) -> Result<Option<usize>, RadioError>;

    /// Quality of the last received frame.
    fn link_snapshot(&self) -> LinkSnapshot;

    fn sleep(&mut self) -> Result<(), RadioError>;

    /// Power the radio down for good.
    fn shutdown(&mut self) -> Result<(), RadioError> {
        self.sleep()
    }

    /// Whether the link is good enough in `_current` to try `_faster`.
    /// Drivers refine this from modem-specific SNR margins.
    fn supports_faster_mode(&self, _current: AirMode, _faster: AirMode) -> bool {
        // 3 dB of SNR headroom by default.
        self.link_snapshot().snr >= 12
    }

    /// Confirmations required before a mode switch is proposed.
    fn confirmations_required_for_switch(&self, _current: AirMode, _to: AirMode) -> u32 {
        100
    }
}

#[derive(Default)]
struct FakeRadioShared {
    /// Frames in flight from peer A to peer B and back.
    a_to_b: VecDeque<Vec<u8>>,
    b_to_a: VecDeque<Vec<u8>>,
}

/// In-memory radio: what one end transmits, the other receives. Mode,
/// frequency and sync word changes are recorded for inspection.
#[derive(Clone)]
pub struct FakeRadio {
    shared: Arc<Mutex<FakeRadioShared>>,
    /// True for the "A" end of the pipe.
    a_side: bool,
    pub frequency: u64,
    pub sync_word: u8,
    pub mode: Option<AirMode>,
    pub snapshot: LinkSnapshot,
}

impl FakeRadio {
    /// A connected pair of fakes.
    pub fn pair() -> (FakeRadio, FakeRadio) {
        let shared = Arc::new(Mutex::new(FakeRadioShared::default()));
        let a = FakeRadio {
            shared: shared.clone(),
            a_side: true,
            frequency: 0,
            sync_word: 0,
            mode: None,
            snapshot: LinkSnapshot {
                rssi: -60,
                snr: 20,
                lq: 100,
            },
        };
        let mut b = a.clone();
        b.a_side = false;
        (a, b)
    }

    /// Drop every in-flight frame, simulating a link outage.
    pub fn drop_in_flight(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.a_to_b.clear();
        shared.b_to_a.clear();
    }
}

impl Radio for FakeRadio {
    fn set_frequency(&mut self, freq_hz: u64) -> Result<(), RadioError> {
        self.frequency = freq_hz;
        Ok(())
    }

    fn set_sync_word(&mut self, sync_word: u8) -> Result<(), RadioError> {
        self.sync_word = sync_word;
        Ok(())
    }

    fn set_mode(&mut self, mode: AirMode) -> Result<(), RadioError> {
        self.mode = Some(mode);
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let mut shared = self.shared.lock().unwrap();
        let queue = if self.a_side {
            &mut shared.a_to_b
        } else {
            &mut shared.b_to_a
        };
        queue.push_back(frame.to_vec());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<Option<usize>, RadioError> {
        let mut shared = self.shared.lock().unwrap();
        let queue = if self.a_side {
            &mut shared.b_to_a
        } else {
            &mut shared.a_to_b
        };
        match queue.pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(Some(n))
            }
            None => Ok(None),
        }
    }

    fn link_snapshot(&self) -> LinkSnapshot {
        self.snapshot
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_radio_pipe() {
        let (mut a, mut b) = FakeRadio::pair();
        a.transmit(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(b.receive(&mut buf).unwrap(), Some(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(b.receive(&mut buf).unwrap(), None);
        // The reverse direction is independent.
        b.transmit(&[9]).unwrap();
        assert_eq!(a.receive(&mut buf).unwrap(), Some(1));
        assert_eq!(buf[0], 9);
    }

    #[test]
    fn test_fake_radio_settings_recorded() {
        let (mut a, _b) = FakeRadio::pair();
        a.set_frequency(433_420_000).unwrap();
        a.set_sync_word(0x5A).unwrap();
        a.set_mode(AirMode::Mode2).unwrap();
        assert_eq!(a.frequency, 433_420_000);
        assert_eq!(a.sync_word, 0x5A);
        assert_eq!(a.mode, Some(AirMode::Mode2));
    }
}
