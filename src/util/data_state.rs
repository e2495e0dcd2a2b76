//! # Data State Tracking
//!
//! Every telemetry slot carries a [`DataState`] that records when it last
//! changed, when it was last sent over the air and whether an acknowledge
//! is pending. The air scheduler ranks slots with [`DataState::score`]:
//! age since change weighs fifty times more than age since last send, so
//! fresh changes win the next stream slot but idle values still rotate
//! through eventually.

use super::TimeMicros;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataState {
    /// Time the data became dirty. Zero when it has been sent and has not
    /// changed since.
    dirty_since: TimeMicros,
    /// Last time the data was sent to the output.
    last_sent: TimeMicros,
    /// Last time the data was received from the input.
    last_update: TimeMicros,
    ack_at_seq: Option<u8>,
    ack_received: bool,
}

impl DataState {
    pub fn new() -> Self {
        Self {
            dirty_since: 0,
            last_sent: 0,
            last_update: 0,
            ack_at_seq: None,
            ack_received: false,
        }
    }

    /// Scheduling priority at `now`. Higher scores are sent first.
    pub fn score(&self, now: TimeMicros) -> u64 {
        if self.dirty_since > 0 {
            (now - self.dirty_since) * 50 + (now - self.last_sent)
        } else {
            now - self.last_sent
        }
    }

    /// Record an input update. A change resets ACK tracking and starts the
    /// dirty clock if it is not already running.
    pub fn update(&mut self, changed: bool, now: TimeMicros) {
        if changed {
            self.ack_at_seq = None;
            self.ack_received = false;
            if self.dirty_since == 0 {
                self.dirty_since = now;
            }
        }
        self.last_update = now;
    }

    /// Record a send, optionally arming an ACK at the given sequence.
    pub fn sent(&mut self, ack_at_seq: Option<u8>, now: TimeMicros) {
        self.ack_at_seq = ack_at_seq;
        self.dirty_since = 0;
        self.last_sent = now;
    }

    /// Stop a pending ACK without clearing one already received.
    pub fn stop_ack(&mut self) {
        self.ack_at_seq = None;
    }

    /// Stop a pending ACK and forget any received one.
    pub fn reset_ack(&mut self) {
        self.stop_ack();
        self.ack_received = false;
    }

    /// Called when the peer acknowledged the given sequence.
    pub fn update_ack_received(&mut self, seq: u8) {
        if !self.ack_received && self.ack_at_seq == Some(seq) {
            self.ack_received = true;
            self.ack_at_seq = None;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since > 0
    }

    pub fn has_value(&self) -> bool {
        self.last_update > 0
    }

    pub fn last_update(&self) -> TimeMicros {
        self.last_update
    }

    pub fn is_ack_received(&self) -> bool {
        self.ack_received
    }
}

impl Default for DataState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_tracking() {
        let mut ds = DataState::new();
        assert!(!ds.is_dirty());
        assert!(!ds.has_value());

        ds.update(true, 100);
        assert!(ds.is_dirty());
        assert!(ds.has_value());

        // A later unchanged update does not move the dirty clock.
        ds.update(false, 200);
        assert_eq!(ds.score(300), (300 - 100) * 50 + 300);

        ds.sent(None, 300);
        assert!(!ds.is_dirty());
        assert_eq!(ds.score(400), 100);
    }

    #[test]
    fn test_ack_matching() {
        let mut ds = DataState::new();
        ds.update(true, 10);
        ds.sent(Some(5), 20);

        ds.update_ack_received(4);
        assert!(!ds.is_ack_received());
        ds.update_ack_received(5);
        assert!(ds.is_ack_received());

        // A change drops the acknowledge.
        ds.update(true, 30);
        assert!(!ds.is_ack_received());
    }
}
