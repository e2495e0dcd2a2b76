//! # MSP Connection
//!
//! Request/reply dispatch over any [`MspTransport`]. Callers queue a
//! callback with each request; replies are matched against the queue in
//! FIFO order, discarding stale entries for commands whose replies never
//! arrived. A global callback can take over all dispatch, which the
//! receiver side uses to forward every FC response into the air stream.
//!
//! The connection does not own its transport: every operation takes the
//! transport as an argument, so a transport embedded in another state
//! machine (the S.Port master, for example) can still be driven through a
//! connection without ownership cycles.

use log::{debug, info, warn};

use crate::msp::{
    MspDirection, MspError, MspTransport, MSP_MAX_PAYLOAD_SIZE, MSP_QUEUE_MAX_SIZE,
};
use crate::util::RingBuffer;

/// Invoked with the command and either the reply payload or the error that
/// ended the request.
pub type MspCallback = Box<dyn FnMut(u16, Result<&[u8], MspError>) + Send>;

struct CallbackReq {
    cmd: u16,
    callback: Option<MspCallback>,
}

pub struct MspConn {
    callbacks: RingBuffer<CallbackReq>,
    global_callback: Option<MspCallback>,
}

impl MspConn {
    pub fn new() -> Self {
        Self {
            callbacks: RingBuffer::new(MSP_QUEUE_MAX_SIZE),
            global_callback: None,
        }
    }

    /// Drain every decoded message from the transport and dispatch it.
    pub fn update(&mut self, transport: &mut dyn MspTransport) {
        let mut buf = [0u8; MSP_MAX_PAYLOAD_SIZE];
        while let Some(packet) = transport.read(&mut buf) {
            debug!(
                target: "msp",
                "got MSP ({} FC) code {}, payload {:?}",
                if packet.direction == MspDirection::ToFc { "to" } else { "from" },
                packet.cmd,
                packet.payload
            );
            let payload = match packet.payload {
                Ok(n) => Ok(&buf[..n]),
                Err(e) => Err(e),
            };
            self.dispatch_message(packet.direction, packet.cmd, payload);
        }
    }

    /// Write a message without queueing a callback.
    pub fn write(
        &mut self,
        transport: &mut dyn MspTransport,
        direction: MspDirection,
        cmd: u16,
        payload: &[u8],
    ) -> Result<usize, MspError> {
        transport.write(direction, cmd, payload)
    }

    /// Send a request to the FC and queue `callback` for its reply. When
    /// the queue is full the oldest entry is displaced and told about it.
    pub fn send(
        &mut self,
        transport: &mut dyn MspTransport,
        cmd: u16,
        payload: &[u8],
        callback: Option<MspCallback>,
    ) -> Result<usize, MspError> {
        // Write before queueing, the write can fail.
        let written = transport.write(MspDirection::ToFc, cmd, payload)?;
        if self.global_callback.is_some() {
            return Ok(written);
        }
        let req = CallbackReq { cmd, callback };
        if let Some(mut displaced) = self.callbacks.force_push(req) {
            info!(target: "msp", "MSP callback queue full, displacing code {}", displaced.cmd);
            if let Some(cb) = displaced.callback.as_mut() {
                cb(displaced.cmd, Err(MspError::Displaced));
            }
        }
        Ok(written)
    }

    /// Dispatch one decoded message. Used internally by [`update`] and by
    /// transports that push data instead of being polled.
    pub fn dispatch_message(
        &mut self,
        _direction: MspDirection,
        cmd: u16,
        payload: Result<&[u8], MspError>,
    ) {
        if let Some(cb) = self.global_callback.as_mut() {
            if let Err(e) = &payload {
                warn!(target: "msp", "got MSP error {e}, skipping global callback");
                return;
            }
            cb(cmd, payload);
            return;
        }

        while let Some(mut req) = self.callbacks.pop() {
            if req.cmd == cmd {
                if let Err(e) = &payload {
                    warn!(target: "msp", "got MSP error {e}, skipping callback");
                    break;
                }
                if let Some(cb) = req.callback.as_mut() {
                    cb(cmd, payload);
                }
                break;
            }
            warn!(
                target: "msp",
                "discarding callback for MSP code {} ({} queued)",
                req.cmd,
                self.callbacks.len()
            );
        }
    }

    /// Set (or clear, with `None`) a callback that overrides per-request
    /// dispatch for every decoded message.
    pub fn set_global_callback(&mut self, callback: Option<MspCallback>) {
        self.global_callback = callback;
    }

    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }
}

impl Default for MspConn {
    fn default() -> Self {
        Self::new()
    }
}
