//! # Logging
//!
//! Thin wrappers around the `log` facade, with `env_logger` as the
//! backend. Subsystems tag their records with a module target
//! (`air.stream`, `msp.telemetry`, ...) so `RUST_LOG` can single one
//! out.

use log::{debug, error, info, log_enabled, warn, Level};

/// Initialize the `env_logger` backend.
pub fn init_logger() {
    env_logger::init();
}

/// Logs an error message.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    }
}

/// Logs a warning message.
pub fn log_warn(message: &str) {
    if log_enabled!(Level::Warn) {
        warn!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}

/// Logs a debug message.
pub fn log_debug(message: &str) {
    if log_enabled!(Level::Debug) {
        debug!("{message}");
    }
}

/// Hex-dump a buffer at debug level, 16 bytes per line.
pub fn log_buffer_debug(target: &str, data: &[u8]) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    for (i, chunk) in data.chunks(16).enumerate() {
        debug!(target: "buffer", "{target} {:04x}: {}", i * 16, hex::encode(chunk));
    }
}
