//! # Error Handling
//!
//! One crate-level error wrapping the per-subsystem enums. The framing
//! layers keep their own error types because most of their conditions
//! are handled locally (drop a frame, resync); only the conditions that
//! escape to callers arrive here.

use thiserror::Error;

use crate::air::radio::RadioError;
use crate::io::LinkIoError;
use crate::msp::MspError;
use crate::storage::StorageError;
use crate::util::UvarintError;

#[derive(Error, Debug)]
pub enum RavenError {
    /// A radio operation failed.
    #[error("radio error: {0}")]
    Radio(#[from] RadioError),

    /// A serial link operation failed.
    #[error("link I/O error: {0}")]
    LinkIo(#[from] LinkIoError),

    /// An MSP operation failed.
    #[error("MSP error: {0}")]
    Msp(#[from] MspError),

    /// Persistent storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A varint could not be encoded or decoded.
    #[error("varint error: {0}")]
    Uvarint(#[from] UvarintError),

    /// Malformed wire data that could not be handled locally.
    #[error("frame error: {0}")]
    Frame(String),

    /// The operation needs a pairing and none is stored.
    #[error("not paired")]
    NotPaired,

    /// A catch-all for uncategorized cases.
    #[error("{0}")]
    Other(String),
}
