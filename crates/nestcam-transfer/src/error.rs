//! Error types shared by the sender, the connectivity gate and the receiver.
//!
//! Nothing here is fatal: the node moves on to its next sleep cycle and the
//! receiver drops back to idle whatever error was hit.

use std::io;

use thiserror::Error;

/// Every way a chunked image transfer can fail.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A frame could not be parsed as a chunk.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] MalformedFrame),

    /// The connectivity gate gave up before any publish.
    #[error("network unreachable after {attempts} attempts")]
    ConnectivityExhausted { attempts: u32 },

    /// Connect, publish or disconnect failed on the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// The per-transfer deadline passed with chunks still unsent.
    #[error("transfer budget exceeded after {sent}/{total} chunks")]
    BudgetExceeded { sent: u32, total: u32 },

    /// Reassembled bytes are not a decodable JPEG.
    #[error("corrupt image: {0}")]
    CorruptImage(String),

    /// Caller handed the driver something it cannot chunk.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Why a frame was rejected by the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedFrame {
    #[error("expected at least 3 '|'-delimited fields")]
    TooFewFields,

    #[error("{field} is not a non-negative decimal integer")]
    BadNumber { field: &'static str },

    #[error("index {index} out of range for total {total}")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("battery level {0} exceeds 100")]
    BatteryOutOfRange(u32),

    #[error("total {total} exceeds limit of {max} chunks")]
    TooManyChunks { total: u32, max: u32 },

    #[error("frame of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, TransferError>;
