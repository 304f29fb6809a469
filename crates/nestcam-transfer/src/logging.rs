//! Transfer logging trait for structured event reporting.
//!
//! The sender and the reassembly engine report what they do through a
//! `TransferLogger` so hosts can route events to `tracing`, drop them, or
//! capture them in tests.

use std::fmt;

/// Structured log entry for a transfer operation.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub event: TransferEvent,
}

/// Why the receiver threw away an in-progress accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// A chunk with a different total started a new transfer.
    Superseded,
    /// No chunk arrived within the idle timeout.
    IdleTimeout,
    /// Storing the next chunk would exceed the image size cap.
    Oversized,
    /// All chunks arrived but the bytes are not a JPEG.
    CorruptImage,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Superseded => "superseded",
            Self::IdleTimeout => "idle_timeout",
            Self::Oversized => "oversized",
            Self::CorruptImage => "corrupt_image",
        };
        f.write_str(s)
    }
}

/// Transfer events that can be logged.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Sender: one chunk handed to the transport
    ChunkPublished {
        index: u32,
        total: u32,
        bytes: usize,
    },
    /// Sender: every chunk published
    TransferSent {
        chunks: u32,
        bytes: u64,
        duration_ms: u64,
    },
    /// Sender: loop stopped early
    TransferAborted {
        sent: u32,
        total: u32,
        reason: String,
    },
    /// Sender: battery-only heartbeat published
    HeartbeatSent {
        battery: u8,
    },
    /// Receiver: frame failed to decode
    FrameRejected {
        reason: String,
    },
    /// Receiver: chunk stored in the accumulation
    ChunkStored {
        index: u32,
        received: u32,
        total: u32,
        duplicate: bool,
    },
    /// Receiver: accumulation dropped without producing an image
    AccumulationDiscarded {
        reason: DiscardReason,
        received: u32,
        total: u32,
    },
    /// Receiver: image validated and persisted
    ImageStored {
        path: String,
        bytes: usize,
        sha256: String,
        battery: Option<u8>,
    },
    /// Receiver: heartbeat battery reading recorded
    HeartbeatReceived {
        battery: Option<u8>,
    },
    /// Error occurred
    Error {
        message: String,
    },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChunkPublished { index, total, bytes } => {
                write!(f, "chunk_published idx={}/{} bytes={}", index, total, bytes)
            }
            Self::TransferSent { chunks, bytes, duration_ms } => {
                write!(f, "transfer_sent chunks={} bytes={} duration_ms={}", chunks, bytes, duration_ms)
            }
            Self::TransferAborted { sent, total, reason } => {
                write!(f, "transfer_aborted sent={}/{} reason={}", sent, total, reason)
            }
            Self::HeartbeatSent { battery } => {
                write!(f, "heartbeat_sent battery={}", battery)
            }
            Self::FrameRejected { reason } => {
                write!(f, "frame_rejected: {}", reason)
            }
            Self::ChunkStored { index, received, total, duplicate } => {
                write!(f, "chunk_stored idx={} received={}/{} duplicate={}", index, received, total, duplicate)
            }
            Self::AccumulationDiscarded { reason, received, total } => {
                write!(f, "accumulation_discarded reason={} received={}/{}", reason, received, total)
            }
            Self::ImageStored { path, bytes, sha256, battery } => {
                write!(f, "image_stored path={} bytes={} sha256={}", path, bytes, sha256)?;
                if let Some(level) = battery {
                    write!(f, " battery={}", level)?;
                }
                Ok(())
            }
            Self::HeartbeatReceived { battery } => match battery {
                Some(level) => write!(f, "heartbeat battery={}", level),
                None => write!(f, "heartbeat battery=unknown"),
            },
            Self::Error { message } => {
                write!(f, "error: {}", message)
            }
        }
    }
}

/// Trait for transfer logging. Implementations can write to tracing,
/// record entries, or discard them.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        // Info for lifecycle events, debug for per-chunk spam
        match &entry.event {
            TransferEvent::ChunkPublished { .. } | TransferEvent::ChunkStored { .. } => {
                tracing::debug!(component = entry.component, "{}", entry.event);
            }
            TransferEvent::FrameRejected { .. }
            | TransferEvent::AccumulationDiscarded { .. }
            | TransferEvent::TransferAborted { .. }
            | TransferEvent::Error { .. } => {
                tracing::warn!(component = entry.component, "{}", entry.event);
            }
            _ => {
                tracing::info!(component = entry.component, "{}", entry.event);
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}
