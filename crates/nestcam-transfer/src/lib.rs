//! Nestcam Transfer: chunked still-image transfer over a size-limited
//! publish/subscribe transport.
//!
//! Provides:
//! - `index|total[|battery]|payload` chunk codec
//! - Sequential, paced sender with a hard per-transfer budget
//! - Connectivity gate with bounded retries and per-attempt deadlines
//! - Single-accumulation reassembly engine tolerant of loss, duplication,
//!   reordering and superseded transfers
//! - JPEG validation of reassembled images

pub mod bitfield;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod validate;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience.
pub use bitfield::IndexBitfield;
pub use connectivity::{Radio, RetryPolicy, ScanEntry, WifiCredentials, ensure_connected};
pub use error::{MalformedFrame, Result, TransferError};
pub use logging::{DiscardReason, NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use protocol::{
    Chunk, DEFAULT_CHUNK_SIZE, DELIMITER, MAX_BATTERY, MAX_CHUNKS, MAX_FRAME_LEN, chunk_count,
    decode_chunk, encode_chunk, heartbeat_frame, max_payload_len,
};
pub use receiver::{
    Artifact, ArtifactSink, BatteryReading, ChunkOutcome, ProgressSnapshot, ReassemblyState,
    Reassembler, ReceiverConfig, ReceiverProgress, run_assembler,
};
pub use sender::{
    Camera, Indicator, Publisher, SendReport, SenderConfig, capture_with_indicator, send_heartbeat,
    send_image,
};
pub use validate::validate_jpeg;
