//! Reassembly engine: unordered chunk stream in, validated JPEG out.
//!
//! ```text
//! [Delivery loop] ---> [Assembler thread] ---> [ArtifactSink]
//! one frame per msg     Reassembler owns        write image,
//! bounded channel       the accumulation        battery log
//! ```
//!
//! Exactly one accumulation exists at a time and only the assembler thread
//! touches it. A chunk whose `total` differs from the accumulation in
//! progress starts a new transfer and the old data is dropped.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use sha2::{Digest, Sha256};

use crate::bitfield::IndexBitfield;
use crate::error::MalformedFrame;
use crate::logging::{DiscardReason, TransferEvent, TransferLog, TransferLogger};
use crate::protocol::{Chunk, decode_chunk};
use crate::validate::validate_jpeg;

const COMPONENT: &str = "receiver";

/// Default cap on the bytes held by one accumulation.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

/// Default idle timeout before a stalled accumulation is swept.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// A complete, validated image ready to persist.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub captured_at: DateTime<Local>,
    pub battery: Option<u8>,
}

/// A battery level reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryReading {
    pub timestamp: DateTime<Local>,
    pub level: u8,
}

/// Where finished images and battery readings go.
pub trait ArtifactSink {
    /// Persist the image and return where it landed.
    fn store(&mut self, artifact: &Artifact) -> io::Result<PathBuf>;

    fn record_battery(&mut self, reading: &BatteryReading) -> io::Result<()>;
}

/// Receiver tuning.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// `None` keeps a stalled accumulation until a new transfer supersedes it.
    pub idle_timeout: Option<Duration>,
    pub max_image_bytes: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// Sentinel for "no battery reading yet".
const NO_BATTERY: u8 = u8::MAX;

/// Receiver counters, shared with whoever reports status.
pub struct ReceiverProgress {
    pub frames_received: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub duplicates: AtomicU64,
    pub images_stored: AtomicU64,
    pub corrupt_images: AtomicU64,
    pub superseded: AtomicU64,
    pub timed_out: AtomicU64,
    pub oversized: AtomicU64,
    pub heartbeats: AtomicU64,
    pub sink_errors: AtomicU64,
    last_battery: AtomicU8,
}

/// Point-in-time copy of [`ReceiverProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub duplicates: u64,
    pub images_stored: u64,
    pub corrupt_images: u64,
    pub superseded: u64,
    pub timed_out: u64,
    pub oversized: u64,
    pub heartbeats: u64,
    pub sink_errors: u64,
    pub last_battery: Option<u8>,
}

impl ReceiverProgress {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            images_stored: AtomicU64::new(0),
            corrupt_images: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            oversized: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            sink_errors: AtomicU64::new(0),
            last_battery: AtomicU8::new(NO_BATTERY),
        }
    }

    pub fn last_battery(&self) -> Option<u8> {
        match self.last_battery.load(Ordering::Relaxed) {
            NO_BATTERY => None,
            level => Some(level),
        }
    }

    fn set_battery(&self, level: u8) {
        self.last_battery.store(level, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            images_stored: self.images_stored.load(Ordering::Relaxed),
            corrupt_images: self.corrupt_images.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            last_battery: self.last_battery(),
        }
    }
}

impl Default for ReceiverProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// What one frame did to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Frame did not decode; the accumulation is untouched.
    Rejected(MalformedFrame),
    /// Stored; transfer not complete yet.
    Pending { received: u32, total: u32 },
    /// Transfer completed and the image was persisted here.
    Stored(PathBuf),
    /// Battery-only heartbeat.
    Heartbeat(Option<u8>),
    /// Accumulation dropped without an image.
    Discarded(DiscardReason),
    /// Image was valid but the sink could not persist it.
    SinkFailed(String),
}

/// Engine state, for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    Idle,
    Accumulating { received: u32, total: u32 },
}

/// In-progress transfer.
struct Accumulation {
    total: u32,
    chunks: HashMap<u32, Vec<u8>>,
    received: IndexBitfield,
    bytes: usize,
    battery: Option<u8>,
    last_chunk: Instant,
}

impl Accumulation {
    fn new(total: u32, now: Instant) -> Self {
        Self {
            total,
            chunks: HashMap::new(),
            received: IndexBitfield::new(total),
            bytes: 0,
            battery: None,
            last_chunk: now,
        }
    }

    /// Concatenate payloads in index order. Call only when complete.
    fn concat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes);
        for index in 0..self.total {
            if let Some(payload) = self.chunks.get(&index) {
                out.extend_from_slice(payload);
            }
        }
        out
    }
}

/// Chunk reassembly state machine.
pub struct Reassembler<S: ArtifactSink> {
    config: ReceiverConfig,
    current: Option<Accumulation>,
    sink: S,
    progress: Arc<ReceiverProgress>,
    logger: Arc<dyn TransferLogger>,
}

impl<S: ArtifactSink> Reassembler<S> {
    pub fn new(
        config: ReceiverConfig,
        sink: S,
        progress: Arc<ReceiverProgress>,
        logger: Arc<dyn TransferLogger>,
    ) -> Self {
        Self {
            config,
            current: None,
            sink,
            progress,
            logger,
        }
    }

    pub fn state(&self) -> ReassemblyState {
        match &self.current {
            None => ReassemblyState::Idle,
            Some(acc) => ReassemblyState::Accumulating {
                received: acc.received.received(),
                total: acc.total,
            },
        }
    }

    /// Indices still outstanding in the current accumulation.
    pub fn missing(&self) -> Vec<u32> {
        self.current
            .as_ref()
            .map(|acc| acc.received.missing())
            .unwrap_or_default()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Decode one raw transport message and feed it in.
    pub fn on_frame(&mut self, frame: &[u8], now: Instant) -> ChunkOutcome {
        self.progress.frames_received.fetch_add(1, Ordering::Relaxed);
        match decode_chunk(frame) {
            Ok(chunk) => self.on_chunk(chunk, now),
            Err(e) => self.reject(e),
        }
    }

    /// Apply one decoded chunk to the state machine.
    pub fn on_chunk(&mut self, chunk: Chunk, now: Instant) -> ChunkOutcome {
        if let Err(e) = chunk.check() {
            return self.reject(e);
        }
        if self
            .current
            .as_ref()
            .is_some_and(|acc| acc.total != chunk.total)
        {
            self.discard(DiscardReason::Superseded);
        }

        if chunk.is_heartbeat() {
            return self.heartbeat(chunk.battery);
        }

        let max_image_bytes = self.config.max_image_bytes;
        let acc = self
            .current
            .get_or_insert_with(|| Accumulation::new(chunk.total, now));

        let previous_len = acc.chunks.get(&chunk.index).map_or(0, Vec::len);
        if acc.bytes - previous_len + chunk.payload.len() > max_image_bytes {
            self.discard(DiscardReason::Oversized);
            return ChunkOutcome::Discarded(DiscardReason::Oversized);
        }

        let duplicate = !acc.received.set(chunk.index);
        acc.bytes = acc.bytes - previous_len + chunk.payload.len();
        acc.chunks.insert(chunk.index, chunk.payload);
        acc.last_chunk = now;
        if chunk.battery.is_some() {
            acc.battery = chunk.battery;
        }

        let received = acc.received.received();
        let total = acc.total;
        let complete = acc.received.is_complete();

        if duplicate {
            self.progress.duplicates.fetch_add(1, Ordering::Relaxed);
        }
        self.log(TransferEvent::ChunkStored {
            index: chunk.index,
            received,
            total,
            duplicate,
        });

        if !complete {
            return ChunkOutcome::Pending { received, total };
        }
        match self.current.take() {
            Some(acc) => self.complete(acc),
            None => ChunkOutcome::Pending { received, total },
        }
    }

    /// Drop the accumulation if it has been idle past the configured timeout.
    /// Returns true if something was swept.
    pub fn sweep(&mut self, now: Instant) -> bool {
        let Some(timeout) = self.config.idle_timeout else {
            return false;
        };
        let stale = self
            .current
            .as_ref()
            .is_some_and(|acc| now.saturating_duration_since(acc.last_chunk) >= timeout);
        if stale {
            self.discard(DiscardReason::IdleTimeout);
        }
        stale
    }

    fn complete(&mut self, acc: Accumulation) -> ChunkOutcome {
        let bytes = acc.concat();
        let received = acc.received.received();
        let total = acc.total;
        let battery = acc.battery;
        drop(acc);

        if let Err(e) = validate_jpeg(&bytes) {
            self.progress.corrupt_images.fetch_add(1, Ordering::Relaxed);
            self.log(TransferEvent::Error {
                message: e.to_string(),
            });
            self.log(TransferEvent::AccumulationDiscarded {
                reason: DiscardReason::CorruptImage,
                received,
                total,
            });
            return ChunkOutcome::Discarded(DiscardReason::CorruptImage);
        }

        let artifact = Artifact {
            bytes,
            captured_at: Local::now(),
            battery,
        };
        if let Some(level) = battery {
            self.progress.set_battery(level);
        }

        match self.sink.store(&artifact) {
            Ok(path) => {
                self.progress.images_stored.fetch_add(1, Ordering::Relaxed);
                self.log(TransferEvent::ImageStored {
                    path: path.display().to_string(),
                    bytes: artifact.bytes.len(),
                    sha256: hex::encode(Sha256::digest(&artifact.bytes)),
                    battery,
                });
                ChunkOutcome::Stored(path)
            }
            Err(e) => {
                self.progress.sink_errors.fetch_add(1, Ordering::Relaxed);
                let message = format!("cannot store image: {}", e);
                self.log(TransferEvent::Error {
                    message: message.clone(),
                });
                ChunkOutcome::SinkFailed(message)
            }
        }
    }

    fn heartbeat(&mut self, battery: Option<u8>) -> ChunkOutcome {
        self.progress.heartbeats.fetch_add(1, Ordering::Relaxed);
        self.log(TransferEvent::HeartbeatReceived { battery });

        if let Some(level) = battery {
            self.progress.set_battery(level);
            let reading = BatteryReading {
                timestamp: Local::now(),
                level,
            };
            if let Err(e) = self.sink.record_battery(&reading) {
                self.progress.sink_errors.fetch_add(1, Ordering::Relaxed);
                self.log(TransferEvent::Error {
                    message: format!("cannot record battery: {}", e),
                });
            }
        }
        ChunkOutcome::Heartbeat(battery)
    }

    fn reject(&mut self, e: MalformedFrame) -> ChunkOutcome {
        self.progress.frames_rejected.fetch_add(1, Ordering::Relaxed);
        self.log(TransferEvent::FrameRejected {
            reason: e.to_string(),
        });
        ChunkOutcome::Rejected(e)
    }

    fn discard(&mut self, reason: DiscardReason) {
        let Some(acc) = self.current.take() else {
            return;
        };
        let counter = match reason {
            DiscardReason::Superseded => &self.progress.superseded,
            DiscardReason::IdleTimeout => &self.progress.timed_out,
            DiscardReason::Oversized => &self.progress.oversized,
            DiscardReason::CorruptImage => &self.progress.corrupt_images,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.log(TransferEvent::AccumulationDiscarded {
            reason,
            received: acc.received.received(),
            total: acc.total,
        });
    }

    fn log(&self, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: COMPONENT,
            event,
        });
    }
}

/// Run the assembler loop on the calling thread until every sender of
/// `frames` is dropped. Sweeps for stale accumulations every
/// `sweep_interval`, including when no traffic arrives.
///
/// Returns the reassembler so the caller can inspect or reuse it.
pub fn run_assembler<S, F>(
    frames: Receiver<F>,
    mut reassembler: Reassembler<S>,
    sweep_interval: Duration,
) -> Reassembler<S>
where
    S: ArtifactSink,
    F: AsRef<[u8]>,
{
    let mut last_sweep = Instant::now();

    loop {
        match frames.recv_timeout(sweep_interval) {
            Ok(frame) => {
                reassembler.on_frame(frame.as_ref(), Instant::now());
            }
            Err(RecvTimeoutError::Timeout) => {
                // Sweep timeout, fall through to sweep below
            }
            Err(RecvTimeoutError::Disconnected) => {
                return reassembler;
            }
        }

        if last_sweep.elapsed() >= sweep_interval {
            last_sweep = Instant::now();
            reassembler.sweep(last_sweep);
        }
    }
}
