//! Sender transfer driver: one image, one connection, sequential publishes.
//!
//! ```text
//! [Camera] ---> [slice into chunks] ---> [Publisher]
//! LED bracket    index order, paced      connect once
//!                hard time budget        disconnect once
//! ```
//!
//! No retries: a transport error aborts the remaining chunks and the
//! receiver discards whatever partial data it holds.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, TransferError};
use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::protocol::{
    DEFAULT_CHUNK_SIZE, MAX_BATTERY, MAX_CHUNKS, chunk_count, encode_chunk, heartbeat_frame,
    max_payload_len,
};

const COMPONENT: &str = "sender";

/// Default pause between consecutive publishes.
pub const DEFAULT_PACING: Duration = Duration::from_millis(100);

/// Default wall-clock budget for one transfer.
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(60);

/// Publish side of the transport. One connection per transfer.
pub trait Publisher {
    fn connect(&mut self) -> Result<()>;
    fn publish(&mut self, frame: &[u8]) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
}

/// Image source.
pub trait Camera {
    fn capture(&mut self) -> io::Result<Vec<u8>>;
}

/// Physical indicator lit while the camera is capturing.
pub trait Indicator {
    fn set(&mut self, on: bool) -> io::Result<()>;
}

/// Configuration for the sender.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub chunk_size: usize,
    pub pacing: Duration,
    pub budget: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            pacing: DEFAULT_PACING,
            budget: DEFAULT_BUDGET,
        }
    }
}

/// Result of a completed send operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub chunks_sent: u32,
    pub total: u32,
    pub bytes_sent: u64,
    pub elapsed: Duration,
}

/// Capture one image with the indicator lit. The indicator is switched off
/// again whether or not the capture succeeds.
pub fn capture_with_indicator<C, I>(camera: &mut C, indicator: &mut I) -> io::Result<Vec<u8>>
where
    C: Camera + ?Sized,
    I: Indicator + ?Sized,
{
    if let Err(e) = indicator.set(true) {
        tracing::warn!("indicator on failed: {}", e);
    }
    let image = camera.capture();
    if let Err(e) = indicator.set(false) {
        tracing::warn!("indicator off failed: {}", e);
    }
    image
}

/// Slice `image` into chunks and publish them in index order.
///
/// Connects once before the first chunk and disconnects once after the last
/// attempted chunk, including when a publish fails or the budget runs out.
pub fn send_image<P: Publisher + ?Sized>(
    publisher: &mut P,
    image: &[u8],
    battery: Option<u8>,
    config: &SenderConfig,
    logger: &Arc<dyn TransferLogger>,
) -> Result<SendReport> {
    if config.chunk_size == 0 {
        return Err(TransferError::InvalidInput("chunk size must be at least 1".into()));
    }
    if image.is_empty() {
        return Err(TransferError::InvalidInput("image is empty".into()));
    }

    if battery.is_some_and(|level| level > MAX_BATTERY) {
        return Err(TransferError::InvalidInput(format!(
            "battery level above {}",
            MAX_BATTERY
        )));
    }

    let total = chunk_count(image.len(), config.chunk_size);
    if total > MAX_CHUNKS {
        return Err(TransferError::InvalidInput(format!(
            "{} chunks exceeds limit of {}",
            total, MAX_CHUNKS
        )));
    }
    let room = max_payload_len(total, battery);
    if config.chunk_size.min(image.len()) > room {
        return Err(TransferError::InvalidInput(format!(
            "chunk size {} leaves frames over the {} byte payload limit",
            config.chunk_size, room
        )));
    }
    let start = Instant::now();

    publisher.connect()?;
    let outcome = publish_chunks(publisher, image, battery, total, config, start, logger);
    let closed = publisher.disconnect();

    let (chunks_sent, bytes_sent) = match outcome {
        Ok(sent) => sent,
        Err((sent, e)) => {
            logger.log(TransferLog {
                component: COMPONENT,
                event: TransferEvent::TransferAborted {
                    sent,
                    total,
                    reason: e.to_string(),
                },
            });
            if let Err(close_err) = closed {
                tracing::debug!("disconnect after abort failed: {}", close_err);
            }
            return Err(e);
        }
    };
    closed?;

    let elapsed = start.elapsed();
    logger.log(TransferLog {
        component: COMPONENT,
        event: TransferEvent::TransferSent {
            chunks: chunks_sent,
            bytes: bytes_sent,
            duration_ms: elapsed.as_millis() as u64,
        },
    });

    Ok(SendReport {
        chunks_sent,
        total,
        bytes_sent,
        elapsed,
    })
}

/// Publish every chunk. On failure returns how many were sent alongside the error.
fn publish_chunks<P: Publisher + ?Sized>(
    publisher: &mut P,
    image: &[u8],
    battery: Option<u8>,
    total: u32,
    config: &SenderConfig,
    start: Instant,
    logger: &Arc<dyn TransferLogger>,
) -> std::result::Result<(u32, u64), (u32, TransferError)> {
    let mut bytes_sent: u64 = 0;

    for (index, part) in image.chunks(config.chunk_size).enumerate() {
        let index = index as u32;
        if index > 0 {
            std::thread::sleep(config.pacing);
        }
        if start.elapsed() > config.budget {
            return Err((index, TransferError::BudgetExceeded { sent: index, total }));
        }

        let frame = encode_chunk(index, total, battery, part).map_err(|e| (index, e))?;
        publisher.publish(&frame).map_err(|e| (index, e))?;
        bytes_sent += part.len() as u64;

        logger.log(TransferLog {
            component: COMPONENT,
            event: TransferEvent::ChunkPublished {
                index,
                total,
                bytes: part.len(),
            },
        });
    }

    Ok((total, bytes_sent))
}

/// Publish a battery-only heartbeat on its own connection.
pub fn send_heartbeat<P: Publisher + ?Sized>(
    publisher: &mut P,
    battery: u8,
    logger: &Arc<dyn TransferLogger>,
) -> Result<()> {
    let frame = heartbeat_frame(battery)?;
    publisher.connect()?;
    let published = publisher.publish(&frame);
    let closed = publisher.disconnect();
    published?;
    closed?;

    logger.log(TransferLog {
        component: COMPONENT,
        event: TransferEvent::HeartbeatSent { battery },
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogger;
    use crate::protocol::{MAX_FRAME_LEN, decode_chunk};

    #[derive(Default)]
    struct RecordingPublisher {
        frames: Vec<Vec<u8>>,
        connects: u32,
        disconnects: u32,
        fail_on: Option<usize>,
        connected: bool,
    }

    impl Publisher for RecordingPublisher {
        fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            self.connected = true;
            Ok(())
        }

        fn publish(&mut self, frame: &[u8]) -> Result<()> {
            assert!(self.connected, "publish before connect");
            if self.fail_on == Some(self.frames.len()) {
                return Err(TransferError::Transport("broker went away".into()));
            }
            self.frames.push(frame.to_vec());
            Ok(())
        }

        fn disconnect(&mut self) -> Result<()> {
            self.disconnects += 1;
            self.connected = false;
            Ok(())
        }
    }

    fn fast_config(chunk_size: usize) -> SenderConfig {
        SenderConfig {
            chunk_size,
            pacing: Duration::ZERO,
            budget: Duration::from_secs(5),
        }
    }

    fn null_logger() -> Arc<dyn TransferLogger> {
        Arc::new(NullLogger)
    }

    #[test]
    fn test_45k_image_in_three_chunks() {
        let image: Vec<u8> = (0..45_000u32).map(|i| (i % 251) as u8).collect();
        let mut publisher = RecordingPublisher::default();

        let report = send_image(&mut publisher, &image, None, &fast_config(20_000), &null_logger())
            .unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.chunks_sent, 3);
        assert_eq!(report.bytes_sent, 45_000);

        let chunks: Vec<_> = publisher
            .frames
            .iter()
            .map(|f| decode_chunk(f).unwrap())
            .collect();
        let sizes: Vec<usize> = chunks.iter().map(|c| c.payload.len()).collect();
        assert_eq!(sizes, vec![20_000, 20_000, 5_000]);
        assert!(chunks.iter().enumerate().all(|(i, c)| c.index == i as u32 && c.total == 3));

        let rebuilt: Vec<u8> = chunks.into_iter().flat_map(|c| c.payload).collect();
        assert_eq!(rebuilt, image);
        assert_eq!((publisher.connects, publisher.disconnects), (1, 1));
    }

    #[test]
    fn test_battery_on_every_chunk() {
        let mut publisher = RecordingPublisher::default();
        send_image(&mut publisher, &[7u8; 10], Some(64), &fast_config(4), &null_logger()).unwrap();
        assert_eq!(publisher.frames.len(), 3);
        for frame in &publisher.frames {
            assert_eq!(decode_chunk(frame).unwrap().battery, Some(64));
        }
    }

    #[test]
    fn test_publish_failure_aborts_and_disconnects_once() {
        let mut publisher = RecordingPublisher {
            fail_on: Some(1),
            ..RecordingPublisher::default()
        };

        let err = send_image(&mut publisher, &[1u8; 30], None, &fast_config(10), &null_logger())
            .unwrap_err();
        assert!(matches!(err, TransferError::Transport(_)));
        assert_eq!(publisher.frames.len(), 1);
        assert_eq!((publisher.connects, publisher.disconnects), (1, 1));
    }

    #[test]
    fn test_budget_exceeded_aborts() {
        let mut publisher = RecordingPublisher::default();
        let config = SenderConfig {
            chunk_size: 1,
            pacing: Duration::from_millis(20),
            budget: Duration::from_millis(30),
        };

        let err = send_image(&mut publisher, &[0u8; 50], None, &config, &null_logger()).unwrap_err();
        match err {
            TransferError::BudgetExceeded { sent, total } => {
                assert!(sent < 50);
                assert_eq!(total, 50);
            }
            other => panic!("expected budget error, got {other:?}"),
        }
        assert_eq!(publisher.disconnects, 1);
    }

    #[test]
    fn test_rejects_empty_image_and_zero_chunk() {
        let mut publisher = RecordingPublisher::default();
        assert!(matches!(
            send_image(&mut publisher, &[], None, &fast_config(10), &null_logger()),
            Err(TransferError::InvalidInput(_))
        ));
        assert!(matches!(
            send_image(&mut publisher, &[1, 2], None, &fast_config(0), &null_logger()),
            Err(TransferError::InvalidInput(_))
        ));
        assert_eq!(publisher.connects, 0);
    }

    #[test]
    fn test_rejects_oversized_chunks_before_connect() {
        let mut publisher = RecordingPublisher::default();
        let image = vec![0u8; MAX_FRAME_LEN + 10];
        assert!(matches!(
            send_image(&mut publisher, &image, Some(80), &fast_config(MAX_FRAME_LEN), &null_logger()),
            Err(TransferError::InvalidInput(_))
        ));
        assert!(matches!(
            send_image(&mut publisher, &[0u8; 70_000], None, &fast_config(1), &null_logger()),
            Err(TransferError::InvalidInput(_))
        ));
        assert!(matches!(
            send_image(&mut publisher, &[0u8; 4], Some(101), &fast_config(2), &null_logger()),
            Err(TransferError::InvalidInput(_))
        ));
        assert_eq!(publisher.connects, 0);

        // A chunk size larger than the image is fine when the image fits.
        send_image(&mut publisher, &[0u8; 100], None, &fast_config(MAX_FRAME_LEN), &null_logger())
            .unwrap();
        assert_eq!(publisher.frames.len(), 1);
    }

    #[test]
    fn test_heartbeat() {
        let mut publisher = RecordingPublisher::default();
        send_heartbeat(&mut publisher, 42, &null_logger()).unwrap();
        assert_eq!(publisher.frames, vec![b"0|0|42|0".to_vec()]);
        assert_eq!((publisher.connects, publisher.disconnects), (1, 1));
    }

    struct FakeCamera(io::Result<Vec<u8>>);

    impl Camera for FakeCamera {
        fn capture(&mut self) -> io::Result<Vec<u8>> {
            match &self.0 {
                Ok(bytes) => Ok(bytes.clone()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    #[derive(Default)]
    struct FakeLed(Vec<bool>);

    impl Indicator for FakeLed {
        fn set(&mut self, on: bool) -> io::Result<()> {
            self.0.push(on);
            Ok(())
        }
    }

    #[test]
    fn test_indicator_brackets_capture() {
        let mut led = FakeLed::default();
        let image = capture_with_indicator(&mut FakeCamera(Ok(vec![1, 2, 3])), &mut led).unwrap();
        assert_eq!(image, vec![1, 2, 3]);
        assert_eq!(led.0, vec![true, false]);
    }

    #[test]
    fn test_indicator_off_when_capture_fails() {
        let mut led = FakeLed::default();
        let camera_err = io::Error::new(io::ErrorKind::NotFound, "no sensor");
        assert!(capture_with_indicator(&mut FakeCamera(Err(camera_err)), &mut led).is_err());
        assert_eq!(led.0, vec![true, false]);
    }
}
