//! Chunk frame format carried as one MQTT message per chunk.
//!
//! ```text
//! <index>|<total>|<payload...>
//! <index>|<total>|<battery>|<payload...>
//! ```
//!
//! Leading fields are ASCII decimal. The payload is raw bytes and is not
//! escaped, so it may contain `|`; only the leading fields are split off.
//! The two layouts are told apart by field count: a fourth field whose third
//! field is 1-3 ASCII digits no greater than 100 is the battery variant.
//! A frame without a battery field whose payload itself starts with such a
//! field followed by `|` reads as the battery variant; senders that always
//! include the battery never produce that case.
//!
//! A heartbeat is the degenerate transfer `0|0|<battery>|0`.

use crate::error::{MalformedFrame, Result};

/// Field delimiter.
pub const DELIMITER: u8 = b'|';

/// Largest frame either side will accept. Bounded by the broker's
/// per-message limit.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

/// Default payload bytes per chunk on the node.
pub const DEFAULT_CHUNK_SIZE: usize = 20_000;

/// Highest battery percentage a frame may carry.
pub const MAX_BATTERY: u8 = 100;

/// Largest `total` either side will accept. Bounds the per-transfer index
/// bitfield to 8 KiB.
pub const MAX_CHUNKS: u32 = 65_536;

/// Payload of a heartbeat frame.
const HEARTBEAT_PAYLOAD: &[u8] = b"0";

/// A decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub total: u32,
    pub battery: Option<u8>,
    pub payload: Vec<u8>,
}

impl Chunk {
    /// Heartbeats report battery only and carry no image.
    pub fn is_heartbeat(&self) -> bool {
        self.total == 0
    }

    /// Check the header fields against the wire limits. Chunks built by
    /// `decode_chunk` always pass.
    pub fn check(&self) -> std::result::Result<(), MalformedFrame> {
        check_header(self.index, self.total, self.battery)
    }
}

fn check_header(
    index: u32,
    total: u32,
    battery: Option<u8>,
) -> std::result::Result<(), MalformedFrame> {
    if index >= total && !(index == 0 && total == 0) {
        return Err(MalformedFrame::IndexOutOfRange { index, total });
    }
    if total > MAX_CHUNKS {
        return Err(MalformedFrame::TooManyChunks {
            total,
            max: MAX_CHUNKS,
        });
    }
    match battery {
        Some(level) if level > MAX_BATTERY => Err(MalformedFrame::BatteryOutOfRange(level as u32)),
        _ => Ok(()),
    }
}

/// Encode one chunk into a wire frame.
pub fn encode_chunk(index: u32, total: u32, battery: Option<u8>, payload: &[u8]) -> Result<Vec<u8>> {
    check_header(index, total, battery)?;

    let mut out = Vec::with_capacity(payload.len() + 24);
    out.extend_from_slice(&header(index, total, battery));
    out.extend_from_slice(payload);

    if out.len() > MAX_FRAME_LEN {
        return Err(MalformedFrame::TooLarge {
            len: out.len(),
            max: MAX_FRAME_LEN,
        }
        .into());
    }
    Ok(out)
}

fn header(index: u32, total: u32, battery: Option<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(24);
    out.extend_from_slice(index.to_string().as_bytes());
    out.push(DELIMITER);
    out.extend_from_slice(total.to_string().as_bytes());
    out.push(DELIMITER);
    if let Some(level) = battery {
        out.extend_from_slice(level.to_string().as_bytes());
        out.push(DELIMITER);
    }
    out
}

/// Largest payload that still fits in `MAX_FRAME_LEN` for every chunk of a
/// transfer of `total` chunks.
pub fn max_payload_len(total: u32, battery: Option<u8>) -> usize {
    let widest = header(total.saturating_sub(1), total, battery).len();
    MAX_FRAME_LEN.saturating_sub(widest)
}

/// Build the battery-only heartbeat frame `0|0|<battery>|0`.
pub fn heartbeat_frame(battery: u8) -> Result<Vec<u8>> {
    encode_chunk(0, 0, Some(battery), HEARTBEAT_PAYLOAD)
}

/// Decode a wire frame. Accepts both layouts.
pub fn decode_chunk(frame: &[u8]) -> std::result::Result<Chunk, MalformedFrame> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(MalformedFrame::TooLarge {
            len: frame.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut fields = frame.splitn(4, |&b| b == DELIMITER);
    let index_field = fields.next().ok_or(MalformedFrame::TooFewFields)?;
    let total_field = fields.next().ok_or(MalformedFrame::TooFewFields)?;
    let third = fields.next().ok_or(MalformedFrame::TooFewFields)?;
    let fourth = fields.next();

    let index = parse_decimal(index_field, "index")?;
    let total = parse_decimal(total_field, "total")?;

    let (battery, payload) = match (fourth, battery_level(third)) {
        (Some(rest), Some(level)) => (Some(level), rest),
        // Payload began right after the second delimiter. Slice it from the
        // original frame so any '|' inside it is kept.
        _ => {
            let offset = index_field.len() + total_field.len() + 2;
            (None, &frame[offset..])
        }
    };

    check_header(index, total, battery)?;

    Ok(Chunk {
        index,
        total,
        battery,
        payload: payload.to_vec(),
    })
}

/// Number of chunks needed for `len` bytes at `chunk_size` bytes each.
pub fn chunk_count(len: usize, chunk_size: usize) -> u32 {
    len.div_ceil(chunk_size) as u32
}

/// A battery field is 1-3 ASCII digits with a value of at most 100.
fn battery_level(field: &[u8]) -> Option<u8> {
    if !(1..=3).contains(&field.len()) {
        return None;
    }
    let level = parse_decimal(field, "battery").ok()?;
    (level <= MAX_BATTERY as u32).then_some(level as u8)
}

fn parse_decimal(field: &[u8], name: &'static str) -> std::result::Result<u32, MalformedFrame> {
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return Err(MalformedFrame::BadNumber { field: name });
    }
    // All-ASCII is checked above, so this only fails on overflow.
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or(MalformedFrame::BadNumber { field: name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;

    #[test]
    fn test_encode_without_battery() {
        let frame = encode_chunk(2, 7, None, b"abc").unwrap();
        assert_eq!(frame, b"2|7|abc");
    }

    #[test]
    fn test_encode_with_battery() {
        let frame = encode_chunk(0, 3, Some(87), &[0xFF, 0xD8]).unwrap();
        assert_eq!(frame, b"0|3|87|\xFF\xD8");
    }

    #[test]
    fn test_decode_payload_keeps_delimiters() {
        let chunk = decode_chunk(b"1|4|\xFF|a|b|").unwrap();
        assert_eq!(chunk.index, 1);
        assert_eq!(chunk.total, 4);
        assert_eq!(chunk.battery, None);
        assert_eq!(chunk.payload, b"\xFF|a|b|");
    }

    #[test]
    fn test_decode_battery_variant() {
        let chunk = decode_chunk(b"0|2|42|\xFF\xD8|x").unwrap();
        assert_eq!(chunk.battery, Some(42));
        assert_eq!(chunk.payload, b"\xFF\xD8|x");
    }

    #[test]
    fn test_decode_heartbeat() {
        let frame = heartbeat_frame(55).unwrap();
        assert_eq!(frame, b"0|0|55|0");
        let chunk = decode_chunk(&frame).unwrap();
        assert!(chunk.is_heartbeat());
        assert_eq!(chunk.battery, Some(55));
        assert_eq!(chunk.payload, b"0");
    }

    #[test]
    fn test_decode_empty_payload() {
        let chunk = decode_chunk(b"0|1|").unwrap();
        assert!(chunk.payload.is_empty());
    }

    #[test]
    fn test_reject_too_few_fields() {
        assert_eq!(decode_chunk(b"0|1"), Err(MalformedFrame::TooFewFields));
        assert_eq!(decode_chunk(b""), Err(MalformedFrame::TooFewFields));
    }

    #[test]
    fn test_reject_non_numeric() {
        assert_eq!(
            decode_chunk(b"x|3|data"),
            Err(MalformedFrame::BadNumber { field: "index" })
        );
        assert_eq!(
            decode_chunk(b"0|-3|data"),
            Err(MalformedFrame::BadNumber { field: "total" })
        );
        assert_eq!(
            decode_chunk(b"0|99999999999|data"),
            Err(MalformedFrame::BadNumber { field: "total" })
        );
    }

    #[test]
    fn test_reject_index_out_of_range() {
        assert_eq!(
            decode_chunk(b"3|3|data"),
            Err(MalformedFrame::IndexOutOfRange { index: 3, total: 3 })
        );
        assert!(encode_chunk(5, 2, None, b"x").is_err());
    }

    #[test]
    fn test_third_field_over_100_is_payload() {
        let chunk = decode_chunk(b"0|1|101|data").unwrap();
        assert_eq!(chunk.battery, None);
        assert_eq!(chunk.payload, b"101|data");

        let frame = encode_chunk(1, 3, None, b"250|\x00").unwrap();
        let chunk = decode_chunk(&frame).unwrap();
        assert_eq!(chunk.battery, None);
        assert_eq!(chunk.payload, b"250|\x00");

        assert!(encode_chunk(0, 1, Some(150), b"x").is_err());
    }

    #[test]
    fn test_battery_variant_keeps_digit_prefixed_payload() {
        let frame = encode_chunk(1, 3, Some(12), b"12|\xFF\xD9").unwrap();
        let chunk = decode_chunk(&frame).unwrap();
        assert_eq!(chunk.battery, Some(12));
        assert_eq!(chunk.payload, b"12|\xFF\xD9");
    }

    #[test]
    fn test_unmarked_digit_prefix_reads_as_battery() {
        // Without a battery field the layouts overlap; this is the known limit.
        let frame = encode_chunk(1, 3, None, b"12|\xFF\xD9").unwrap();
        let chunk = decode_chunk(&frame).unwrap();
        assert_eq!(chunk.battery, Some(12));
        assert_eq!(chunk.payload, b"\xFF\xD9");
    }

    #[test]
    fn test_reject_too_many_chunks() {
        assert_eq!(
            decode_chunk(b"0|4294967295|x"),
            Err(MalformedFrame::TooManyChunks {
                total: u32::MAX,
                max: MAX_CHUNKS
            })
        );
        assert!(decode_chunk(format!("0|{}|x", MAX_CHUNKS).as_bytes()).is_ok());
        assert!(encode_chunk(0, MAX_CHUNKS + 1, None, b"x").is_err());
    }

    #[test]
    fn test_max_payload_len_fits_frame() {
        let room = max_payload_len(3, Some(100));
        assert_eq!(room, MAX_FRAME_LEN - b"2|3|100|".len());
        assert!(encode_chunk(2, 3, Some(100), &vec![0u8; room]).is_ok());
        assert!(encode_chunk(2, 3, Some(100), &vec![0u8; room + 1]).is_err());
    }

    #[test]
    fn test_reject_oversized() {
        let payload = vec![0u8; MAX_FRAME_LEN];
        assert!(matches!(
            encode_chunk(0, 1, None, &payload),
            Err(TransferError::MalformedFrame(MalformedFrame::TooLarge { .. }))
        ));
        let mut frame = b"0|1|".to_vec();
        frame.extend_from_slice(&payload);
        assert!(matches!(
            decode_chunk(&frame),
            Err(MalformedFrame::TooLarge { .. })
        ));
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(45_000, 20_000), 3);
        assert_eq!(chunk_count(40_000, 20_000), 2);
        assert_eq!(chunk_count(1, 20_000), 1);
        assert_eq!(chunk_count(0, 20_000), 0);
    }
}
