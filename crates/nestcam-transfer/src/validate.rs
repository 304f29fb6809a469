//! Format check applied to a fully reassembled image.

use image::ImageFormat;

use crate::error::{Result, TransferError};

/// Accept `bytes` only if they sniff as JPEG and decode cleanly.
/// Returns the image dimensions.
pub fn validate_jpeg(bytes: &[u8]) -> Result<(u32, u32)> {
    let format = image::guess_format(bytes)
        .map_err(|e| TransferError::CorruptImage(format!("unrecognised format: {}", e)))?;
    if format != ImageFormat::Jpeg {
        return Err(TransferError::CorruptImage(format!(
            "rejected image, format {:?}",
            format
        )));
    }

    let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| TransferError::CorruptImage(format!("decode failed: {}", e)))?;
    Ok((img.width(), img.height()))
}
