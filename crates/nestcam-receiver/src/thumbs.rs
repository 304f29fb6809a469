use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, warn};

/// Edge length of the square gallery thumbnails.
pub const THUMB_SIZE: u32 = 250;
pub const THUMB_QUALITY: u8 = 70;

/// Centre-crop `src` to a square, scale it to `THUMB_SIZE` and write it as
/// JPEG to `dst`.
pub fn make_thumbnail(src: &Path, dst: &Path) -> Result<()> {
    let img = image::open(src).with_context(|| format!("cannot decode {}", src.display()))?;
    let (width, height) = (img.width(), img.height());
    let side = width.min(height);
    let square = img.crop_imm((width - side) / 2, (height - side) / 2, side, side);
    let thumb = square.resize_exact(THUMB_SIZE, THUMB_SIZE, FilterType::Lanczos3);

    let mut writer = BufWriter::new(File::create(dst)?);
    let encoder = JpegEncoder::new_with_quality(&mut writer, THUMB_QUALITY);
    DynamicImage::ImageRgb8(thumb.to_rgb8()).write_with_encoder(encoder)?;
    Ok(())
}

/// Generate thumbnails for every stored JPEG that lacks one. Images that
/// fail to decode are logged and skipped. Returns how many were created.
pub fn ensure_thumbnails(image_dir: &Path, thumb_dir: &Path) -> Result<usize> {
    fs::create_dir_all(thumb_dir)?;
    let mut created = 0;

    for entry in fs::read_dir(image_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file()
            || path.extension().and_then(|e| e.to_str()) != Some("jpg")
        {
            continue;
        }
        let dst = thumb_dir.join(entry.file_name());
        if dst.exists() {
            continue;
        }
        match make_thumbnail(&path, &dst) {
            Ok(()) => {
                debug!("Thumbnail created: {}", dst.display());
                created += 1;
            }
            Err(e) => {
                warn!("Skipping thumbnail for {}: {:#}", path.display(), e);
                // a half-written file would hide the image from the next pass
                let _ = fs::remove_file(&dst);
            }
        }
    }
    Ok(created)
}
