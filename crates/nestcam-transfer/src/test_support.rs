//! Image fixtures for unit tests.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage};

fn patterned(width: u32, height: u32) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
    });
    DynamicImage::ImageRgb8(img)
}

pub fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    patterned(width, height)
        .write_to(&mut out, ImageFormat::Jpeg)
        .expect("encode jpeg fixture");
    out.into_inner()
}

pub fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    patterned(width, height)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png fixture");
    out.into_inner()
}

/// A JPEG of exactly `len` bytes, padded with a comment segment after SOI.
pub fn jpeg_fixture_sized(len: usize) -> Vec<u8> {
    let base = jpeg_fixture(32, 32);
    let segment_len = len - base.len() - 2;
    assert!((2..=u16::MAX as usize).contains(&segment_len), "cannot pad to {len}");

    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&base[..2]);
    out.extend_from_slice(&[0xFF, 0xFE]);
    out.extend_from_slice(&(segment_len as u16).to_be_bytes());
    out.resize(out.len() + segment_len - 2, b'.');
    out.extend_from_slice(&base[2..]);
    out
}
