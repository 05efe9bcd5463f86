//! Shared image decoding, resizing and JPEG encoding helpers.

use std::io::Cursor;

use image::{
    codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, ImageEncoder, RgbImage,
    RgbaImage,
};
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

use crate::error::{RenderError, RenderResult};

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }

    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = RgbImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgb8(image))
}

fn decode_image_from_memory_with_fallback(bytes: &[u8]) -> Option<DynamicImage> {
    // Thumbnail hosts occasionally serve JPEGs with trailing junk; the strict
    // decoder rejects those, the non-strict one does not.
    image::load_from_memory(bytes)
        .ok()
        .or_else(|| decode_jpeg_non_strict(bytes))
}

/// Decodes downloaded bytes into an opaque RGB image.
pub fn decode_rgb(url: &str, bytes: &[u8]) -> RenderResult<RgbImage> {
    decode_image_from_memory_with_fallback(bytes)
        .map(|decoded| decoded.to_rgb8())
        .ok_or_else(|| RenderError::DecodeFailed {
            url: url.to_string(),
        })
}

/// Resizes to exactly `width`×`height`, ignoring the source aspect ratio.
pub fn resize_exact(source: &RgbImage, width: u32, height: u32) -> RgbImage {
    if source.width() == width && source.height() == height {
        return source.clone();
    }
    image::imageops::resize(source, width.max(1), height.max(1), FilterType::Triangle)
}

/// Drops the alpha channel of an already-flattened image.
pub fn rgba_to_rgb(image: &RgbaImage) -> RgbImage {
    DynamicImage::ImageRgba8(image.clone()).to_rgb8()
}

/// Encodes at an explicit quality, clamped to 1..=100.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> RenderResult<Vec<u8>> {
    let mut encoded = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut encoded, quality.clamp(1, 100));
    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|error| RenderError::Encode(error.to_string()))?;
    Ok(encoded)
}

/// Encodes with the encoder's default quality.
pub fn encode_jpeg_default(image: &RgbImage) -> RenderResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut cursor, image::ImageFormat::Jpeg)
        .map_err(|error| RenderError::Encode(error.to_string()))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
pub(crate) fn encode_test_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let source = RgbImage::from_pixel(width, height, image::Rgb(color));
    let mut cursor = Cursor::new(Vec::<u8>::new());
    DynamicImage::ImageRgb8(source)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .expect("png encoding should succeed");
    cursor.into_inner()
}
