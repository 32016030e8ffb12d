//! Image file encoding for decoded tiles.
//!
//! Decoded tiles are raw pixels. This module writes them back out as PNG
//! (lossless, keeps the alpha channel) or JPEG (alpha dropped) for export.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage, RgbaImage};

use crate::error::ReadError;

use super::pixel::TileImage;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFileFormat {
    Png,
    Jpeg { quality: u8 },
}

impl TileFileFormat {
    /// Pick a format from a file extension, defaulting to PNG.
    pub fn from_extension(extension: Option<&str>) -> Self {
        match extension.map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("jpg") | Some("jpeg") => TileFileFormat::Jpeg {
                quality: DEFAULT_JPEG_QUALITY,
            },
            _ => TileFileFormat::Png,
        }
    }
}

fn encode_error(e: image::ImageError) -> ReadError {
    ReadError::EncodeFailure {
        message: e.to_string(),
    }
}

/// Encode a tile in the given format.
pub fn encode_tile(tile: &TileImage, format: TileFileFormat) -> Result<Bytes, ReadError> {
    let rgba = RgbaImage::from_raw(tile.width, tile.height, tile.to_rgba()).ok_or_else(|| {
        ReadError::EncodeFailure {
            message: format!("pixel data does not match {}x{}", tile.width, tile.height),
        }
    })?;

    let mut output = Vec::new();
    match format {
        TileFileFormat::Png => {
            PngEncoder::new(&mut output)
                .write_image(
                    rgba.as_raw(),
                    tile.width,
                    tile.height,
                    ExtendedColorType::Rgba8,
                )
                .map_err(encode_error)?;
        }
        TileFileFormat::Jpeg { quality } => {
            let rgb: RgbImage = image::DynamicImage::ImageRgba8(rgba).into_rgb8();
            JpegEncoder::new_with_quality(&mut output, quality.clamp(1, 100))
                .encode_image(&rgb)
                .map_err(encode_error)?;
        }
    }
    Ok(Bytes::from(output))
}
