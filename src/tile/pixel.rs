//! Pixel buffers and output channel order.

use std::sync::OnceLock;

use bytes::Bytes;
use image::ColorType;
use serde::Serialize;

// =============================================================================
// PixelBuffer
// =============================================================================

/// Channel layout of a decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelColor {
    L8,
    La8,
    Rgb8,
    Rgba8,
}

impl PixelColor {
    /// Map a decoder color type; `None` for types that need conversion.
    pub fn from_color_type(color: ColorType) -> Option<Self> {
        match color {
            ColorType::L8 => Some(PixelColor::L8),
            ColorType::La8 => Some(PixelColor::La8),
            ColorType::Rgb8 => Some(PixelColor::Rgb8),
            ColorType::Rgba8 => Some(PixelColor::Rgba8),
            _ => None,
        }
    }

    pub const fn channels(&self) -> usize {
        match self {
            PixelColor::L8 => 1,
            PixelColor::La8 => 2,
            PixelColor::Rgb8 => 3,
            PixelColor::Rgba8 => 4,
        }
    }
}

/// A decoded tile in its native channel layout.
///
/// Buffers are pooled per store and reused across reads of tiles with the
/// same dimensions and color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub color: PixelColor,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer.
    pub fn new(width: u32, height: u32, color: PixelColor) -> Self {
        Self {
            width,
            height,
            color,
            data: vec![0; Self::byte_len(width, height, color)],
        }
    }

    pub fn byte_len(width: u32, height: u32, color: PixelColor) -> usize {
        width as usize * height as usize * color.channels()
    }

    /// Whether this buffer can hold a decode of the given shape.
    pub fn fits(&self, width: u32, height: u32, color: PixelColor) -> bool {
        self.width == width
            && self.height == height
            && self.color == color
            && self.data.len() == Self::byte_len(width, height, color)
    }

    /// RGBA value of one pixel. Coordinates must be in range.
    #[inline]
    pub fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let channels = self.color.channels();
        let offset = (y as usize * self.width as usize + x as usize) * channels;
        let p = &self.data[offset..offset + channels];
        match self.color {
            PixelColor::L8 => [p[0], p[0], p[0], 255],
            PixelColor::La8 => [p[0], p[0], p[0], p[1]],
            PixelColor::Rgb8 => [p[0], p[1], p[2], 255],
            PixelColor::Rgba8 => [p[0], p[1], p[2], p[3]],
        }
    }
}

// =============================================================================
// Channel order
// =============================================================================

/// Output pixel layout requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PixelLayout {
    /// Packed `R, G, B, A` bytes
    #[default]
    Rgba8,

    /// `0xAARRGGBB` words in native byte order
    NativeArgb32,
}

/// Byte order of a native `0xAARRGGBB` word in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeChannelOrder {
    /// `A, R, G, B` (big-endian platforms)
    Argb,

    /// `B, G, R, A` (little-endian platforms)
    Bgra,
}

/// How native ARGB output is written for a channel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeWritePath {
    /// Memory order is `A, R, G, B`: bytes are written straight through
    DirectBytes,

    /// Memory order is swizzled: words are packed in the pooled int
    /// buffer and then written out
    IntPass,
}

impl NativeChannelOrder {
    pub const fn write_path(&self) -> NativeWritePath {
        match self {
            NativeChannelOrder::Argb => NativeWritePath::DirectBytes,
            NativeChannelOrder::Bgra => NativeWritePath::IntPass,
        }
    }

    /// Memory bytes of a packed `0xAARRGGBB` word in this order.
    #[inline]
    pub fn word_to_bytes(&self, word: u32) -> [u8; 4] {
        match self {
            NativeChannelOrder::Argb => word.to_be_bytes(),
            NativeChannelOrder::Bgra => word.to_le_bytes(),
        }
    }

    /// Memory bytes of one RGBA pixel in this order.
    #[inline]
    pub fn word_bytes(&self, rgba: [u8; 4]) -> [u8; 4] {
        self.word_to_bytes(pack_argb(rgba))
    }
}

/// Probe the native channel order once per process.
pub fn native_channel_order() -> NativeChannelOrder {
    static ORDER: OnceLock<NativeChannelOrder> = OnceLock::new();
    *ORDER.get_or_init(|| {
        let word = pack_argb([0x11, 0x22, 0x33, 0x44]);
        match word.to_ne_bytes() {
            [0x44, 0x11, 0x22, 0x33] => NativeChannelOrder::Argb,
            _ => NativeChannelOrder::Bgra,
        }
    })
}

/// Pack RGBA bytes into an `0xAARRGGBB` word.
#[inline]
pub fn pack_argb(rgba: [u8; 4]) -> u32 {
    u32::from_be_bytes([rgba[3], rgba[0], rgba[1], rgba[2]])
}

/// Unpack an `0xAARRGGBB` word into RGBA bytes.
#[inline]
pub fn unpack_argb(word: u32) -> [u8; 4] {
    let [a, r, g, b] = word.to_be_bytes();
    [r, g, b, a]
}

// =============================================================================
// TileImage
// =============================================================================

/// A decoded, optionally resampled tile ready for a renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Bytes,
}

impl TileImage {
    /// Size of the pixel data in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// RGBA value of one pixel regardless of layout.
    pub fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let p = &self.data[offset..offset + 4];
        match self.layout {
            PixelLayout::Rgba8 => [p[0], p[1], p[2], p[3]],
            PixelLayout::NativeArgb32 => unpack_argb(u32::from_ne_bytes([p[0], p[1], p[2], p[3]])),
        }
    }

    /// Convert to packed RGBA bytes.
    pub fn to_rgba(&self) -> Vec<u8> {
        match self.layout {
            PixelLayout::Rgba8 => self.data.to_vec(),
            PixelLayout::NativeArgb32 => self
                .data
                .chunks_exact(4)
                .flat_map(|p| unpack_argb(u32::from_ne_bytes([p[0], p[1], p[2], p[3]])))
                .collect(),
        }
    }
}
