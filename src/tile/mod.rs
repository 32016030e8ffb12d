//! Tile decoding and output.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          TileLayer worker / CLI         │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               TileReader                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  PixelBuffer │  │  Sampler        │  │
//! │  │  (pooled     │  │  (sub-rect →    │  │
//! │  │   decode)    │  │   dest size)    │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │         StoreHandle (session lock)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileReader`]: Fetches, decodes and resamples tiles from a shared store
//! - [`TileSource`]: The reader interface a layer's worker consumes
//! - [`PixelBuffer`]: Native-layout decode target, pooled per store
//! - [`TileImage`]: Output pixels in the caller's [`PixelLayout`]
//! - [`encode_tile`]: PNG/JPEG export of a decoded tile

pub mod encoder;
pub mod pixel;
pub mod reader;

pub use encoder::{encode_tile, TileFileFormat, DEFAULT_JPEG_QUALITY};
pub use pixel::{
    native_channel_order, pack_argb, unpack_argb, NativeChannelOrder, NativeWritePath, PixelBuffer,
    PixelColor, PixelLayout, TileImage,
};
pub use reader::{read_locator, ReadResult, SourceRect, TileReader, TileSource};
