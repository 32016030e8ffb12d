//! # tilevault
//!
//! A tiled raster storage and caching engine for MBTiles-style SQLite
//! tile stores.
//!
//! Tiles live in a zoom-level pyramid inside a `tiles` blob table. This
//! library discovers the pyramid, shares one open connection per store
//! between any number of readers, decodes and resamples tiles into pooled
//! buffers, and feeds a renderer from a background worker that never makes
//! the render loop wait on storage.
//!
//! ## Features
//!
//! - **Pyramid discovery**: Zoom bounds, grid extents and tile size from
//!   metadata, with scans when metadata is missing
//! - **Shared stores**: Reference-counted connections that close exactly once
//! - **Pooled decoding**: Decode buffers recycled per store
//! - **Mosaic queries**: GSD and bounding-box filtered tile listings with
//!   locator strings
//! - **Async layers**: Start/stop/suspend/resume lifecycle around a single
//!   worker thread, with versioned publication into the render cache
//!
//! ## Architecture
//!
//! - [`mod@format`] - Schema detection and tile matrix discovery
//! - [`mosaic`] - Tile addressing, Web Mercator math, query planning, locators
//! - [`store`] - Shared store registry and buffer pools
//! - [`tile`] - Tile reading, pixel layouts and image export
//! - [`layer`] - Lifecycle controller, worker and zoom-level cache
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use tilevault::{SourceRect, StoreRegistry, TileAddress, TileReader};
//!
//! let registry = StoreRegistry::global();
//! let reader = TileReader::open(registry, "world.mbtiles")?;
//! let address = TileAddress::new(2, 1, 1).expect("valid address");
//! let tile = reader.read(address, SourceRect::full(256, 256), 128, 128)?;
//! assert_eq!(tile.width, 128);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod layer;
pub mod mosaic;
pub mod store;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, EngineConfig};
pub use error::{LocatorError, ReadError, StoreError};
pub use format::{
    detect_schema, discover, discover_with_fallback, Discovery, TileMatrixDescriptor, TileSchema,
    DEFAULT_FALLBACK_TILE_SIZE,
};
pub use layer::{
    CacheEntry, LayerConfig, LayerState, LifecycleController, LifecycleState, TileLayer,
    TileRenderer, View, VisibilitySignal, ZoomLevelCache,
};
pub use mosaic::{
    select_zoom_level, zoom_chain, GeoBounds, GeoPoint, MosaicQuery, MosaicTile, QuerySpec,
    TileAddress, TileLocator, TileRange, ZoomLevel,
};
pub use store::{StoreHandle, StoreRegistry};
pub use tile::{
    encode_tile, read_locator, PixelLayout, SourceRect, TileFileFormat, TileImage, TileReader,
    TileSource,
};
