//! Configuration management for tilevault.
//!
//! Engine tuning comes from command-line arguments or environment variables
//! with the `TILEVAULT_` prefix, falling back to the defaults below.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use tilevault::config::Cli;
//!
//! let cli = Cli::parse();
//! cli.engine.validate()?;
//! let registry = cli.engine.registry();
//! ```
//!
//! # Environment Variables
//!
//! - `TILEVAULT_ZOOM_FUDGE_FACTOR` - Multiplier on the requested resolution (default: 2.0)
//! - `TILEVAULT_POOL_CAPACITY` - Decode buffers kept per pool per store (default: 1)
//! - `TILEVAULT_STOP_POLL_MS` - Poll interval while stopping a layer (default: 10)
//! - `TILEVAULT_CACHE_BYTES` - Byte budget of a layer's zoom-level cache (default: 64MB)
//! - `TILEVAULT_FALLBACK_TILE_SIZE` - Tile size when the sample blob fails to decode (default: 256)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::format::DEFAULT_FALLBACK_TILE_SIZE;
use crate::layer::{
    LayerConfig, DEFAULT_CACHE_BYTES, DEFAULT_STOP_POLL_INTERVAL, DEFAULT_ZOOM_FUDGE_FACTOR,
};
use crate::mosaic::GeoBounds;
use crate::store::{StoreRegistry, DEFAULT_POOL_CAPACITY};
use crate::tile::{PixelLayout, SourceRect};

// =============================================================================
// Default Values
// =============================================================================

/// Default stop poll interval in milliseconds.
pub const DEFAULT_STOP_POLL_MS: u64 = DEFAULT_STOP_POLL_INTERVAL.as_millis() as u64;

/// Default number of frames driven by `warm`.
pub const DEFAULT_WARM_FRAMES: u32 = 50;

// =============================================================================
// Engine Configuration
// =============================================================================

/// Engine tuning shared by every subcommand.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Multiplier applied to the requested resolution when picking the
    /// finest zoom level.
    #[arg(long, global = true, default_value_t = DEFAULT_ZOOM_FUDGE_FACTOR, env = "TILEVAULT_ZOOM_FUDGE_FACTOR")]
    pub zoom_fudge_factor: f64,

    /// Decode buffers kept per pool per store.
    #[arg(long, global = true, default_value_t = DEFAULT_POOL_CAPACITY, env = "TILEVAULT_POOL_CAPACITY")]
    pub pool_capacity: usize,

    /// Poll interval in milliseconds while a layer waits for its worker to stop.
    #[arg(long, global = true, default_value_t = DEFAULT_STOP_POLL_MS, env = "TILEVAULT_STOP_POLL_MS")]
    pub stop_poll_ms: u64,

    /// Byte budget of a layer's zoom-level cache.
    #[arg(long, global = true, default_value_t = DEFAULT_CACHE_BYTES, env = "TILEVAULT_CACHE_BYTES")]
    pub cache_bytes: usize,

    /// Tile size in pixels used when the sample blob fails to decode.
    #[arg(long, global = true, default_value_t = DEFAULT_FALLBACK_TILE_SIZE, env = "TILEVAULT_FALLBACK_TILE_SIZE")]
    pub fallback_tile_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            zoom_fudge_factor: DEFAULT_ZOOM_FUDGE_FACTOR,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            stop_poll_ms: DEFAULT_STOP_POLL_MS,
            cache_bytes: DEFAULT_CACHE_BYTES,
            fallback_tile_size: DEFAULT_FALLBACK_TILE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.zoom_fudge_factor.is_finite() && self.zoom_fudge_factor > 0.0) {
            return Err("zoom_fudge_factor must be a positive number".to_string());
        }
        if self.pool_capacity == 0 {
            return Err("pool_capacity must be greater than 0".to_string());
        }
        if self.stop_poll_ms == 0 {
            return Err("stop_poll_ms must be greater than 0".to_string());
        }
        if self.cache_bytes == 0 {
            return Err("cache_bytes must be greater than 0".to_string());
        }
        if self.fallback_tile_size == 0 {
            return Err("fallback_tile_size must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }

    /// Layer tuning derived from this configuration.
    pub fn layer_config(&self) -> LayerConfig {
        LayerConfig {
            zoom_fudge_factor: self.zoom_fudge_factor,
            cache_bytes: self.cache_bytes,
            stop_poll_interval: self.stop_poll_interval(),
        }
    }

    /// A store registry using this configuration's pool and fallback sizes.
    pub fn registry(&self) -> StoreRegistry {
        StoreRegistry::new(self.pool_capacity, self.fallback_tile_size)
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// tilevault - inspect and read MBTiles-style tile stores.
#[derive(Parser, Debug, Clone)]
#[command(name = "tilevault")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub engine: EngineConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Discover a store and print its tile matrix and zoom chain
    Inspect(InspectArgs),

    /// Plan a mosaic query and list the matching tiles
    Query(QueryArgs),

    /// Read one tile and write it to an image file
    Tile(TileArgs),

    /// Drive a tile layer headlessly and report cache statistics
    Warm(WarmArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Path to the tile store
    pub path: PathBuf,

    /// Print JSON instead of a summary
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Path to the tile store
    pub path: PathBuf,

    /// Coarsest resolution wanted, in meters per pixel
    #[arg(long)]
    pub min_gsd: Option<f64>,

    /// Finest resolution wanted, in meters per pixel
    #[arg(long)]
    pub max_gsd: Option<f64>,

    /// Spatial filter as south,west,north,east in degrees
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: Option<GeoBounds>,

    /// List coarse levels first
    #[arg(long, default_value_t = false)]
    pub ascending: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TileArgs {
    /// Path to the tile store
    pub path: PathBuf,

    /// Zoom level
    pub zoom: u8,

    /// Tile column
    pub x: u32,

    /// Tile row, counted from the top
    pub y: u32,

    /// Source rectangle as x,y,width,height in tile pixels
    #[arg(long, value_parser = parse_source_rect)]
    pub src: Option<SourceRect>,

    /// Output width in pixels (defaults to the source width)
    #[arg(long)]
    pub width: Option<u32>,

    /// Output height in pixels (defaults to the source height)
    #[arg(long)]
    pub height: Option<u32>,

    /// Pixel layout to read in
    #[arg(long, value_enum, default_value_t = LayoutArg::Rgba)]
    pub layout: LayoutArg,

    /// Output image (.png or .jpg)
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct WarmArgs {
    /// Path to the tile store
    pub path: PathBuf,

    /// Display resolution in meters per pixel
    #[arg(long)]
    pub resolution: f64,

    /// Number of frames to draw
    #[arg(long, default_value_t = DEFAULT_WARM_FRAMES)]
    pub frames: u32,

    /// Visible area as south,west,north,east in degrees
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: Option<GeoBounds>,
}

/// Pixel layout choices on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutArg {
    #[default]
    Rgba,
    Argb,
}

impl From<LayoutArg> for PixelLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Rgba => PixelLayout::Rgba8,
            LayoutArg::Argb => PixelLayout::NativeArgb32,
        }
    }
}

// =============================================================================
// Value Parsers
// =============================================================================

fn parse_list<T: std::str::FromStr>(
    value: &str,
    count: usize,
    what: &str,
) -> Result<Vec<T>, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != count {
        return Err(format!("expected {} comma-separated values for {}", count, what));
    }
    parts
        .iter()
        .map(|p| {
            p.parse::<T>()
                .map_err(|_| format!("invalid number '{}' in {}", p, what))
        })
        .collect()
}

/// Parse `south,west,north,east`.
pub fn parse_bbox(value: &str) -> Result<GeoBounds, String> {
    let v: Vec<f64> = parse_list(value, 4, "bbox")?;
    let (south, west, north, east) = (v[0], v[1], v[2], v[3]);
    if south > north || west > east {
        return Err("bbox must be ordered south,west,north,east".to_string());
    }
    Ok(GeoBounds::new(south, west, north, east))
}

/// Parse `x,y,width,height`.
pub fn parse_source_rect(value: &str) -> Result<SourceRect, String> {
    let v: Vec<u32> = parse_list(value, 4, "source rectangle")?;
    Ok(SourceRect::new(v[0], v[1], v[2], v[3]))
}

// =============================================================================
// Tests
// =============================================================================
