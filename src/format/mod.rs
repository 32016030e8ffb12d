//! Tile store format probing.
//!
//! This module recognizes MBTiles-style blob-table databases and describes
//! the tile pyramid they hold.
//!
//! # Discovery
//!
//! Use [`discover`] to probe a file. The outcome is one of:
//!
//! - **Store**: a [`TileMatrixDescriptor`] for a non-empty tile store
//! - **NotATileStore**: the schema does not match; try a different format
//! - **Empty**: the schema matches but there are no tiles

pub mod descriptor;
pub mod detect;

pub use descriptor::{
    discover, discover_connection, discover_with_fallback, Discovery, TileMatrixDescriptor,
    DEFAULT_FALLBACK_TILE_SIZE,
};
pub use detect::{classify_columns, detect_schema, has_table, TileSchema};
