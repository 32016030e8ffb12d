//! Tile matrix discovery.
//!
//! Produces the pyramid description of a tile store: zoom range, grid
//! extents at the minimum zoom, tile pixel size and alpha support.
//!
//! Discovery runs metadata-first, scan-second:
//!
//! 1. Probe the `tiles` schema (see [`detect_schema`](super::detect_schema))
//! 2. Read zoom bounds and the dataset name from the `metadata` table
//! 3. Fill in missing or negative zoom bounds with `ORDER BY zoom_level` scans
//! 4. Discover the grid extents at the minimum zoom with four `MIN`/`MAX` queries
//! 5. Decode the header of one sampled blob for the tile pixel size

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageReader;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::mosaic::{
    invert_row, resolution_at_zoom, tile_corner, zoom_chain, GeoBounds, TileRange, ZoomLevel,
    MAX_ZOOM, WEB_MERCATOR_SRID,
};

use super::detect::{detect_schema, has_table, TileSchema};

/// Tile pixel size used when the sampled blob cannot be decoded.
pub const DEFAULT_FALLBACK_TILE_SIZE: u32 = 256;

// =============================================================================
// TileMatrixDescriptor
// =============================================================================

/// Pyramid metadata for one tile store.
///
/// Built once when the store is opened and immutable afterwards. Grid
/// extents are physical (bottom-up) rows and columns at `min_zoom`, as
/// stored in the blob table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileMatrixDescriptor {
    /// Path the descriptor was discovered from
    pub path: PathBuf,

    /// Dataset name from the `metadata` table
    pub name: Option<String>,

    /// Tile image format from the `metadata` table (e.g. "png")
    pub format: Option<String>,

    pub min_zoom: u8,
    pub max_zoom: u8,

    /// Tile width in pixels
    pub tile_width: u32,

    /// Tile height in pixels
    pub tile_height: u32,

    /// Whether the `tiles` table carries a `tile_alpha` column
    pub has_alpha_channel: bool,

    pub grid_min_column: u32,
    pub grid_max_column: u32,
    pub grid_min_row: u32,
    pub grid_max_row: u32,

    /// Spatial reference of the tiles
    pub srid: i32,
}

impl TileMatrixDescriptor {
    /// Number of zoom levels in the pyramid.
    pub fn level_count(&self) -> usize {
        (self.max_zoom - self.min_zoom) as usize + 1
    }

    /// Index into the zoom chain for a stored zoom level.
    pub fn zoom_index(&self, level: u8) -> Option<usize> {
        if (self.min_zoom..=self.max_zoom).contains(&level) {
            Some((level - self.min_zoom) as usize)
        } else {
            None
        }
    }

    /// Stored zoom level for a zoom chain index.
    pub fn level_at(&self, index: usize) -> Option<u8> {
        if index < self.level_count() {
            Some(self.min_zoom + index as u8)
        } else {
            None
        }
    }

    /// The doubling resolution chain, coarsest first.
    pub fn zoom_levels(&self) -> Vec<ZoomLevel> {
        zoom_chain(
            self.min_zoom,
            self.max_zoom,
            resolution_at_zoom(self.min_zoom, self.tile_width),
            self.tile_width,
            self.tile_height,
        )
    }

    /// Logical tile range covered at the minimum zoom.
    pub fn grid_range(&self) -> TileRange {
        TileRange::new(
            self.grid_min_column,
            self.grid_max_column,
            invert_row(self.grid_max_row, self.min_zoom),
            invert_row(self.grid_min_row, self.min_zoom),
        )
    }

    /// Full geodetic coverage of the store.
    ///
    /// The four corners of the minimum-zoom grid are projected and the
    /// extrema are taken across all of them.
    pub fn bounds(&self) -> GeoBounds {
        let range = self.grid_range();
        let zoom = self.min_zoom;
        let west = range.min_column as f64;
        let east = range.max_column as f64 + 1.0;
        let north = range.min_row as f64;
        let south = range.max_row as f64 + 1.0;

        let corners = [
            tile_corner(zoom, west, north),
            tile_corner(zoom, east, north),
            tile_corner(zoom, east, south),
            tile_corner(zoom, west, south),
        ];
        // Four corners are always present.
        GeoBounds::from_points(&corners).unwrap_or(GeoBounds::new(0.0, 0.0, 0.0, 0.0))
    }

    /// Logical tile range covered at an arbitrary level of the pyramid.
    pub fn range_at(&self, level: u8) -> Option<TileRange> {
        if level < self.min_zoom || level > self.max_zoom {
            return None;
        }
        let shift = level - self.min_zoom;
        let root = self.grid_range();
        let scale = 1u32 << shift;
        Some(TileRange::new(
            root.min_column * scale,
            (root.max_column + 1) * scale - 1,
            root.min_row * scale,
            (root.max_row + 1) * scale - 1,
        ))
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Outcome of probing a candidate store.
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    /// A tile store with at least one tile
    Store(TileMatrixDescriptor),

    /// The schema does not match an accepted tile layout
    NotATileStore,

    /// The schema is valid but the store holds no tiles
    Empty,
}

impl Discovery {
    pub fn descriptor(&self) -> Option<&TileMatrixDescriptor> {
        match self {
            Discovery::Store(descriptor) => Some(descriptor),
            _ => None,
        }
    }
}

/// Open a store read-only.
pub(crate) fn open_read_only(path: &Path) -> Result<Connection, StoreError> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| StoreError::Open {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Discover the tile matrix of the store at `path`.
///
/// Opens its own read-only connection; use
/// [`StoreRegistry`](crate::store::StoreRegistry) to share connections.
pub fn discover(path: impl AsRef<Path>) -> Result<Discovery, StoreError> {
    discover_with_fallback(path, DEFAULT_FALLBACK_TILE_SIZE)
}

/// [`discover`] with an explicit fallback tile size.
pub fn discover_with_fallback(
    path: impl AsRef<Path>,
    fallback_tile_size: u32,
) -> Result<Discovery, StoreError> {
    let path = path.as_ref();
    let conn = open_read_only(path)?;
    let result = discover_connection(&conn, path, fallback_tile_size);
    if let Err(ref e) = result {
        warn!("No tile matrix produced for {}: {}", path.display(), e);
    }
    result
}

/// Discover the tile matrix over an already open connection.
pub fn discover_connection(
    conn: &Connection,
    path: &Path,
    fallback_tile_size: u32,
) -> Result<Discovery, StoreError> {
    let corrupt = |message: String| StoreError::Corrupt {
        path: path.display().to_string(),
        message,
    };

    let schema = match detect_schema(conn) {
        Ok(Some(schema)) => schema,
        Ok(None) => {
            debug!("{} has no recognized tiles table", path.display());
            return Ok(Discovery::NotATileStore);
        }
        Err(e) if e.sqlite_error_code() == Some(ErrorCode::NotADatabase) => {
            debug!("{} is not a database", path.display());
            return Ok(Discovery::NotATileStore);
        }
        Err(e) => return Err(corrupt(e.to_string())),
    };

    let any_tile: Option<i64> = conn
        .query_row("SELECT 1 FROM tiles LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|e| corrupt(e.to_string()))?;
    if any_tile.is_none() {
        debug!("{} has a valid schema but no tiles", path.display());
        return Ok(Discovery::Empty);
    }

    let metadata = read_metadata(conn).map_err(|e| corrupt(e.to_string()))?;

    let min_zoom = match metadata.min_zoom {
        Some(zoom) => zoom,
        None => {
            debug!("{}: scanning for minimum zoom level", path.display());
            match scan_zoom(conn, "ASC").map_err(|e| corrupt(e.to_string()))? {
                Some(zoom) => zoom,
                None => return Ok(Discovery::Empty),
            }
        }
    };
    let max_zoom = match metadata.max_zoom {
        Some(zoom) => zoom,
        None => {
            debug!("{}: scanning for maximum zoom level", path.display());
            match scan_zoom(conn, "DESC").map_err(|e| corrupt(e.to_string()))? {
                Some(zoom) => zoom,
                None => return Ok(Discovery::Empty),
            }
        }
    };

    let min_zoom = to_zoom(min_zoom).ok_or_else(|| corrupt(format!("invalid zoom {}", min_zoom)))?;
    let max_zoom = to_zoom(max_zoom).ok_or_else(|| corrupt(format!("invalid zoom {}", max_zoom)))?;
    if min_zoom > max_zoom {
        return Err(corrupt(format!(
            "minimum zoom {} exceeds maximum zoom {}",
            min_zoom, max_zoom
        )));
    }

    let extent = |sql: &str| -> Result<u32, StoreError> {
        let value: Option<i64> = conn
            .query_row(sql, [min_zoom as i64], |row| row.get(0))
            .map_err(|e| corrupt(e.to_string()))?;
        let value = value
            .ok_or_else(|| corrupt(format!("no tiles at minimum zoom level {}", min_zoom)))?;
        u32::try_from(value).map_err(|_| corrupt(format!("invalid grid index {}", value)))
    };
    let grid_min_column = extent("SELECT MIN(tile_column) FROM tiles WHERE zoom_level = ?1")?;
    let grid_max_column = extent("SELECT MAX(tile_column) FROM tiles WHERE zoom_level = ?1")?;
    let grid_min_row = extent("SELECT MIN(tile_row) FROM tiles WHERE zoom_level = ?1")?;
    let grid_max_row = extent("SELECT MAX(tile_row) FROM tiles WHERE zoom_level = ?1")?;

    let limit = 1u32 << min_zoom;
    if grid_max_column >= limit || grid_max_row >= limit {
        return Err(corrupt(format!(
            "grid extents exceed {}x{} tiles at zoom {}",
            limit, limit, min_zoom
        )));
    }

    let (tile_width, tile_height) =
        sample_tile_size(conn, min_zoom).unwrap_or_else(|| {
            debug!(
                "{}: tile size not decodable, using {}x{}",
                path.display(),
                fallback_tile_size,
                fallback_tile_size
            );
            (fallback_tile_size, fallback_tile_size)
        });

    Ok(Discovery::Store(TileMatrixDescriptor {
        path: path.to_path_buf(),
        name: metadata.name,
        format: metadata.format,
        min_zoom,
        max_zoom,
        tile_width,
        tile_height,
        has_alpha_channel: schema == TileSchema::WithAlpha,
        grid_min_column,
        grid_max_column,
        grid_min_row,
        grid_max_row,
        srid: WEB_MERCATOR_SRID,
    }))
}

// =============================================================================
// Helpers
// =============================================================================

#[derive(Debug, Default)]
struct Metadata {
    min_zoom: Option<i64>,
    max_zoom: Option<i64>,
    name: Option<String>,
    format: Option<String>,
}

fn read_metadata(conn: &Connection) -> Result<Metadata, rusqlite::Error> {
    let mut metadata = Metadata::default();
    if !has_table(conn, "metadata")? {
        return Ok(metadata);
    }

    let mut stmt = conn.prepare("SELECT name, CAST(value AS TEXT) FROM metadata")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
    })?;

    for row in rows {
        let (name, value) = match row? {
            (Some(name), Some(value)) => (name, value),
            _ => continue,
        };
        match name.as_str() {
            "minZoomLevel" | "minzoom" => metadata.min_zoom = parse_zoom(&value),
            "maxZoomLevel" | "maxzoom" => metadata.max_zoom = parse_zoom(&value),
            "name" => metadata.name = Some(value),
            "format" => metadata.format = Some(value),
            _ => {}
        }
    }
    Ok(metadata)
}

/// Negative or unparsable zoom values count as absent.
fn parse_zoom(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok().filter(|zoom| *zoom >= 0)
}

fn to_zoom(value: i64) -> Option<u8> {
    u8::try_from(value).ok().filter(|zoom| *zoom <= MAX_ZOOM)
}

fn scan_zoom(conn: &Connection, order: &str) -> Result<Option<i64>, rusqlite::Error> {
    let sql = format!(
        "SELECT zoom_level FROM tiles ORDER BY zoom_level {} LIMIT 1",
        order
    );
    conn.query_row(&sql, [], |row| row.get(0)).optional()
}

/// Bounds-only decode of one blob at `zoom`.
fn sample_tile_size(conn: &Connection, zoom: u8) -> Option<(u32, u32)> {
    let blob: Vec<u8> = conn
        .query_row(
            "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_data IS NOT NULL LIMIT 1",
            [zoom as i64],
            |row| row.get(0),
        )
        .optional()
        .ok()??;

    ImageReader::new(Cursor::new(blob))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

// =============================================================================
// Tests
// =============================================================================
