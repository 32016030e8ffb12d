//! Tile addressing within a zoom-level pyramid.
//!
//! Consumers address tiles with *logical* rows (north-up, row 0 at the top).
//! MBTiles stores *physical* rows bottom-up, so every crossing between the
//! two goes through [`invert_row`].

use serde::Serialize;

use super::projection::{tile_corner, tiles_at_zoom, GeoPoint};

/// Deepest zoom level the addressing math supports.
pub const MAX_ZOOM: u8 = 30;

/// Address of one tile in logical (north-up) space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileAddress {
    pub zoom: u8,
    pub column: u32,
    pub row: u32,
}

impl TileAddress {
    /// Create an address, returning `None` when it falls outside the grid
    /// for its zoom level.
    pub fn new(zoom: u8, column: u32, row: u32) -> Option<Self> {
        if zoom > MAX_ZOOM {
            return None;
        }
        let n = tiles_at_zoom(zoom);
        if column >= n || row >= n {
            return None;
        }
        Some(Self { zoom, column, row })
    }

    /// Address from a physical (bottom-up) MBTiles row.
    pub fn from_physical(zoom: u8, column: u32, physical_row: u32) -> Option<Self> {
        if zoom > MAX_ZOOM || physical_row >= tiles_at_zoom(zoom) {
            return None;
        }
        Self::new(zoom, column, invert_row(physical_row, zoom))
    }

    /// Row as stored in the blob table.
    pub fn physical_row(&self) -> u32 {
        invert_row(self.row, self.zoom)
    }

    /// Corners of the tile, in upper-left, upper-right, lower-right,
    /// lower-left order.
    pub fn corners(&self) -> [GeoPoint; 4] {
        let x = self.column as f64;
        let y = self.row as f64;
        [
            tile_corner(self.zoom, x, y),
            tile_corner(self.zoom, x + 1.0, y),
            tile_corner(self.zoom, x + 1.0, y + 1.0),
            tile_corner(self.zoom, x, y + 1.0),
        ]
    }
}

/// Converts between logical and physical rows at `zoom`.
///
/// The transform is its own inverse. `row` must be below `2^zoom`.
#[inline]
pub fn invert_row(row: u32, zoom: u8) -> u32 {
    let n = tiles_at_zoom(zoom);
    debug_assert!(row < n, "row {} out of range for zoom {}", row, zoom);
    (n - 1) - row
}

/// Inclusive range of logical tile columns and rows at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileRange {
    pub min_column: u32,
    pub max_column: u32,
    pub min_row: u32,
    pub max_row: u32,
}

impl TileRange {
    pub fn new(min_column: u32, max_column: u32, min_row: u32, max_row: u32) -> Self {
        Self {
            min_column: min_column.min(max_column),
            max_column: min_column.max(max_column),
            min_row: min_row.min(max_row),
            max_row: min_row.max(max_row),
        }
    }

    /// Physical row range equivalent to this logical range.
    ///
    /// Inversion flips ordering, so the logical maximum becomes the physical
    /// minimum.
    pub fn physical_rows(&self, zoom: u8) -> (u32, u32) {
        (invert_row(self.max_row, zoom), invert_row(self.min_row, zoom))
    }

    pub fn contains(&self, address: &TileAddress) -> bool {
        (self.min_column..=self.max_column).contains(&address.column)
            && (self.min_row..=self.max_row).contains(&address.row)
    }

    pub fn tile_count(&self) -> u64 {
        (self.max_column - self.min_column + 1) as u64 * (self.max_row - self.min_row + 1) as u64
    }
}

/// One level of the resolution chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoomLevel {
    /// Zoom level as stored in the blob table
    pub level: u8,

    /// Ground resolution in meters per pixel
    pub resolution: f64,

    pub tile_width: u32,
    pub tile_height: u32,
}

/// Builds the doubling resolution chain rooted at `min_zoom`.
///
/// Level `L` has resolution `root_resolution / 2^(L - min_zoom)`.
pub fn zoom_chain(
    min_zoom: u8,
    max_zoom: u8,
    root_resolution: f64,
    tile_width: u32,
    tile_height: u32,
) -> Vec<ZoomLevel> {
    (min_zoom..=max_zoom)
        .map(|level| ZoomLevel {
            level,
            resolution: root_resolution / (1u64 << (level - min_zoom)) as f64,
            tile_width,
            tile_height,
        })
        .collect()
}

/// Picks the zoom-level index to draw at `display_resolution`.
///
/// Starting from the finest level, walks toward coarser levels while the
/// level is finer than `display_resolution * fudge_factor`. Returns the
/// coarsest level if every level is finer than that, and `None` for an
/// empty chain or a non-positive resolution.
pub fn select_zoom_level(
    levels: &[ZoomLevel],
    display_resolution: f64,
    fudge_factor: f64,
) -> Option<usize> {
    if levels.is_empty() || !(display_resolution > 0.0) || !display_resolution.is_finite() {
        return None;
    }
    let threshold = display_resolution * fudge_factor;
    let mut index = levels.len() - 1;
    while index > 0 && levels[index].resolution < threshold {
        index -= 1;
    }
    Some(index)
}
