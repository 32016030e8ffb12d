//! Query construction against the `tiles` blob table.
//!
//! Every query selects rows already converted to logical (north-up) rows:
//! the `tile_y` result column is computed in SQL as
//! `((1 << zoom_level) - 1) - tile_row`. Logical ranges are translated to
//! physical `BETWEEN` predicates before binding.
//!
//! Building a query never fails; execution errors are reported by the
//! caller that runs it.

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::Row;
use serde::Serialize;
use tracing::debug;

use crate::format::TileMatrixDescriptor;

use super::address::{invert_row, TileAddress, TileRange};
use super::locator::TileLocator;
use super::projection::{tile_index, GeoBounds, GeoPoint};

/// Column projection shared by every generated query.
const ROW_PROJECTION: &str =
    "rowid, zoom_level, tile_column, ((1 << zoom_level) - 1) - tile_row AS tile_y";

// =============================================================================
// QuerySpec
// =============================================================================

/// Positions of the result columns in a [`QuerySpec`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultColumns {
    pub rowid: usize,
    pub zoom: usize,
    pub column: usize,
    pub row: usize,
    pub data: Option<usize>,
    pub alpha: Option<usize>,
}

impl ResultColumns {
    const fn header() -> Self {
        Self {
            rowid: 0,
            zoom: 1,
            column: 2,
            row: 3,
            data: None,
            alpha: None,
        }
    }

    const fn with_blobs(alpha: bool) -> Self {
        Self {
            data: Some(4),
            alpha: if alpha { Some(5) } else { None },
            ..Self::header()
        }
    }
}

/// A parameterized query against the blob table.
///
/// Immutable once built and consumed once by a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub sql: String,
    pub bind_arguments: Vec<Value>,
    pub zoom_level_index: usize,
    pub columns: ResultColumns,
}

impl QuerySpec {
    /// Point query for one tile, including its blob columns.
    pub fn for_tile(descriptor: &TileMatrixDescriptor, address: TileAddress) -> Self {
        let alpha = descriptor.has_alpha_channel;
        let blobs = if alpha {
            ", tile_data, tile_alpha"
        } else {
            ", tile_data"
        };
        Self {
            sql: format!(
                "SELECT {}{} FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                ROW_PROJECTION, blobs
            ),
            bind_arguments: vec![
                Value::Integer(address.zoom as i64),
                Value::Integer(address.column as i64),
                Value::Integer(address.physical_row() as i64),
            ],
            zoom_level_index: address.zoom.saturating_sub(descriptor.min_zoom) as usize,
            columns: ResultColumns::with_blobs(alpha),
        }
    }

    /// Every tile stored at one zoom level, without blobs.
    pub fn for_zoom_level(descriptor: &TileMatrixDescriptor, zoom: u8) -> Self {
        Self {
            sql: format!(
                "SELECT {} FROM tiles WHERE zoom_level = ?1 ORDER BY tile_column, tile_row DESC",
                ROW_PROJECTION
            ),
            bind_arguments: vec![Value::Integer(zoom as i64)],
            zoom_level_index: zoom.saturating_sub(descriptor.min_zoom) as usize,
            columns: ResultColumns::header(),
        }
    }

    /// Tiles inside a logical range at one zoom level, without blobs.
    pub fn for_tile_range(descriptor: &TileMatrixDescriptor, zoom: u8, range: TileRange) -> Self {
        let (min_row, max_row) = range.physical_rows(zoom);
        Self {
            sql: format!(
                "SELECT {} FROM tiles WHERE zoom_level = ?1 \
                 AND tile_column BETWEEN ?2 AND ?3 AND tile_row BETWEEN ?4 AND ?5 \
                 ORDER BY tile_column, tile_row DESC",
                ROW_PROJECTION
            ),
            bind_arguments: vec![
                Value::Integer(zoom as i64),
                Value::Integer(range.min_column as i64),
                Value::Integer(range.max_column as i64),
                Value::Integer(min_row as i64),
                Value::Integer(max_row as i64),
            ],
            zoom_level_index: zoom.saturating_sub(descriptor.min_zoom) as usize,
            columns: ResultColumns::header(),
        }
    }

    /// Decode one result row.
    pub fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<TileRow> {
        Ok(TileRow {
            rowid: row.get(self.columns.rowid)?,
            zoom: row.get(self.columns.zoom)?,
            column: row.get(self.columns.column)?,
            row: row.get(self.columns.row)?,
            data: match self.columns.data {
                Some(index) => row.get(index)?,
                None => None,
            },
            alpha: match self.columns.alpha {
                Some(index) => row.get(index)?,
                None => None,
            },
        })
    }
}

/// One row produced by a [`QuerySpec`]. `row` is already logical.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRow {
    pub rowid: i64,
    pub zoom: i64,
    pub column: i64,
    pub row: i64,
    pub data: Option<Vec<u8>>,
    pub alpha: Option<Vec<u8>>,
}

impl TileRow {
    /// Address of the row, if it lies inside the grid for its zoom.
    pub fn address(&self) -> Option<TileAddress> {
        TileAddress::new(
            u8::try_from(self.zoom).ok()?,
            u32::try_from(self.column).ok()?,
            u32::try_from(self.row).ok()?,
        )
    }
}

/// Literal-valued SQL for one tile's blobs, used in locators.
pub fn tile_blob_sql(address: TileAddress, has_alpha: bool) -> String {
    let blobs = if has_alpha {
        "tile_data, tile_alpha"
    } else {
        "tile_data"
    };
    format!(
        "SELECT {} FROM tiles WHERE zoom_level = {} AND tile_column = {} AND tile_row = {}",
        blobs,
        address.zoom,
        address.column,
        invert_row(address.row, address.zoom)
    )
}

// =============================================================================
// MosaicQuery
// =============================================================================

/// Filters for a mosaic query.
///
/// `max_gsd` bounds the finest resolution wanted and `min_gsd` the
/// coarsest, both in meters per pixel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MosaicQuery {
    pub min_gsd: Option<f64>,
    pub max_gsd: Option<f64>,
    pub spatial_filter: Option<GeoBounds>,

    /// Return coarse-to-fine rather than fine-to-coarse
    pub ascending_gsd: bool,
}

impl MosaicQuery {
    /// Builds one [`QuerySpec`] per selected zoom level.
    ///
    /// Levels are emitted finest first unless `ascending_gsd` is set. An
    /// empty plan means nothing in the store can satisfy the filters.
    pub fn plan(&self, descriptor: &TileMatrixDescriptor, fudge_factor: f64) -> Vec<QuerySpec> {
        let levels = descriptor.zoom_levels();
        let Some((min_index, max_index)) = self.level_window(&levels, fudge_factor) else {
            debug!("Mosaic query selects no levels");
            return Vec::new();
        };

        let mut queries = Vec::with_capacity(max_index - min_index + 1);
        match self.spatial_filter {
            None => {
                for index in (min_index..=max_index).rev() {
                    queries.push(QuerySpec::for_zoom_level(descriptor, levels[index].level));
                }
            }
            Some(filter) => {
                let Some(aoi) = filter.intersection(&descriptor.bounds()) else {
                    debug!("Spatial filter misses store bounds {:?}", descriptor.bounds());
                    return Vec::new();
                };
                for index in (min_index..=max_index).rev() {
                    let zoom = levels[index].level;
                    queries.push(QuerySpec::for_tile_range(
                        descriptor,
                        zoom,
                        bounds_to_range(zoom, &aoi),
                    ));
                }
            }
        }

        if self.ascending_gsd {
            queries.reverse();
        }
        debug!(
            "Planned {} level queries (indices {}..={})",
            queries.len(),
            min_index,
            max_index
        );
        queries
    }

    /// Inclusive `[min, max]` zoom chain indices passing the GSD filters.
    fn level_window(
        &self,
        levels: &[super::address::ZoomLevel],
        fudge_factor: f64,
    ) -> Option<(usize, usize)> {
        if levels.is_empty() {
            return None;
        }
        let mut min_index = 0;
        let mut max_index = levels.len() - 1;

        if let Some(max_gsd) = self.max_gsd {
            // The coarsest level is already finer than the limit.
            if levels[0].resolution < max_gsd {
                return None;
            }
            while max_index > 0 && levels[max_index].resolution < max_gsd * fudge_factor {
                max_index -= 1;
            }
        }

        if let Some(min_gsd) = self.min_gsd {
            if levels[max_index].resolution > min_gsd {
                return None;
            }
            while levels[min_index].resolution > min_gsd {
                min_index += 1;
            }
        }

        if min_index > max_index {
            return None;
        }
        Some((min_index, max_index))
    }
}

/// Logical tile range covering `bounds` at `zoom`.
pub fn bounds_to_range(zoom: u8, bounds: &GeoBounds) -> TileRange {
    let (min_column, min_row) = tile_index(zoom, bounds.north, bounds.west);
    let (mut max_column, mut max_row) = tile_index(zoom, bounds.south, bounds.east);

    // An east or south edge exactly on a tile boundary belongs to the
    // previous tile.
    let edge = super::projection::tile_corner(zoom, max_column as f64, max_row as f64);
    if max_column > min_column && edge.longitude >= bounds.east {
        max_column -= 1;
    }
    if max_row > min_row && edge.latitude <= bounds.south {
        max_row -= 1;
    }
    TileRange::new(min_column, max_column, min_row, max_row)
}

// =============================================================================
// MosaicTile
// =============================================================================

/// One tile in a mosaic query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MosaicTile {
    pub id: i64,
    pub address: TileAddress,
    pub zoom_index: usize,

    /// Upper-left, upper-right, lower-right, lower-left
    pub corners: [GeoPoint; 4],
    pub bounds: GeoBounds,

    /// Meters per pixel
    pub resolution: f64,
    pub width: u32,
    pub height: u32,

    /// Reader locator for the tile's blob
    pub locator: String,
}

impl MosaicTile {
    /// Build a result entry from a query row.
    ///
    /// Rows whose zoom or grid position falls outside the pyramid are
    /// dropped.
    pub fn from_row(descriptor: &TileMatrixDescriptor, row: &TileRow) -> Option<Self> {
        let address = row.address()?;
        let zoom_index = descriptor.zoom_index(address.zoom)?;
        let level = descriptor.zoom_levels().get(zoom_index).copied()?;
        let corners = address.corners();
        let bounds = GeoBounds::from_points(&corners)?;

        Some(Self {
            id: row.rowid,
            address,
            zoom_index,
            corners,
            bounds,
            resolution: level.resolution,
            width: level.tile_width,
            height: level.tile_height,
            locator: locator_for(
                &descriptor.path,
                address,
                descriptor.has_alpha_channel,
                level.tile_width,
                level.tile_height,
            )
            .to_string(),
        })
    }
}

fn locator_for(path: &Path, address: TileAddress, alpha: bool, width: u32, height: u32) -> TileLocator {
    TileLocator::new(path, tile_blob_sql(address, alpha), width, height)
}

// =============================================================================
// Tests
// =============================================================================
