//! Mosaic addressing and query construction.
//!
//! - [`projection`] - Web Mercator math and geodetic bounds
//! - [`address`] - Tile addresses, row inversion and the zoom chain
//! - [`query`] - Blob table queries and mosaic planning
//! - [`locator`] - Locator strings binding a reader to one query

pub mod address;
pub mod locator;
pub mod projection;
pub mod query;

pub use address::{
    invert_row, select_zoom_level, zoom_chain, TileAddress, TileRange, ZoomLevel, MAX_ZOOM,
};
pub use locator::{TileLocator, LOCATOR_SCHEME};
pub use projection::{
    column_to_longitude, forward, inverse, resolution_at_zoom, row_to_latitude, tile_corner,
    tile_index, tiles_at_zoom, GeoBounds, GeoPoint, EARTH_RADIUS, MAX_LATITUDE, MIN_LATITUDE,
    WEB_MERCATOR_SRID,
};
pub use query::{
    bounds_to_range, tile_blob_sql, MosaicQuery, MosaicTile, QuerySpec, ResultColumns, TileRow,
};
