//! Spherical Web Mercator math for tile pyramids.
//!
//! All tile stores served by this crate use the global spherical mercator
//! profile (EPSG:3857). Tile rows here are always *logical* (row 0 is the
//! northernmost row); callers holding physical MBTiles rows must invert them
//! first with [`invert_row`](super::invert_row).

use std::f64::consts::PI;

use serde::Serialize;

/// Spatial reference identifier for spherical Web Mercator.
pub const WEB_MERCATOR_SRID: i32 = 3857;

/// Semi-major axis used by the spherical projection, in meters.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Northernmost latitude representable by the projection.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Southernmost latitude representable by the projection.
pub const MIN_LATITUDE: f64 = -MAX_LATITUDE;

/// A geodetic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Axis-aligned geodetic rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    pub const fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    /// Bounding rectangle of a set of points.
    ///
    /// Every point contributes to every extremum; no point is assumed to be
    /// a particular corner.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Self::new(
            first.latitude,
            first.longitude,
            first.latitude,
            first.longitude,
        );
        for p in &points[1..] {
            bounds.south = bounds.south.min(p.latitude);
            bounds.north = bounds.north.max(p.latitude);
            bounds.west = bounds.west.min(p.longitude);
            bounds.east = bounds.east.max(p.longitude);
        }
        Some(bounds)
    }

    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }

    pub fn intersection(&self, other: &GeoBounds) -> Option<GeoBounds> {
        if !self.intersects(other) {
            return None;
        }
        Some(GeoBounds::new(
            self.south.max(other.south),
            self.west.max(other.west),
            self.north.min(other.north),
            self.east.min(other.east),
        ))
    }
}

/// Number of tiles along one axis at `zoom`.
#[inline]
pub fn tiles_at_zoom(zoom: u8) -> u32 {
    1u32 << zoom
}

/// Longitude of a tile column edge. Fractional columns are allowed.
#[inline]
pub fn column_to_longitude(zoom: u8, column: f64) -> f64 {
    column / tiles_at_zoom(zoom) as f64 * 360.0 - 180.0
}

/// Latitude of a logical tile row edge. Fractional rows are allowed.
#[inline]
pub fn row_to_latitude(zoom: u8, row: f64) -> f64 {
    let y = row / tiles_at_zoom(zoom) as f64;
    (PI * (1.0 - 2.0 * y)).sinh().atan().to_degrees()
}

/// Geodetic position of the north-west corner of a tile edge intersection.
#[inline]
pub fn tile_corner(zoom: u8, column: f64, row: f64) -> GeoPoint {
    GeoPoint::new(row_to_latitude(zoom, row), column_to_longitude(zoom, column))
}

/// Logical `(column, row)` of the tile containing a position, clamped to
/// the grid.
pub fn tile_index(zoom: u8, latitude: f64, longitude: f64) -> (u32, u32) {
    let n = tiles_at_zoom(zoom) as f64;
    let lat = latitude.clamp(MIN_LATITUDE, MAX_LATITUDE).to_radians();
    let lon = longitude.clamp(-180.0, 180.0);

    let column = ((lon + 180.0) / 360.0 * n).floor();
    let row = ((1.0 - lat.tan().asinh() / PI) / 2.0 * n).floor();

    let max = n - 1.0;
    (column.clamp(0.0, max) as u32, row.clamp(0.0, max) as u32)
}

/// Ground resolution (meters per pixel at the equator) of a level.
#[inline]
pub fn resolution_at_zoom(zoom: u8, tile_width: u32) -> f64 {
    2.0 * PI * EARTH_RADIUS / (tile_width as f64 * tiles_at_zoom(zoom) as f64)
}

/// Projects a position into mercator meters.
pub fn forward(point: GeoPoint) -> (f64, f64) {
    let lat = point.latitude.clamp(MIN_LATITUDE, MAX_LATITUDE).to_radians();
    let x = EARTH_RADIUS * point.longitude.to_radians();
    let y = EARTH_RADIUS * (PI / 4.0 + lat / 2.0).tan().ln();
    (x, y)
}

/// Inverse of [`forward`].
pub fn inverse(x: f64, y: f64) -> GeoPoint {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    GeoPoint::new(lat, lon)
}
