//! Test utilities for integration tests.
//!
//! Builds real MBTiles-style SQLite stores inside temporary directories.
//! Every tile is a PNG gradient whose pixel at `(x, y)` is
//! `[x, y, tag, 255]`, where `tag` identifies the logical tile.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageFormat, Luma, Rgba, RgbaImage, RgbImage};
use rusqlite::{params, Connection};
use tempfile::TempDir;

// =============================================================================
// Tile Images
// =============================================================================

/// Tag stored in the blue channel of the tile at a logical address.
pub fn tile_tag(zoom: u8, column: u32, row: u32) -> u8 {
    (zoom as u32 * 16 + column * 4 + row) as u8
}

/// Create a PNG gradient tile.
pub fn gradient_png(width: u32, height: u32, tag: u8) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, tag, 255]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("Failed to encode PNG");
    buf.into_inner()
}

/// Create a JPEG tile of a single color.
pub fn solid_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 95)
        .encode_image(&img)
        .expect("Failed to encode JPEG");
    buf
}

/// Create a grayscale PNG mask of a single value.
pub fn mask_png(width: u32, height: u32, value: u8) -> Vec<u8> {
    let img = GrayImage::from_pixel(width, height, Luma([value]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("Failed to encode mask");
    buf.into_inner()
}

/// Check if data is a PNG file.
pub fn is_valid_png(data: &[u8]) -> bool {
    data.len() >= 8 && data[..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]
}

// =============================================================================
// Store Builder
// =============================================================================

/// A tile store file inside its own temporary directory.
pub struct TestStore {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestStore {
    /// Create an empty store with the tiles table.
    pub fn new(with_alpha: bool) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("tiles.mbtiles");
        let conn = Connection::open(&path).expect("Failed to create store");
        let alpha = if with_alpha { ", tile_alpha BLOB" } else { "" };
        conn.execute_batch(&format!(
            "CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, \
             tile_row INTEGER, tile_data BLOB{});",
            alpha
        ))
        .expect("Failed to create tiles table");
        Self { dir, path }
    }

    pub fn connection(&self) -> Connection {
        Connection::open(&self.path).expect("Failed to open store for writing")
    }

    /// Write metadata rows.
    pub fn with_metadata(self, entries: &[(&str, &str)]) -> Self {
        let conn = self.connection();
        conn.execute_batch("CREATE TABLE IF NOT EXISTS metadata (name TEXT, value TEXT);")
            .expect("Failed to create metadata table");
        for (name, value) in entries {
            conn.execute(
                "INSERT INTO metadata (name, value) VALUES (?1, ?2)",
                params![name, value],
            )
            .expect("Failed to insert metadata");
        }
        self
    }

    /// Insert a blob at a physical (bottom-up) row.
    pub fn insert_physical(&self, zoom: u8, column: u32, physical_row: u32, data: &[u8]) {
        self.connection()
            .execute(
                "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![zoom, column, physical_row, data],
            )
            .expect("Failed to insert tile");
    }

    /// Insert a blob with an alpha mask at a logical (top-down) row.
    pub fn insert_with_alpha(&self, zoom: u8, column: u32, row: u32, data: &[u8], alpha: &[u8]) {
        let physical_row = (1u32 << zoom) - 1 - row;
        self.connection()
            .execute(
                "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data, tile_alpha) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![zoom, column, physical_row, data, alpha],
            )
            .expect("Failed to insert tile");
    }

    /// Fill every tile of zooms `min..=max` with tagged gradients.
    pub fn fill_pyramid(self, min_zoom: u8, max_zoom: u8, size: u32) -> Self {
        let mut conn = self.connection();
        let tx = conn.transaction().expect("Failed to begin transaction");
        for zoom in min_zoom..=max_zoom {
            let n = 1u32 << zoom;
            for column in 0..n {
                for row in 0..n {
                    let physical_row = n - 1 - row;
                    let blob = gradient_png(size, size, tile_tag(zoom, column, row));
                    tx.execute(
                        "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) \
                         VALUES (?1, ?2, ?3, ?4)",
                        params![zoom, column, physical_row, blob],
                    )
                    .expect("Failed to insert tile");
                }
            }
        }
        tx.commit().expect("Failed to commit tiles");
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A store holding zooms 0 to 2 with 256x256 tiles and no metadata table.
pub fn pyramid_store() -> TestStore {
    TestStore::new(false).fill_pyramid(0, 2, 256)
}

/// Same as [`pyramid_store`] with small tiles, for tests that decode a lot.
pub fn small_pyramid_store(max_zoom: u8) -> TestStore {
    TestStore::new(false).fill_pyramid(0, max_zoom, 16)
}
