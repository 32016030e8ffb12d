//! Tile decode and resample reader.
//!
//! A [`TileReader`] reads one row's blob through a shared store, decodes
//! it into a pooled pixel buffer and writes the requested sub-rectangle
//! out at the requested size and channel layout.
//!
//! # Read pipeline
//!
//! 1. Run the point query under the store's session lock
//! 2. Decode into a pooled buffer of matching shape, or a fresh one
//! 3. Apply the `tile_alpha` mask, if the store has one
//! 4. Copy directly when the whole tile is requested at native size,
//!    otherwise sample `rect.x + i * rect.w / dest_w` per output pixel
//! 5. Write RGBA bytes directly. Native ARGB words follow the probed
//!    channel order: straight byte writes for `A, R, G, B` memory order,
//!    a pass through the pooled int buffer for swizzled order
//!
//! Every borrowed buffer goes back to its pool on every exit path.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{ReadError, StoreError};
use crate::format::TileMatrixDescriptor;
use crate::mosaic::{
    bounds_to_range, GeoBounds, MosaicQuery, MosaicTile, QuerySpec, TileAddress, TileLocator,
    ZoomLevel,
};
use crate::store::{BufferPool, StoreHandle, StoreRegistry, StoreSession};

use super::pixel::{
    native_channel_order, pack_argb, NativeChannelOrder, NativeWritePath, PixelBuffer, PixelColor,
    PixelLayout, TileImage,
};

/// Outcome of a tile read.
pub type ReadResult = Result<TileImage, ReadError>;

// =============================================================================
// SourceRect
// =============================================================================

/// Pixel rectangle within a decoded tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SourceRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole of a `width` x `height` tile.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    fn is_full(&self, width: u32, height: u32) -> bool {
        *self == Self::full(width, height)
    }

    fn check(&self, width: u32, height: u32) -> Result<(), ReadError> {
        let fits = self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64;
        if fits {
            Ok(())
        } else {
            Err(ReadError::InvalidRegion {
                message: format!(
                    "source {}x{}+{}+{} outside {}x{} tile",
                    self.width, self.height, self.x, self.y, width, height
                ),
            })
        }
    }
}

// =============================================================================
// TileSource
// =============================================================================

/// Tile access used by a layer's background worker.
pub trait TileSource: Send + Sync {
    /// Resolution chain, coarsest first.
    fn zoom_levels(&self) -> Vec<ZoomLevel>;

    /// Stored tiles at a zoom chain index, optionally within `area`.
    fn tiles_for_level(
        &self,
        zoom_index: usize,
        area: Option<&GeoBounds>,
    ) -> Result<Vec<TileAddress>, StoreError>;

    /// Decode one tile at its native size.
    fn read_tile(&self, address: TileAddress) -> ReadResult;
}

// =============================================================================
// TileReader
// =============================================================================

/// Reads tiles from one shared store.
#[derive(Debug, Clone)]
pub struct TileReader {
    store: StoreHandle,
    descriptor: TileMatrixDescriptor,
    levels: Vec<ZoomLevel>,
    layout: PixelLayout,
}

/// Blobs fetched for one tile.
struct TileBlobs {
    data: Option<Vec<u8>>,
    alpha: Option<Vec<u8>>,
}

impl TileReader {
    /// Bind a reader to an open store.
    ///
    /// Fails with [`StoreError::NoDescriptor`] when discovery produced no
    /// tile matrix for the store.
    pub fn new(store: StoreHandle) -> Result<Self, StoreError> {
        let descriptor = store
            .descriptor()
            .cloned()
            .ok_or_else(|| StoreError::NoDescriptor {
                path: store.path().display().to_string(),
            })?;
        let levels = descriptor.zoom_levels();
        Ok(Self {
            store,
            descriptor,
            levels,
            layout: PixelLayout::default(),
        })
    }

    /// Open `path` through `registry` and bind a reader to it.
    pub fn open(registry: &StoreRegistry, path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::new(registry.open(path)?)
    }

    /// Set the output channel layout.
    pub fn with_layout(mut self, layout: PixelLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn descriptor(&self) -> &TileMatrixDescriptor {
        &self.descriptor
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Read `rect` of the tile at `address`, scaled to `dest_width` x
    /// `dest_height`.
    pub fn read(
        &self,
        address: TileAddress,
        rect: SourceRect,
        dest_width: u32,
        dest_height: u32,
    ) -> ReadResult {
        self.read_address(address, Some(rect), Some((dest_width, dest_height)))
    }

    fn read_address(
        &self,
        address: TileAddress,
        rect: Option<SourceRect>,
        dest: Option<(u32, u32)>,
    ) -> ReadResult {
        let spec = QuerySpec::for_tile(&self.descriptor, address);
        let not_found = || ReadError::NotFound {
            zoom: address.zoom,
            column: address.column,
            row: address.row,
        };

        self.store.with_session(|session| {
            let row = fetch_row(session.connection, &spec)
                .map_err(StoreError::from)?
                .ok_or_else(not_found)?;
            let blobs = TileBlobs {
                data: row.data,
                alpha: row.alpha,
            };
            render(session, blobs, rect, dest, self.layout)
        })
    }

    /// Execute literal-valued SQL returning `tile_data` and optionally
    /// `tile_alpha`, and render the full tile at the given size.
    pub fn read_sql(&self, sql: &str, width: u32, height: u32) -> ReadResult {
        self.store.with_session(|session| {
            let blobs = fetch_sql(session.connection, sql)
                .map_err(StoreError::from)?
                .ok_or_else(|| ReadError::InvalidRegion {
                    message: format!("locator query returned no rows: {}", sql),
                })?;
            render(session, blobs, None, Some((width, height)), self.layout)
        })
    }

    /// Run a mosaic query and collect the matching tiles.
    pub fn query_mosaic(
        &self,
        query: &MosaicQuery,
        fudge_factor: f64,
    ) -> Result<Vec<MosaicTile>, StoreError> {
        let mut tiles = Vec::new();
        for spec in query.plan(&self.descriptor, fudge_factor) {
            for row in self.store.query_rows(&spec)? {
                match MosaicTile::from_row(&self.descriptor, &row) {
                    Some(tile) => tiles.push(tile),
                    None => debug!("Skipping out-of-grid row {}", row.rowid),
                }
            }
        }
        Ok(tiles)
    }
}

impl TileSource for TileReader {
    fn zoom_levels(&self) -> Vec<ZoomLevel> {
        self.levels.clone()
    }

    fn tiles_for_level(
        &self,
        zoom_index: usize,
        area: Option<&GeoBounds>,
    ) -> Result<Vec<TileAddress>, StoreError> {
        let Some(zoom) = self.descriptor.level_at(zoom_index) else {
            return Ok(Vec::new());
        };

        let range = match area {
            None => self.descriptor.range_at(zoom),
            Some(area) => area
                .intersection(&self.descriptor.bounds())
                .map(|aoi| bounds_to_range(zoom, &aoi)),
        };
        let Some(range) = range else {
            return Ok(Vec::new());
        };

        let spec = QuerySpec::for_tile_range(&self.descriptor, zoom, range);
        Ok(self
            .store
            .query_rows(&spec)?
            .iter()
            .filter_map(|row| row.address())
            .collect())
    }

    fn read_tile(&self, address: TileAddress) -> ReadResult {
        self.read_address(address, None, None)
    }
}

/// Open the store named by a locator and read the tile it describes.
pub fn read_locator(
    registry: &StoreRegistry,
    locator: &TileLocator,
    layout: PixelLayout,
) -> ReadResult {
    let reader = TileReader::open(registry, &locator.path)?.with_layout(layout);
    reader.read_sql(&locator.sql, locator.width, locator.height)
}

// =============================================================================
// Fetch
// =============================================================================

fn fetch_row(
    conn: &Connection,
    spec: &QuerySpec,
) -> Result<Option<crate::mosaic::TileRow>, rusqlite::Error> {
    let mut stmt = conn.prepare_cached(&spec.sql)?;
    stmt.query_row(params_from_iter(spec.bind_arguments.iter()), |row| {
        spec.map_row(row)
    })
    .optional()
}

fn fetch_sql(conn: &Connection, sql: &str) -> Result<Option<TileBlobs>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let has_alpha = stmt.column_count() > 1;
    stmt.query_row([], |row| {
        Ok(TileBlobs {
            data: row.get(0)?,
            alpha: if has_alpha { row.get(1)? } else { None },
        })
    })
    .optional()
}

// =============================================================================
// Decode and resample
// =============================================================================

/// A buffer borrowed from a pool, returned on drop.
struct Pooled<'a, T> {
    pool: &'a mut BufferPool<T>,
    item: Option<T>,
}

impl<'a, T> Pooled<'a, T> {
    fn new(pool: &'a mut BufferPool<T>, item: T) -> Self {
        Self {
            pool,
            item: Some(item),
        }
    }

    fn get(&self) -> &T {
        match self.item.as_ref() {
            Some(item) => item,
            None => unreachable!("pooled buffer taken before drop"),
        }
    }

    fn get_mut(&mut self) -> &mut T {
        match self.item.as_mut() {
            Some(item) => item,
            None => unreachable!("pooled buffer taken before drop"),
        }
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.recycle(item);
        }
    }
}

fn decode_error(e: impl std::fmt::Display) -> ReadError {
    ReadError::DecodeFailure {
        message: e.to_string(),
    }
}

/// Decode a blob, reusing a pooled buffer of matching shape.
fn decode_into<'a>(
    blob: &[u8],
    pool: &'a mut BufferPool<PixelBuffer>,
) -> Result<Pooled<'a, PixelBuffer>, ReadError> {
    let decoder = ImageReader::new(Cursor::new(blob))
        .with_guessed_format()
        .map_err(decode_error)?
        .into_decoder()
        .map_err(decode_error)?;
    let (width, height) = decoder.dimensions();

    let Some(color) = PixelColor::from_color_type(decoder.color_type()) else {
        // Wide or float formats go through a converting decode.
        let rgba = DynamicImage::from_decoder(decoder)
            .map_err(decode_error)?
            .into_rgba8();
        let buffer = PixelBuffer {
            width,
            height,
            color: PixelColor::Rgba8,
            data: rgba.into_raw(),
        };
        return Ok(Pooled::new(pool, buffer));
    };

    let buffer = match pool.borrow_matching(|b| b.fits(width, height, color)) {
        Some(buffer) => buffer,
        None => PixelBuffer::new(width, height, color),
    };
    let mut pooled = Pooled::new(pool, buffer);
    decoder
        .read_image(&mut pooled.get_mut().data)
        .map_err(decode_error)?;
    Ok(pooled)
}

fn decode_mask(blob: &[u8]) -> Option<GrayImage> {
    match image::load_from_memory(blob) {
        Ok(mask) => Some(mask.into_luma8()),
        Err(e) => {
            warn!("Ignoring undecodable alpha mask: {}", e);
            None
        }
    }
}

fn render(
    session: &mut StoreSession<'_>,
    blobs: TileBlobs,
    rect: Option<SourceRect>,
    dest: Option<(u32, u32)>,
    layout: PixelLayout,
) -> ReadResult {
    let data = blobs.data.ok_or_else(|| decode_error("tile has no data"))?;
    let decoded = decode_into(&data, session.pixel_pool).map_err(|e| {
        warn!("{}", e);
        e
    })?;
    let source = decoded.get();

    let rect = rect.unwrap_or(SourceRect::full(source.width, source.height));
    let (dest_width, dest_height) = dest.unwrap_or((rect.width, rect.height));
    rect.check(source.width, source.height)?;
    if dest_width == 0 || dest_height == 0 {
        return Err(ReadError::InvalidRegion {
            message: format!("destination {}x{} is empty", dest_width, dest_height),
        });
    }

    let mask = blobs.alpha.as_deref().and_then(decode_mask);
    let sampler = Sampler {
        source,
        mask: mask.as_ref(),
        rect,
        dest_width,
        dest_height,
        identity: rect.is_full(source.width, source.height)
            && dest_width == source.width
            && dest_height == source.height,
    };

    let data = match layout {
        PixelLayout::Rgba8 => sampler.write_rgba(),
        PixelLayout::NativeArgb32 => sampler.write_native(native_channel_order(), session.int_pool),
    };
    Ok(TileImage {
        width: dest_width,
        height: dest_height,
        layout,
        data,
    })
}

struct Sampler<'a> {
    source: &'a PixelBuffer,
    mask: Option<&'a GrayImage>,
    rect: SourceRect,
    dest_width: u32,
    dest_height: u32,
    identity: bool,
}

impl Sampler<'_> {
    #[inline]
    fn source_x(&self, i: u32) -> u32 {
        self.rect.x + (i as u64 * self.rect.width as u64 / self.dest_width as u64) as u32
    }

    #[inline]
    fn source_y(&self, j: u32) -> u32 {
        self.rect.y + (j as u64 * self.rect.height as u64 / self.dest_height as u64) as u32
    }

    #[inline]
    fn pixel(&self, i: u32, j: u32) -> [u8; 4] {
        let (x, y) = (self.source_x(i), self.source_y(j));
        let mut rgba = self.source.rgba_at(x, y);
        if let Some(mask) = self.mask {
            let mx = (x as u64 * mask.width() as u64 / self.source.width as u64) as u32;
            let my = (y as u64 * mask.height() as u64 / self.source.height as u64) as u32;
            rgba[3] = mask.get_pixel(mx, my).0[0];
        }
        rgba
    }

    fn write_rgba(&self) -> Bytes {
        if self.identity && self.mask.is_none() && self.source.color == PixelColor::Rgba8 {
            return Bytes::copy_from_slice(&self.source.data);
        }
        let mut out = Vec::with_capacity(self.dest_width as usize * self.dest_height as usize * 4);
        for j in 0..self.dest_height {
            for i in 0..self.dest_width {
                out.extend_from_slice(&self.pixel(i, j));
            }
        }
        Bytes::from(out)
    }

    /// Write native ARGB words along the path the channel order calls for.
    fn write_native(&self, order: NativeChannelOrder, pool: &mut BufferPool<Vec<u32>>) -> Bytes {
        let len = self.dest_width as usize * self.dest_height as usize;
        let mut out = Vec::with_capacity(len * 4);

        match order.write_path() {
            NativeWritePath::DirectBytes => {
                for j in 0..self.dest_height {
                    for i in 0..self.dest_width {
                        out.extend_from_slice(&order.word_bytes(self.pixel(i, j)));
                    }
                }
            }
            NativeWritePath::IntPass => {
                let words = match pool.borrow_matching(|w| w.len() == len) {
                    Some(words) => words,
                    None => vec![0; len],
                };
                let mut words = Pooled::new(pool, words);

                let dest_width = self.dest_width as usize;
                for (index, word) in words.get_mut().iter_mut().enumerate() {
                    let i = (index % dest_width) as u32;
                    let j = (index / dest_width) as u32;
                    *word = pack_argb(self.pixel(i, j));
                }
                for word in words.get() {
                    out.extend_from_slice(&order.word_to_bytes(*word));
                }
            }
        }
        Bytes::from(out)
    }
}

// =============================================================================
// Tests
// =============================================================================
