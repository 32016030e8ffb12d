//! Tile reading integration tests.
//!
//! Tests verify:
//! - Logical rows map onto inverted physical rows
//! - Full-tile reads at native size return the stored pixels unchanged
//! - Sub-rectangles are resampled with nearest-neighbor sampling
//! - Alpha masks replace the alpha channel
//! - Mosaic queries and locator strings resolve back to the same pixels

use tilevault::{
    encode_tile, read_locator, GeoBounds, MosaicQuery, PixelLayout, ReadError, SourceRect,
    StoreRegistry, TileAddress, TileFileFormat, TileLocator, TileReader, TileSource,
};

use super::test_utils::{
    gradient_png, is_valid_png, mask_png, pyramid_store, small_pyramid_store, tile_tag, TestStore,
};

fn registry() -> StoreRegistry {
    StoreRegistry::new(1, 256)
}

fn addr(zoom: u8, column: u32, row: u32) -> TileAddress {
    TileAddress::new(zoom, column, row).unwrap()
}

// =============================================================================
// Addressing
// =============================================================================

#[test]
fn test_physical_row_zero_is_logical_bottom_row() {
    let store = TestStore::new(false);
    store.insert_physical(1, 0, 0, &gradient_png(8, 8, 99));

    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();

    let tile = reader.read(addr(1, 0, 1), SourceRect::full(8, 8), 8, 8).unwrap();
    assert_eq!(tile.rgba_at(0, 0), [0, 0, 99, 255]);

    let missing = reader.read(addr(1, 0, 0), SourceRect::full(8, 8), 8, 8);
    assert!(matches!(
        missing,
        Err(ReadError::NotFound {
            zoom: 1,
            column: 0,
            row: 0
        })
    ));
}

#[test]
fn test_every_tile_reads_its_own_tag() {
    let store = small_pyramid_store(2);
    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();

    for zoom in 0..=2u8 {
        let n = 1u32 << zoom;
        for column in 0..n {
            for row in 0..n {
                let tile = reader
                    .read(addr(zoom, column, row), SourceRect::full(16, 16), 1, 1)
                    .unwrap();
                assert_eq!(tile.rgba_at(0, 0)[2], tile_tag(zoom, column, row));
            }
        }
    }
}

// =============================================================================
// Resampling
// =============================================================================

#[test]
fn test_full_read_at_native_size_is_identity() {
    let store = pyramid_store();
    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();

    let tile = reader
        .read(addr(2, 3, 1), SourceRect::full(256, 256), 256, 256)
        .unwrap();
    let tag = tile_tag(2, 3, 1);
    assert_eq!((tile.width, tile.height), (256, 256));
    for (x, y) in [(0, 0), (255, 0), (17, 200), (255, 255)] {
        assert_eq!(tile.rgba_at(x, y), [x as u8, y as u8, tag, 255]);
    }

    let via_source = reader.read_tile(addr(2, 3, 1)).unwrap();
    assert_eq!(via_source, tile);
}

#[test]
fn test_sub_rect_downsample() {
    let store = pyramid_store();
    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();

    let tile = reader
        .read(addr(1, 0, 0), SourceRect::new(64, 32, 128, 128), 64, 64)
        .unwrap();
    assert_eq!((tile.width, tile.height), (64, 64));
    for (i, j) in [(0u32, 0u32), (10, 5), (63, 63)] {
        let rgba = tile.rgba_at(i, j);
        assert_eq!(rgba[0] as u32, 64 + 2 * i);
        assert_eq!(rgba[1] as u32, 32 + 2 * j);
    }
}

#[test]
fn test_upsample_repeats_pixels() {
    let store = small_pyramid_store(0);
    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();

    let tile = reader
        .read(addr(0, 0, 0), SourceRect::new(4, 4, 2, 2), 4, 4)
        .unwrap();
    assert_eq!(tile.rgba_at(0, 0), tile.rgba_at(1, 1));
    assert_eq!(tile.rgba_at(0, 0)[0], 4);
    assert_eq!(tile.rgba_at(3, 3), [5, 5, 0, 255]);
}

#[test]
fn test_rect_outside_tile_is_invalid() {
    let store = small_pyramid_store(0);
    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();

    let result = reader.read(addr(0, 0, 0), SourceRect::new(8, 8, 16, 16), 8, 8);
    assert!(matches!(result, Err(ReadError::InvalidRegion { .. })));

    let result = reader.read(addr(0, 0, 0), SourceRect::full(16, 16), 0, 8);
    assert!(matches!(result, Err(ReadError::InvalidRegion { .. })));
}

#[test]
fn test_native_layout_matches_rgba() {
    let store = small_pyramid_store(1);
    let registry = registry();
    let rgba = TileReader::open(&registry, store.path()).unwrap();
    let native = rgba.clone().with_layout(PixelLayout::NativeArgb32);

    let a = rgba.read(addr(1, 1, 0), SourceRect::full(16, 16), 16, 16).unwrap();
    let b = native
        .read(addr(1, 1, 0), SourceRect::full(16, 16), 16, 16)
        .unwrap();
    assert_eq!(b.layout, PixelLayout::NativeArgb32);
    assert_eq!(a.to_rgba(), b.to_rgba());
}

// =============================================================================
// Alpha Side-Channel
// =============================================================================

#[test]
fn test_alpha_mask_replaces_alpha() {
    let store = TestStore::new(true);
    store.insert_with_alpha(0, 0, 0, &gradient_png(8, 8, 1), &mask_png(8, 8, 77));

    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();
    assert!(reader.descriptor().has_alpha_channel);

    let tile = reader.read(addr(0, 0, 0), SourceRect::full(8, 8), 8, 8).unwrap();
    assert_eq!(tile.rgba_at(3, 5), [3, 5, 1, 77]);
}

// =============================================================================
// Mosaic Queries and Locators
// =============================================================================

#[test]
fn test_mosaic_query_all_levels() {
    let store = small_pyramid_store(2);
    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();

    let tiles = reader.query_mosaic(&MosaicQuery::default(), 2.0).unwrap();
    assert_eq!(tiles.len(), 1 + 4 + 16);
    // Finest level first.
    assert_eq!(tiles[0].address.zoom, 2);
    assert_eq!(tiles.last().unwrap().address.zoom, 0);

    let ascending = MosaicQuery {
        ascending_gsd: true,
        ..MosaicQuery::default()
    };
    let tiles = reader.query_mosaic(&ascending, 2.0).unwrap();
    assert_eq!(tiles[0].address.zoom, 0);
}

#[test]
fn test_mosaic_query_spatial_filter() {
    let store = small_pyramid_store(2);
    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();

    // A small box in the north-east quadrant.
    let query = MosaicQuery {
        spatial_filter: Some(GeoBounds::new(10.0, 10.0, 20.0, 20.0)),
        ..MosaicQuery::default()
    };
    let tiles = reader.query_mosaic(&query, 2.0).unwrap();
    let at = |zoom: u8| -> Vec<TileAddress> {
        tiles
            .iter()
            .filter(|t| t.address.zoom == zoom)
            .map(|t| t.address)
            .collect()
    };

    assert_eq!(at(0), vec![addr(0, 0, 0)]);
    assert_eq!(at(1), vec![addr(1, 1, 0)]);
    assert_eq!(at(2), vec![addr(2, 2, 1)]);
    for tile in &tiles {
        assert!(tile.bounds.intersects(&GeoBounds::new(10.0, 10.0, 20.0, 20.0)));
    }
}

#[test]
fn test_mosaic_query_gsd_window() {
    let store = small_pyramid_store(2);
    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();
    let levels = reader.zoom_levels();

    // Finer than the coarsest level: nothing.
    let query = MosaicQuery {
        max_gsd: Some(levels[0].resolution * 2.0),
        ..MosaicQuery::default()
    };
    assert!(reader.query_mosaic(&query, 2.0).unwrap().is_empty());

    // Exclude the coarsest level.
    let query = MosaicQuery {
        min_gsd: Some(levels[1].resolution),
        ..MosaicQuery::default()
    };
    let tiles = reader.query_mosaic(&query, 2.0).unwrap();
    assert!(tiles.iter().all(|t| t.address.zoom >= 1));
    assert_eq!(tiles.len(), 4 + 16);
}

#[test]
fn test_locator_round_trip_reads_same_pixels() {
    let store = small_pyramid_store(1);
    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();

    let tiles = reader.query_mosaic(&MosaicQuery::default(), 2.0).unwrap();
    let tile = tiles
        .iter()
        .find(|t| t.address == addr(1, 0, 1))
        .expect("tile in mosaic");

    let locator = TileLocator::parse(&tile.locator).unwrap();
    assert_eq!(locator.to_string(), tile.locator);
    assert_eq!((locator.width, locator.height), (16, 16));

    let from_locator = read_locator(&registry, &locator, PixelLayout::Rgba8).unwrap();
    let direct = reader.read_tile(addr(1, 0, 1)).unwrap();
    assert_eq!(from_locator, direct);
    assert_eq!(from_locator.rgba_at(0, 0)[2], tile_tag(1, 0, 1));
}

#[test]
fn test_tiles_for_level_with_area() {
    let store = small_pyramid_store(2);
    let registry = registry();
    let reader = TileReader::open(&registry, store.path()).unwrap();

    assert_eq!(reader.tiles_for_level(2, None).unwrap().len(), 16);
    let area = GeoBounds::new(-20.0, -20.0, -10.0, -10.0);
    assert_eq!(
        reader.tiles_for_level(2, Some(&area)).unwrap(),
        vec![addr(2, 1, 2)]
    );
    assert!(reader.tiles_for_level(3, None).unwrap().is_empty());
}

// =============================================================================
// Export
// =============================================================================

#[test]
fn test_encode_png_preserves_pixels() {
    let store = small_pyramid_store(0);
    let registry = registry();
    let reader = TileReader::open(&registry, store.path())
        .unwrap()
        .with_layout(PixelLayout::NativeArgb32);
    let tile = reader.read_tile(addr(0, 0, 0)).unwrap();

    let png = encode_tile(&tile, TileFileFormat::Png).unwrap();
    assert!(is_valid_png(&png));

    let decoded = image::load_from_memory(&png).unwrap().into_rgba8();
    assert_eq!(decoded.get_pixel(7, 9).0, [7, 9, 0, 255]);
}
