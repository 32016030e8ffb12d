//! Tile matrix discovery integration tests.
//!
//! Tests verify:
//! - Zoom bounds recovered by scanning when metadata is missing
//! - Metadata keys and their aliases
//! - Non-tile databases and empty stores are probe outcomes, not errors
//! - Geodetic bounds and the zoom chain

use tilevault::mosaic::MAX_LATITUDE;
use tilevault::{discover, discover_with_fallback, Discovery, StoreError};

use super::test_utils::{pyramid_store, solid_jpeg, TestStore};

#[test]
fn test_discover_without_metadata_scans_zooms() {
    let store = pyramid_store();

    let discovery = discover(store.path()).unwrap();
    let descriptor = discovery.descriptor().expect("store descriptor");

    assert_eq!(descriptor.min_zoom, 0);
    assert_eq!(descriptor.max_zoom, 2);
    assert_eq!(descriptor.tile_width, 256);
    assert_eq!(descriptor.tile_height, 256);
    assert!(!descriptor.has_alpha_channel);
    assert_eq!(descriptor.name, None);
    assert_eq!(descriptor.level_count(), 3);
}

#[test]
fn test_discover_reads_metadata_aliases() {
    let store = TestStore::new(false)
        .fill_pyramid(1, 3, 16)
        .with_metadata(&[
            ("minzoom", "2"),
            ("maxzoom", "3"),
            ("name", "Aliased"),
            ("format", "png"),
        ]);

    let discovery = discover(store.path()).unwrap();
    let descriptor = discovery.descriptor().unwrap();
    assert_eq!((descriptor.min_zoom, descriptor.max_zoom), (2, 3));
    assert_eq!(descriptor.name.as_deref(), Some("Aliased"));
    assert_eq!(descriptor.format.as_deref(), Some("png"));
    assert_eq!(descriptor.tile_width, 16);
}

#[test]
fn test_discover_jpeg_tiles() {
    let store = TestStore::new(false);
    store.insert_physical(0, 0, 0, &solid_jpeg(512, 512, [10, 20, 30]));

    let discovery = discover(store.path()).unwrap();
    let descriptor = discovery.descriptor().unwrap();
    assert_eq!((descriptor.tile_width, descriptor.tile_height), (512, 512));
}

#[test]
fn test_undecodable_sample_uses_configured_fallback() {
    let store = TestStore::new(false);
    store.insert_physical(3, 1, 1, b"definitely not an image");

    let discovery = discover_with_fallback(store.path(), 512).unwrap();
    let descriptor = discovery.descriptor().unwrap();
    assert_eq!((descriptor.tile_width, descriptor.tile_height), (512, 512));
    assert_eq!((descriptor.min_zoom, descriptor.max_zoom), (3, 3));
}

#[test]
fn test_alpha_schema_detected() {
    let store = TestStore::new(true);
    store.insert_physical(0, 0, 0, &solid_jpeg(8, 8, [0, 0, 0]));

    let discovery = discover(store.path()).unwrap();
    assert!(discovery.descriptor().unwrap().has_alpha_channel);
}

#[test]
fn test_empty_store() {
    let store = TestStore::new(false);
    assert!(matches!(discover(store.path()).unwrap(), Discovery::Empty));
}

#[test]
fn test_not_a_tile_store() {
    let dir = tempfile::tempdir().unwrap();

    let other = dir.path().join("other.db");
    let conn = rusqlite::Connection::open(&other).unwrap();
    conn.execute_batch("CREATE TABLE tiles (x INTEGER, y INTEGER);")
        .unwrap();
    drop(conn);
    assert!(matches!(discover(&other).unwrap(), Discovery::NotATileStore));

    let text = dir.path().join("notes.txt");
    std::fs::write(&text, vec![b'x'; 4096]).unwrap();
    assert!(matches!(discover(&text).unwrap(), Discovery::NotATileStore));
}

#[test]
fn test_missing_file_is_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = discover(dir.path().join("missing.mbtiles"));
    assert!(matches!(result, Err(StoreError::Open { .. })));
}

#[test]
fn test_inverted_zoom_metadata_is_corrupt() {
    let store = TestStore::new(false)
        .fill_pyramid(0, 1, 16)
        .with_metadata(&[("minZoomLevel", "1"), ("maxZoomLevel", "0")]);

    assert!(matches!(
        discover(store.path()),
        Err(StoreError::Corrupt { .. })
    ));
}

#[test]
fn test_world_bounds_and_zoom_chain() {
    let store = pyramid_store();
    let discovery = discover(store.path()).unwrap();
    let descriptor = discovery.descriptor().unwrap();

    let bounds = descriptor.bounds();
    assert!((bounds.west + 180.0).abs() < 1e-9);
    assert!((bounds.east - 180.0).abs() < 1e-9);
    assert!((bounds.north - MAX_LATITUDE).abs() < 1e-6);
    assert!((bounds.south + MAX_LATITUDE).abs() < 1e-6);

    let levels = descriptor.zoom_levels();
    assert_eq!(levels.len(), 3);
    assert_eq!(levels[0].level, 0);
    for pair in levels.windows(2) {
        assert!((pair[0].resolution / pair[1].resolution - 2.0).abs() < 1e-9);
    }
}

#[test]
fn test_partial_grid_bounds() {
    // Only the north-east quadrant at zoom 1 (logical row 0, physical row 1).
    let store = TestStore::new(false);
    store.insert_physical(1, 1, 1, &solid_jpeg(16, 16, [1, 2, 3]));

    let discovery = discover(store.path()).unwrap();
    let descriptor = discovery.descriptor().unwrap();
    let bounds = descriptor.bounds();
    assert!(bounds.west.abs() < 1e-9);
    assert!((bounds.east - 180.0).abs() < 1e-9);
    assert!(bounds.south.abs() < 1e-9);
    assert!((bounds.north - MAX_LATITUDE).abs() < 1e-6);
}
