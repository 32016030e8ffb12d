//! Shared store registry integration tests.
//!
//! Tests verify:
//! - Readers on the same path share one connection
//! - The connection closes exactly once, when the last handle goes
//! - Concurrent open and release never double-close
//! - Failed opens leave nothing behind

use std::sync::{Arc, Barrier};
use std::thread;

use tilevault::{Discovery, SourceRect, StoreError, StoreRegistry, TileAddress, TileReader};

use super::test_utils::{small_pyramid_store, TestStore};

#[test]
fn test_two_readers_share_one_handle() {
    let store = small_pyramid_store(1);
    let registry = StoreRegistry::new(1, 256);

    let first = TileReader::open(&registry, store.path()).unwrap();
    let second = TileReader::open(&registry, store.path()).unwrap();

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.stores_opened(), 1);
    assert_eq!(first.store().ref_count(), 2);
    assert_eq!(first.store().path(), second.store().path());

    drop(first);
    assert_eq!(second.store().ref_count(), 1);
    assert_eq!(registry.stores_closed(), 0);

    // The surviving reader still works.
    let address = TileAddress::new(1, 0, 0).unwrap();
    assert!(second.read(address, SourceRect::full(16, 16), 4, 4).is_ok());

    drop(second);
    assert_eq!(registry.stores_closed(), 1);
    assert!(registry.is_empty());
}

#[test]
fn test_equivalent_paths_share_entry() {
    let store = small_pyramid_store(0);
    let registry = StoreRegistry::new(1, 256);

    let direct = registry.open(store.path()).unwrap();
    let dotted = store.dir.path().join(".").join("tiles.mbtiles");
    let indirect = registry.open(&dotted).unwrap();

    assert_eq!(registry.len(), 1);
    assert_eq!(direct.ref_count(), 2);
    assert!(registry.contains(&dotted));

    direct.dereference();
    indirect.dereference();
    assert!(!registry.contains(store.path()));
}

#[test]
fn test_reopen_after_close_opens_new_connection() {
    let store = small_pyramid_store(0);
    let registry = StoreRegistry::new(1, 256);

    registry.open(store.path()).unwrap().dereference();
    let handle = registry.open(store.path()).unwrap();
    assert_eq!(handle.ref_count(), 1);
    assert_eq!(registry.stores_opened(), 2);
    assert_eq!(registry.stores_closed(), 1);
}

#[test]
fn test_concurrent_open_and_release_close_once() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 25;

    let store = small_pyramid_store(1);
    let registry = StoreRegistry::new(1, 256);
    let barrier = Arc::new(Barrier::new(THREADS));

    // Keep one handle alive so every thread shares the same store.
    let anchor = registry.open(store.path()).unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            let path = store.path().to_path_buf();
            thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let reader = TileReader::open(&registry, &path).unwrap();
                    let copy = reader.clone();
                    let address = TileAddress::new(1, (i + round) as u32 % 2, 0).unwrap();
                    copy.read(address, SourceRect::full(16, 16), 8, 8).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(anchor.ref_count(), 1);
    assert_eq!(registry.stores_opened(), 1);
    assert_eq!(registry.stores_closed(), 0);

    drop(anchor);
    assert_eq!(registry.stores_closed(), 1);
    assert!(registry.is_empty());
}

#[test]
fn test_concurrent_last_release_closes_once() {
    const THREADS: usize = 8;

    let store = small_pyramid_store(0);
    let registry = StoreRegistry::new(1, 256);
    let barrier = Arc::new(Barrier::new(THREADS));

    let first = registry.open(store.path()).unwrap();
    let handles: Vec<_> = (0..THREADS).map(|_| first.clone()).collect();
    drop(first);
    assert_eq!(handles[0].ref_count(), THREADS);

    let threads: Vec<_> = handles
        .into_iter()
        .map(|handle| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                handle.dereference();
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(registry.stores_opened(), 1);
    assert_eq!(registry.stores_closed(), 1);
    assert!(registry.is_empty());
}

#[test]
fn test_failed_open_leaves_no_entry() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new(1, 256);

    let missing = dir.path().join("missing.mbtiles");
    assert!(matches!(
        registry.open(&missing),
        Err(StoreError::Open { .. })
    ));

    let corrupt = TestStore::new(false)
        .fill_pyramid(0, 1, 16)
        .with_metadata(&[("minZoomLevel", "1"), ("maxZoomLevel", "0")]);
    assert!(matches!(
        registry.open(corrupt.path()),
        Err(StoreError::Corrupt { .. })
    ));

    assert!(registry.is_empty());
    assert_eq!(registry.stores_opened(), 0);
}

#[test]
fn test_empty_store_registers_but_has_no_reader() {
    let store = TestStore::new(false);
    let registry = StoreRegistry::new(1, 256);

    let handle = registry.open(store.path()).unwrap();
    assert!(matches!(handle.discovery(), Discovery::Empty));
    assert!(handle.descriptor().is_none());

    assert!(matches!(
        TileReader::new(handle),
        Err(StoreError::NoDescriptor { .. })
    ));
    // The handle moved into the failed reader and was released.
    assert!(registry.is_empty());
}

#[test]
fn test_decode_buffers_are_pooled_per_store() {
    let store = small_pyramid_store(1);
    let registry = StoreRegistry::new(1, 256);
    let reader = TileReader::open(&registry, store.path()).unwrap();
    assert_eq!(reader.store().pooled_buffers(), (0, 0));

    let address = TileAddress::new(1, 1, 1).unwrap();
    reader
        .read(address, SourceRect::full(16, 16), 16, 16)
        .unwrap();
    assert_eq!(reader.store().pooled_buffers().0, 1);

    // A second reader on the same path sees the same pool.
    let other = TileReader::open(&registry, store.path()).unwrap();
    assert_eq!(other.store().pooled_buffers().0, 1);
    other
        .read(address, SourceRect::full(16, 16), 16, 16)
        .unwrap();
    assert_eq!(other.store().pooled_buffers().0, 1);
}
