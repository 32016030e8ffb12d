//! Tile layer lifecycle integration tests.
//!
//! Tests verify:
//! - Starting twice keeps one worker and one visibility subscription
//! - A layer suspended before start stays idle until resumed
//! - No store I/O or publication happens after stop returns
//! - Published versions only move forward
//! - Hidden layers do not load
//! - A layer started again after shutdown loads tiles

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tilevault::error::StoreError;
use tilevault::{
    CacheEntry, GeoBounds, LayerConfig, LayerState, LifecycleState, ReadError, StoreRegistry,
    TileAddress, TileImage, TileLayer, TileReader, TileRenderer, TileSource, View,
    VisibilitySignal, ZoomLevel,
};

use super::test_utils::small_pyramid_store;

// =============================================================================
// Helpers
// =============================================================================

/// Wraps a reader, counting reads and optionally slowing them down.
struct CountingSource {
    reader: TileReader,
    delay: Duration,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
}

impl CountingSource {
    fn new(reader: TileReader, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reader,
            delay,
            reads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        })
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl TileSource for CountingSource {
    fn zoom_levels(&self) -> Vec<ZoomLevel> {
        self.reader.zoom_levels()
    }

    fn tiles_for_level(
        &self,
        zoom_index: usize,
        area: Option<&GeoBounds>,
    ) -> Result<Vec<TileAddress>, StoreError> {
        self.reader.tiles_for_level(zoom_index, area)
    }

    fn read_tile(&self, address: TileAddress) -> Result<TileImage, ReadError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = self.reader.read_tile(address);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[derive(Default)]
struct Collector {
    drawn: Vec<(TileAddress, u64)>,
}

impl TileRenderer for Collector {
    fn draw_tile(&mut self, entry: &CacheEntry) {
        self.drawn.push((entry.address, entry.version));
    }
}

struct Fixture {
    _store: super::test_utils::TestStore,
    _registry: StoreRegistry,
    source: Arc<CountingSource>,
    levels: Vec<ZoomLevel>,
}

fn fixture(max_zoom: u8, delay: Duration) -> Fixture {
    let store = small_pyramid_store(max_zoom);
    let registry = StoreRegistry::new(1, 256);
    let reader = TileReader::open(&registry, store.path()).unwrap();
    let levels = reader.zoom_levels();
    Fixture {
        _store: store,
        _registry: registry,
        source: CountingSource::new(reader, delay),
        levels,
    }
}

fn layer(fixture: &Fixture, signal: Arc<VisibilitySignal>) -> TileLayer {
    let config = LayerConfig {
        stop_poll_interval: Duration::from_millis(2),
        ..LayerConfig::default()
    };
    TileLayer::new(fixture.source.clone(), signal, config)
}

/// A view whose resolution selects `index` with the default fudge factor.
fn view_at(levels: &[ZoomLevel], index: usize) -> View {
    View {
        resolution: levels[index].resolution / 2.0,
        area: None,
    }
}

/// Draw frames until at least `want` tiles are drawn or the deadline passes.
fn draw_until(layer: &mut TileLayer, view: &View, want: usize) -> Vec<(TileAddress, u64)> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let mut collector = Collector::default();
        layer.draw(view, &mut collector);
        if collector.drawn.len() >= want || Instant::now() > deadline {
            return collector.drawn;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Draw frames for `duration`, returning the most tiles drawn in any frame.
fn draw_for(layer: &mut TileLayer, view: &View, duration: Duration) -> usize {
    let deadline = Instant::now() + duration;
    let mut most = 0;
    while Instant::now() < deadline {
        let mut collector = Collector::default();
        most = most.max(layer.draw(view, &mut collector));
        std::thread::sleep(Duration::from_millis(2));
    }
    most
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_layer_loads_selected_level_from_store() {
    let fixture = fixture(2, Duration::ZERO);
    let mut layer = layer(&fixture, Arc::new(VisibilitySignal::new(true)));
    layer.start().unwrap();

    let view = view_at(&fixture.levels, 1);
    let drawn = draw_until(&mut layer, &view, 4);
    assert_eq!(drawn.len(), 4);
    assert!(drawn.iter().all(|(address, _)| address.zoom == 1));
    assert_eq!(layer.state(), LayerState::Resolved);
}

#[test]
fn test_start_twice_single_worker_single_subscription() {
    let fixture = fixture(1, Duration::ZERO);
    let signal = Arc::new(VisibilitySignal::new(true));
    let mut layer = layer(&fixture, signal.clone());

    layer.start().unwrap();
    layer.start().unwrap();
    assert!(layer.has_worker());
    assert_eq!(signal.subscriber_count(), 1);
    assert_eq!(layer.lifecycle_state(), LifecycleState::Active);

    layer.stop();
    assert_eq!(signal.subscriber_count(), 0);
}

#[test]
fn test_suspend_before_start_stays_idle_until_resume() {
    let fixture = fixture(1, Duration::ZERO);
    let mut layer = layer(&fixture, Arc::new(VisibilitySignal::new(true)));

    layer.suspend();
    layer.start().unwrap();
    assert_eq!(layer.lifecycle_state(), LifecycleState::Suspended);

    let view = view_at(&fixture.levels, 1);
    assert_eq!(draw_for(&mut layer, &view, Duration::from_millis(100)), 0);
    assert_eq!(fixture.source.reads(), 0);
    assert_eq!(layer.state(), LayerState::Suspended);

    layer.resume();
    assert_eq!(layer.lifecycle_state(), LifecycleState::Active);
    assert_eq!(draw_until(&mut layer, &view, 4).len(), 4);
    assert!(fixture.source.reads() >= 4);
}

#[test]
fn test_no_io_or_publish_after_stop() {
    let fixture = fixture(3, Duration::from_millis(3));
    let mut layer = layer(&fixture, Arc::new(VisibilitySignal::new(true)));
    layer.start().unwrap();

    // 64 slow tiles: the stop lands mid-request.
    let view = view_at(&fixture.levels, 3);
    let mut collector = Collector::default();
    layer.draw(&view, &mut collector);
    let deadline = Instant::now() + Duration::from_secs(5);
    while fixture.source.reads() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }

    layer.stop();
    assert_eq!(fixture.source.in_flight(), 0);
    assert!(!layer.controller().is_servicing());
    let reads = fixture.source.reads();

    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(fixture.source.reads(), reads);
    assert_eq!(layer.pump(), 0);
    assert_eq!(layer.cache().publications(), 0);
}

#[test]
fn test_published_versions_increase() {
    let fixture = fixture(2, Duration::ZERO);
    let mut layer = layer(&fixture, Arc::new(VisibilitySignal::new(true)));
    layer.start().unwrap();

    let coarse = view_at(&fixture.levels, 0);
    let fine = view_at(&fixture.levels, 2);

    let first = draw_until(&mut layer, &coarse, 1);
    let v1 = layer.cache().published_version().unwrap();
    assert!(first.iter().all(|(_, version)| *version == v1));

    let second = draw_until(&mut layer, &fine, 16);
    let v2 = layer.cache().published_version().unwrap();
    assert!(v2 > v1);
    assert_eq!(second.len(), 16);
    assert!(second.iter().all(|(_, version)| *version == v2));
    assert_eq!(layer.cache().zoom_index(), Some(2));

    // Invalidating re-queries the same level under a newer version.
    layer.invalidate();
    let deadline = Instant::now() + Duration::from_secs(10);
    while layer.cache().published_version() == Some(v2) && Instant::now() < deadline {
        let mut collector = Collector::default();
        layer.draw(&fine, &mut collector);
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(layer.cache().published_version().unwrap() > v2);
}

#[test]
fn test_hidden_layer_does_not_load() {
    let fixture = fixture(1, Duration::ZERO);
    let signal = Arc::new(VisibilitySignal::new(false));
    let mut layer = layer(&fixture, signal.clone());
    layer.start().unwrap();

    let view = view_at(&fixture.levels, 1);
    assert_eq!(draw_for(&mut layer, &view, Duration::from_millis(60)), 0);
    assert_eq!(fixture.source.reads(), 0);

    signal.set_visible(true);
    assert_eq!(draw_until(&mut layer, &view, 4).len(), 4);
}

#[test]
fn test_release_then_redraw_reloads() {
    let fixture = fixture(1, Duration::ZERO);
    let mut layer = layer(&fixture, Arc::new(VisibilitySignal::new(true)));
    layer.start().unwrap();

    let view = view_at(&fixture.levels, 1);
    assert_eq!(draw_until(&mut layer, &view, 4).len(), 4);
    let reads = fixture.source.reads();

    layer.release();
    assert!(layer.cache().is_empty());

    assert_eq!(draw_until(&mut layer, &view, 4).len(), 4);
    assert!(fixture.source.reads() >= reads + 4);
}

#[test]
fn test_restart_after_stop() {
    let fixture = fixture(1, Duration::ZERO);
    let mut layer = layer(&fixture, Arc::new(VisibilitySignal::new(true)));
    layer.start().unwrap();
    layer.stop();
    assert_eq!(layer.lifecycle_state(), LifecycleState::Stopped);

    layer.start().unwrap();
    let view = view_at(&fixture.levels, 0);
    assert_eq!(draw_until(&mut layer, &view, 1).len(), 1);
}

#[test]
fn test_restart_after_shutdown_loads_tiles() {
    let fixture = fixture(1, Duration::ZERO);
    let mut layer = layer(&fixture, Arc::new(VisibilitySignal::new(true)));
    layer.start().unwrap();
    layer.shutdown();
    assert!(!layer.has_worker());

    layer.start().unwrap();
    assert!(layer.has_worker());
    assert_eq!(layer.lifecycle_state(), LifecycleState::Active);

    let view = view_at(&fixture.levels, 0);
    assert_eq!(draw_until(&mut layer, &view, 1).len(), 1);
    assert!(fixture.source.reads() >= 1);
}
