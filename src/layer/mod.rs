//! Asynchronous tile layer.
//!
//! A [`TileLayer`] composes the pieces that keep storage I/O off the render
//! thread:
//!
//! - [`LifecycleController`] - start/stop/suspend/resume gating of the worker
//! - [`Worker`] - the single background thread that decodes tiles
//! - [`RenderQueue`] - publish tasks posted by the worker, run by the renderer
//! - [`ZoomLevelCache`] - versioned decoded tiles the renderer draws from
//!
//! The render loop calls [`TileLayer::draw`] each frame. It drains the
//! queue, asks for the zoom level matching the display resolution and draws
//! whatever is already decoded. It never waits on the store.

pub mod cache;
pub mod lifecycle;
pub mod queue;
pub mod visibility;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::mosaic::{select_zoom_level, GeoBounds, ZoomLevel};
use crate::tile::TileSource;

pub use cache::{CacheEntry, ZoomLevelCache, DEFAULT_CACHE_BYTES};
pub use lifecycle::{
    LayerState, LifecycleController, LifecycleState, RenderRequest, RequestOutcome,
    DEFAULT_STOP_POLL_INTERVAL,
};
pub use queue::{RenderPoster, RenderQueue};
pub use visibility::{SubscriptionId, VisibilitySignal};
pub use worker::Worker;

/// Default multiplier on the display resolution when picking a level.
pub const DEFAULT_ZOOM_FUDGE_FACTOR: f64 = 2.0;

/// Tuning for a [`TileLayer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerConfig {
    pub zoom_fudge_factor: f64,
    pub cache_bytes: usize,
    pub stop_poll_interval: Duration,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            zoom_fudge_factor: DEFAULT_ZOOM_FUDGE_FACTOR,
            cache_bytes: DEFAULT_CACHE_BYTES,
            stop_poll_interval: DEFAULT_STOP_POLL_INTERVAL,
        }
    }
}

/// What the renderer is currently showing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    /// Display resolution in meters per pixel
    pub resolution: f64,

    /// Visible area, or the whole store when `None`
    pub area: Option<GeoBounds>,
}

/// Draw target for cached tiles.
pub trait TileRenderer {
    fn draw_tile(&mut self, entry: &CacheEntry);
}

/// A tile layer feeding a renderer from a background worker.
pub struct TileLayer {
    controller: Arc<LifecycleController>,
    signal: Arc<VisibilitySignal>,
    source: Arc<dyn TileSource>,
    levels: Vec<ZoomLevel>,
    cache: ZoomLevelCache,
    queue: RenderQueue,
    worker: Option<Worker>,
    fudge_factor: f64,
}

impl TileLayer {
    pub fn new(
        source: Arc<dyn TileSource>,
        signal: Arc<VisibilitySignal>,
        config: LayerConfig,
    ) -> Self {
        let levels = source.zoom_levels();
        Self {
            controller: LifecycleController::new(signal.clone(), config.stop_poll_interval),
            signal,
            source,
            levels,
            cache: ZoomLevelCache::new(config.cache_bytes),
            queue: RenderQueue::new(),
            worker: None,
            fudge_factor: config.zoom_fudge_factor,
        }
    }

    /// Start the layer, spawning the worker on first start.
    pub fn start(&mut self) -> std::io::Result<()> {
        self.controller.start();
        if self.worker.is_none() {
            let worker = Worker::spawn(
                self.controller.clone(),
                self.source.clone(),
                self.queue.poster(),
                self.cache.capacity(),
            )?;
            self.worker = Some(worker);
            debug!("Spawned worker for layer with {} levels", self.levels.len());
        }
        Ok(())
    }

    /// Stop the layer. Returns once no request is in flight.
    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn suspend(&self) {
        self.controller.suspend();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    /// Drop every cached tile and forget the current request.
    pub fn release(&mut self) {
        self.controller.release();
        let dropped = self.queue.discard();
        self.cache.clear();
        debug!("Released layer ({} pending tasks dropped)", dropped);
    }

    /// Force a re-query of the current level.
    pub fn invalidate(&self) {
        self.controller.invalidate();
    }

    /// Zoom chain index to draw at `display_resolution`.
    pub fn select_zoom_level(&self, display_resolution: f64) -> Option<usize> {
        select_zoom_level(&self.levels, display_resolution, self.fudge_factor)
    }

    /// Run pending publish tasks. Returns the number applied.
    pub fn pump(&mut self) -> usize {
        let controller = &self.controller;
        self.queue
            .drain(&mut self.cache, |epoch| controller.accepts(epoch))
    }

    /// Draw one frame from already-decoded tiles.
    ///
    /// Returns the number of tiles drawn.
    pub fn draw(&mut self, view: &View, renderer: &mut dyn TileRenderer) -> usize {
        self.pump();

        match self.select_zoom_level(view.resolution) {
            Some(index) => {
                self.controller.request(index, view.area);
            }
            None => warn!("No zoom level for resolution {}", view.resolution),
        }

        let mut drawn = 0;
        for entry in self.cache.drawable() {
            renderer.draw_tile(entry);
            drawn += 1;
        }
        drawn
    }

    pub fn state(&self) -> LayerState {
        self.controller.layer_state()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.controller.state()
    }

    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    pub fn signal(&self) -> &Arc<VisibilitySignal> {
        &self.signal
    }

    pub fn cache(&self) -> &ZoomLevelCache {
        &self.cache
    }

    pub fn zoom_levels(&self) -> &[ZoomLevel] {
        &self.levels
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop the layer and join its worker.
    pub fn shutdown(&mut self) {
        self.controller.stop();
        if let Some(worker) = self.worker.take() {
            worker.join();
        }
    }
}

impl Drop for TileLayer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
