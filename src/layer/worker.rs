//! Background tile worker.
//!
//! One dedicated thread per layer. It services one request at a time:
//! list the tiles at the requested level, decode them one by one, then post
//! the complete set to the render queue. Between tiles it checks whether
//! it should yield; a yielded request is discarded whole, never published
//! in part.
//!
//! A result set never holds more decoded bytes than the layer's cache
//! budget. Tiles past the budget are not decoded.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::error::ReadError;
use crate::mosaic::TileAddress;
use crate::tile::{TileImage, TileSource};

use super::lifecycle::{LifecycleController, RenderRequest, RequestOutcome};
use super::queue::RenderPoster;

/// Handle to a running worker thread.
///
/// Dropping the handle shuts the controller down and joins the thread.
#[derive(Debug)]
pub struct Worker {
    controller: Arc<LifecycleController>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker thread.
    ///
    /// `byte_budget` caps the decoded bytes collected for one request.
    pub fn spawn(
        controller: Arc<LifecycleController>,
        source: Arc<dyn TileSource>,
        poster: RenderPoster,
        byte_budget: usize,
    ) -> std::io::Result<Self> {
        controller.prepare_worker();
        let thread_controller = controller.clone();
        let handle = thread::Builder::new()
            .name("tilevault-worker".to_string())
            .spawn(move || run(&thread_controller, source.as_ref(), &poster, byte_budget))?;
        Ok(Self {
            controller,
            handle: Some(handle),
        })
    }

    /// Shut the controller down and wait for the thread to exit.
    pub fn join(mut self) {
        self.join_inner();
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.controller.shutdown();
            if handle.join().is_err() {
                warn!("Tile worker panicked");
            }
        }
    }
}

fn run(
    controller: &LifecycleController,
    source: &dyn TileSource,
    poster: &RenderPoster,
    byte_budget: usize,
) {
    controller.attach_worker();
    debug!("Tile worker started");

    while let Some(request) = controller.next_request() {
        trace!(
            "Servicing v{} at zoom index {}",
            request.version,
            request.zoom_index
        );
        let (outcome, tiles) = service(controller, source, &request, byte_budget);

        let version = request.version;
        let zoom_index = request.zoom_index;
        let published = controller.finish_request(&request, outcome, || {
            poster.post(request.epoch, move |cache| {
                cache.publish(version, zoom_index, tiles);
            });
        });
        trace!("Finished v{}: {:?} (posted: {})", version, outcome, published);
    }

    controller.detach_worker();
    debug!("Tile worker exited");
}

fn service(
    controller: &LifecycleController,
    source: &dyn TileSource,
    request: &RenderRequest,
    byte_budget: usize,
) -> (RequestOutcome, Vec<(TileAddress, TileImage)>) {
    let addresses = match source.tiles_for_level(request.zoom_index, request.area.as_ref()) {
        Ok(addresses) => addresses,
        Err(e) => {
            warn!("Tile listing failed at zoom index {}: {}", request.zoom_index, e);
            return (RequestOutcome::Completed { tiles: 0 }, Vec::new());
        }
    };

    let mut tiles = Vec::with_capacity(addresses.len());
    let mut bytes = 0usize;
    for address in addresses {
        if controller.should_yield(request) {
            trace!("Yielding v{} after {} tiles", request.version, tiles.len());
            return (RequestOutcome::Abandoned, Vec::new());
        }
        match source.read_tile(address) {
            Ok(image) => {
                bytes += image.byte_len();
                if bytes > byte_budget {
                    debug!(
                        "Result set v{} reached the {} byte budget after {} tiles",
                        request.version,
                        byte_budget,
                        tiles.len()
                    );
                    break;
                }
                tiles.push((address, image));
            }
            Err(ReadError::NotFound { .. }) => {
                trace!("Tile {:?} vanished", address);
            }
            Err(e) => debug!("Skipping tile {:?}: {}", address, e),
        }
    }

    (
        RequestOutcome::Completed { tiles: tiles.len() },
        tiles,
    )
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join_inner();
    }
}
