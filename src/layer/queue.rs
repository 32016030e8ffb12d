//! Render-thread task queue.
//!
//! The worker never mutates the zoom-level cache. It posts publish tasks
//! here, and the render loop runs them against the cache it owns when it
//! drains the queue. Each task carries the lifecycle epoch it was posted
//! under; tasks from an older epoch are dropped unrun.

use std::fmt;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use super::cache::ZoomLevelCache;

type Publish = Box<dyn FnOnce(&mut ZoomLevelCache) + Send>;

struct RenderTask {
    epoch: u64,
    publish: Publish,
}

/// Sending side of the render queue, held by the worker.
#[derive(Clone)]
pub struct RenderPoster {
    tx: UnboundedSender<RenderTask>,
}

impl RenderPoster {
    /// Post a task. Returns false if the render side is gone.
    pub fn post(
        &self,
        epoch: u64,
        publish: impl FnOnce(&mut ZoomLevelCache) + Send + 'static,
    ) -> bool {
        self.tx
            .send(RenderTask {
                epoch,
                publish: Box::new(publish),
            })
            .is_ok()
    }
}

impl fmt::Debug for RenderPoster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPoster").finish_non_exhaustive()
    }
}

/// Receiving side of the render queue, owned by the layer.
pub struct RenderQueue {
    tx: UnboundedSender<RenderTask>,
    rx: UnboundedReceiver<RenderTask>,
}

impl RenderQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn poster(&self) -> RenderPoster {
        RenderPoster {
            tx: self.tx.clone(),
        }
    }

    /// Run every pending task whose epoch is still current.
    ///
    /// Returns the number of tasks run.
    pub fn drain(&mut self, cache: &mut ZoomLevelCache, is_current: impl Fn(u64) -> bool) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            if is_current(task.epoch) {
                (task.publish)(cache);
                ran += 1;
            } else {
                trace!("Dropped render task from epoch {}", task.epoch);
            }
        }
        ran
    }

    /// Drop every pending task unrun.
    pub fn discard(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RenderQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderQueue").finish_non_exhaustive()
    }
}
