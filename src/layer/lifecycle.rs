//! Lifecycle controller for a layer's background worker.
//!
//! # States
//!
//! The controller is in one of three states plus a `suspend_requested`
//! latch that is recorded regardless of state:
//!
//! | call        | Stopped                         | Suspended          | Active             |
//! |-------------|---------------------------------|--------------------|--------------------|
//! | `start`     | Active, or Suspended if latched | no-op              | no-op              |
//! | `stop`      | no-op (waits for worker)        | Stopped            | Stopped            |
//! | `suspend`   | latch set                       | latch set          | Suspended          |
//! | `resume`    | latch cleared                   | Active             | latch cleared      |
//! | `release`   | stays Stopped, request cleared  | request cleared    | request cleared    |
//!
//! The worker only services requests while the state is Active and the
//! owning layer is visible. `stop` blocks until any in-flight request has
//! finished, so no result set is published after it returns.
//!
//! # Epochs
//!
//! `stop` and `release` bump an epoch counter. Result sets are posted with
//! the epoch they were serviced under and are dropped if the epoch has
//! moved on by the time they would be published.

use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, trace};

use crate::mosaic::GeoBounds;

use super::visibility::{SubscriptionId, VisibilitySignal};

/// Default interval between checks while `stop` waits for the worker.
pub const DEFAULT_STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Worker gating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Stopped,
    Suspended,
    Active,
}

/// Resolution state reported to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LayerState {
    /// The worker is not allowed to run
    Suspended,

    /// A request is pending or being serviced
    Resolving,

    /// Nothing has been published, or the last request produced no tiles
    Unresolved,

    /// The last request published tiles
    Resolved,
}

/// Work handed to the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub zoom_index: usize,
    pub area: Option<GeoBounds>,
    pub version: u64,
    pub epoch: u64,
}

/// How the worker finished a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Every tile was attempted; `tiles` were decoded
    Completed { tiles: usize },

    /// The worker yielded between tiles; the partial set was discarded
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
struct Target {
    zoom_index: usize,
    area: Option<GeoBounds>,
    version: u64,
}

struct ControlState {
    state: LifecycleState,
    suspend_requested: bool,
    visible: bool,
    subscription: Option<SubscriptionId>,

    target: Option<Target>,
    dirty: bool,
    servicing: bool,
    resolved: bool,

    epoch: u64,
    next_version: u64,

    worker: Option<ThreadId>,
    shutdown: bool,
}

/// Suspend/resume/stop state machine gating one background worker.
pub struct LifecycleController {
    inner: Mutex<ControlState>,
    changed: Condvar,
    signal: Arc<VisibilitySignal>,
    poll_interval: Duration,
}

impl LifecycleController {
    /// Create a stopped controller bound to a layer's visibility signal.
    pub fn new(signal: Arc<VisibilitySignal>, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ControlState {
                state: LifecycleState::Stopped,
                suspend_requested: false,
                visible: false,
                subscription: None,
                target: None,
                dirty: false,
                servicing: false,
                resolved: false,
                epoch: 0,
                next_version: 1,
                worker: None,
                shutdown: false,
            }),
            changed: Condvar::new(),
            signal,
            poll_interval,
        })
    }

    // -------------------------------------------------------------------------
    // Control surface
    // -------------------------------------------------------------------------

    /// Leave `Stopped`. Idle until `resume` if a suspend is latched.
    ///
    /// Subscribes to the visibility signal once per start/stop cycle.
    pub fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.state != LifecycleState::Stopped {
            return;
        }
        inner.state = if inner.suspend_requested {
            LifecycleState::Suspended
        } else {
            LifecycleState::Active
        };
        // Work dropped by the last stop reruns against the current target.
        if inner.target.is_some() {
            inner.dirty = true;
        }
        debug!("Lifecycle started ({:?})", inner.state);

        // Subscriptions change only under the controller lock. Listeners
        // take it after leaving the signal lock.
        if inner.subscription.is_none() {
            let weak: Weak<Self> = Arc::downgrade(self);
            let id = self.signal.subscribe(move |visible| {
                if let Some(controller) = weak.upgrade() {
                    controller.set_visible(visible);
                }
            });
            inner.subscription = Some(id);
            inner.visible = self.signal.is_visible();
        }
        drop(inner);
        self.changed.notify_all();
    }

    /// Enter `Stopped` and wait for any in-flight request to finish.
    ///
    /// # Panics
    ///
    /// Panics if called from the worker thread, which would wait on itself.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(worker) = inner.worker {
            assert!(
                worker != thread::current().id(),
                "stop() called from the worker thread"
            );
        }
        if inner.state != LifecycleState::Stopped {
            inner.state = LifecycleState::Stopped;
            inner.epoch += 1;
            debug!("Lifecycle stopped (epoch {})", inner.epoch);
        }
        if let Some(id) = inner.subscription.take() {
            self.signal.unsubscribe(id);
        }
        self.changed.notify_all();

        while inner.servicing {
            self.changed.wait_for(&mut inner, self.poll_interval);
        }
    }

    /// Latch a suspend and idle the worker.
    pub fn suspend(&self) {
        let mut inner = self.inner.lock();
        inner.suspend_requested = true;
        if inner.state == LifecycleState::Active {
            inner.state = LifecycleState::Suspended;
        }
        drop(inner);
        self.changed.notify_all();
    }

    /// Clear the suspend latch and reactivate unless stopped.
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        inner.suspend_requested = false;
        if inner.state == LifecycleState::Suspended {
            inner.state = LifecycleState::Active;
        }
        drop(inner);
        self.changed.notify_all();
    }

    /// Return to the unresolved state, forgetting the current target.
    ///
    /// A stopped controller stays idle.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        inner.target = None;
        inner.dirty = false;
        inner.resolved = false;
        inner.epoch += 1;
        drop(inner);
        self.changed.notify_all();
    }

    fn set_visible(&self, visible: bool) {
        let mut inner = self.inner.lock();
        inner.visible = visible;
        trace!("Visibility changed: {}", visible);
        drop(inner);
        self.changed.notify_all();
    }

    // -------------------------------------------------------------------------
    // Render-thread requests
    // -------------------------------------------------------------------------

    /// Ask for the tiles at `zoom_index`.
    ///
    /// A request equal to the current target is ignored. Returns the
    /// version stamp assigned to a new request.
    pub fn request(&self, zoom_index: usize, area: Option<GeoBounds>) -> Option<u64> {
        let mut inner = self.inner.lock();
        if let Some(target) = &inner.target {
            if target.zoom_index == zoom_index && target.area == area {
                return None;
            }
        }
        let version = Self::retarget(&mut inner, zoom_index, area);
        drop(inner);
        self.changed.notify_all();
        Some(version)
    }

    /// Re-request the current target even though it has not changed.
    pub fn invalidate(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        let target = inner.target.clone()?;
        let version = Self::retarget(&mut inner, target.zoom_index, target.area);
        drop(inner);
        self.changed.notify_all();
        Some(version)
    }

    fn retarget(inner: &mut ControlState, zoom_index: usize, area: Option<GeoBounds>) -> u64 {
        let version = inner.next_version;
        inner.next_version += 1;
        inner.target = Some(Target {
            zoom_index,
            area,
            version,
        });
        inner.dirty = true;
        version
    }

    /// Whether a task posted under `epoch` may still be published.
    pub fn accepts(&self, epoch: u64) -> bool {
        let inner = self.inner.lock();
        inner.state != LifecycleState::Stopped && inner.epoch == epoch
    }

    // -------------------------------------------------------------------------
    // Worker side
    // -------------------------------------------------------------------------

    /// Clear a previous shutdown so a newly spawned worker can run.
    ///
    /// Called on the spawning thread before the worker thread exists.
    pub fn prepare_worker(&self) {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            debug!("Re-arming controller after shutdown");
        }
        inner.shutdown = false;
    }

    /// Register the calling thread as the one worker.
    ///
    /// # Panics
    ///
    /// Panics if a worker is already attached.
    pub fn attach_worker(&self) {
        let mut inner = self.inner.lock();
        assert!(
            inner.worker.is_none(),
            "a worker is already attached to this layer"
        );
        inner.worker = Some(thread::current().id());
    }

    pub fn detach_worker(&self) {
        let mut inner = self.inner.lock();
        inner.worker = None;
        inner.servicing = false;
        drop(inner);
        self.changed.notify_all();
    }

    /// Block until there is work to do; `None` once shut down.
    pub fn next_request(&self) -> Option<RenderRequest> {
        let mut inner = self.inner.lock();
        loop {
            if inner.shutdown {
                return None;
            }
            if inner.state == LifecycleState::Active && inner.visible && inner.dirty {
                if let Some(target) = inner.target.clone() {
                    inner.dirty = false;
                    inner.servicing = true;
                    return Some(RenderRequest {
                        zoom_index: target.zoom_index,
                        area: target.area,
                        version: target.version,
                        epoch: inner.epoch,
                    });
                }
                inner.dirty = false;
            }
            self.changed.wait(&mut inner);
        }
    }

    /// Checked by the worker between tiles.
    ///
    /// True when the worker should abandon the request: the layer was
    /// suspended, stopped, hidden or released, or a newer request arrived.
    pub fn should_yield(&self, request: &RenderRequest) -> bool {
        let inner = self.inner.lock();
        inner.shutdown
            || inner.state != LifecycleState::Active
            || !inner.visible
            || inner.epoch != request.epoch
            || inner.dirty
    }

    /// Finish servicing a request.
    ///
    /// `publish` runs under the controller lock, and only for a completed
    /// request whose epoch is still current on a controller that is not
    /// stopped. An abandoned request is re-marked pending so it reruns
    /// after a resume.
    pub fn finish_request(
        &self,
        request: &RenderRequest,
        outcome: RequestOutcome,
        publish: impl FnOnce(),
    ) -> bool {
        let mut inner = self.inner.lock();
        inner.servicing = false;

        let current = inner.state != LifecycleState::Stopped && inner.epoch == request.epoch;
        let published = match outcome {
            RequestOutcome::Completed { tiles } if current => {
                publish();
                let superseded = inner
                    .target
                    .as_ref()
                    .map_or(true, |t| t.version != request.version);
                if !superseded {
                    inner.resolved = tiles > 0;
                }
                true
            }
            RequestOutcome::Completed { .. } => false,
            RequestOutcome::Abandoned => {
                if inner.epoch == request.epoch && inner.target.is_some() {
                    inner.dirty = true;
                }
                false
            }
        };
        drop(inner);
        self.changed.notify_all();
        published
    }

    /// Wake the worker and make it exit.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        drop(inner);
        self.changed.notify_all();
    }

    // -------------------------------------------------------------------------
    // Reporting
    // -------------------------------------------------------------------------

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn suspend_requested(&self) -> bool {
        self.inner.lock().suspend_requested
    }

    pub fn is_servicing(&self) -> bool {
        self.inner.lock().servicing
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    pub fn layer_state(&self) -> LayerState {
        let inner = self.inner.lock();
        if inner.state != LifecycleState::Active {
            LayerState::Suspended
        } else if inner.servicing || inner.dirty {
            LayerState::Resolving
        } else if inner.resolved {
            LayerState::Resolved
        } else {
            LayerState::Unresolved
        }
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LifecycleController")
            .field("state", &inner.state)
            .field("suspend_requested", &inner.suspend_requested)
            .field("visible", &inner.visible)
            .field("servicing", &inner.servicing)
            .field("epoch", &inner.epoch)
            .finish()
    }
}
