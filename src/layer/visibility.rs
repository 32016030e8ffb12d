//! Layer visibility signal.
//!
//! A small observer list. The lifecycle controller subscribes while the
//! layer is started so the worker idles whenever the layer is hidden.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Token returned by [`VisibilitySignal::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(bool) + Send + Sync>;

struct SignalState {
    visible: bool,
    next_id: u64,
    listeners: BTreeMap<SubscriptionId, Arc<Listener>>,
}

/// Visibility of the layer that owns a controller.
pub struct VisibilitySignal {
    state: Mutex<SignalState>,
}

impl VisibilitySignal {
    pub fn new(visible: bool) -> Self {
        Self {
            state: Mutex::new(SignalState {
                visible,
                next_id: 0,
                listeners: BTreeMap::new(),
            }),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    /// Register a listener for visibility transitions.
    pub fn subscribe(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> SubscriptionId {
        let mut state = self.state.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state
            .listeners
            .insert(id, Arc::new(Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.lock().listeners.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Update visibility and notify listeners on a transition.
    ///
    /// Listeners run outside the signal lock.
    pub fn set_visible(&self, visible: bool) {
        let listeners: Vec<_> = {
            let mut state = self.state.lock();
            if state.visible == visible {
                return;
            }
            state.visible = visible;
            state.listeners.values().cloned().collect()
        };
        for listener in listeners {
            listener(visible);
        }
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Debug for VisibilitySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VisibilitySignal")
            .field("visible", &state.visible)
            .field("subscribers", &state.listeners.len())
            .finish()
    }
}
