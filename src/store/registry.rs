//! Shared store registry.
//!
//! The registry maps a canonical store path to one open connection shared
//! by every consumer:
//! - The first `open` of a path connects, runs discovery and registers the
//!   store with a reference count of one
//! - Later opens of the same path bump the count and share the instance
//! - Dropping the last [`StoreHandle`] removes the entry under the registry
//!   lock, then closes the connection and drains the pools outside it
//!
//! Registration and removal are serialized by a single registry lock, so
//! the connection is closed exactly once no matter how opens and drops
//! interleave across threads.
//!
//! # Example
//!
//! ```ignore
//! use tilevault::store::StoreRegistry;
//!
//! let registry = StoreRegistry::new(1, 256);
//! let a = registry.open("harbor.mbtiles")?;
//! let b = registry.open("harbor.mbtiles")?;
//! assert_eq!(a.ref_count(), 2);
//!
//! drop(a);
//! drop(b); // connection closed here
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::format::descriptor::open_read_only;
use crate::format::{discover_connection, Discovery, TileMatrixDescriptor};
use crate::mosaic::{QuerySpec, TileRow};
use crate::tile::PixelBuffer;

use super::pool::{BufferPool, DEFAULT_POOL_CAPACITY};

// =============================================================================
// SharedStore
// =============================================================================

/// Mutable per-store state, guarded by the session lock.
struct StoreState {
    connection: Option<Connection>,
    pixel_pool: BufferPool<PixelBuffer>,
    int_pool: BufferPool<Vec<u32>>,
}

/// One open store shared by every handle for its path.
struct SharedStore {
    path: PathBuf,
    ref_count: AtomicUsize,
    discovery: Discovery,
    state: Mutex<StoreState>,
}

impl SharedStore {
    /// Close the connection and free pooled buffers.
    ///
    /// Returns false if the store was already closed.
    fn close(&self) -> bool {
        let mut state = self.state.lock();
        let Some(connection) = state.connection.take() else {
            return false;
        };
        let pixels = state.pixel_pool.drain();
        let ints = state.int_pool.drain();
        drop(state);

        if let Err((_, e)) = connection.close() {
            debug!("Error closing {}: {}", self.path.display(), e);
        }
        debug!(
            "Freed {} pixel and {} int buffers for {}",
            pixels,
            ints,
            self.path.display()
        );
        true
    }
}

/// Borrowed view of a store for one serialized unit of work.
pub struct StoreSession<'a> {
    pub connection: &'a Connection,
    pub pixel_pool: &'a mut BufferPool<PixelBuffer>,
    pub int_pool: &'a mut BufferPool<Vec<u32>>,
}

// =============================================================================
// StoreRegistry
// =============================================================================

struct RegistryShared {
    stores: Mutex<HashMap<PathBuf, Arc<SharedStore>>>,
    opened: AtomicU64,
    closed: AtomicU64,
    pool_capacity: usize,
    fallback_tile_size: u32,
}

/// Registry of open tile stores keyed by canonical path.
///
/// Cloning a registry shares the same underlying map.
#[derive(Clone)]
pub struct StoreRegistry {
    shared: Arc<RegistryShared>,
}

impl StoreRegistry {
    /// Create a registry.
    ///
    /// # Arguments
    /// * `pool_capacity` - Buffers kept per pool per store
    /// * `fallback_tile_size` - Tile size used when discovery cannot decode a sample
    pub fn new(pool_capacity: usize, fallback_tile_size: u32) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                stores: Mutex::new(HashMap::new()),
                opened: AtomicU64::new(0),
                closed: AtomicU64::new(0),
                pool_capacity,
                fallback_tile_size,
            }),
        }
    }

    /// The process-wide registry, created with default settings.
    pub fn global() -> &'static StoreRegistry {
        static GLOBAL: OnceLock<StoreRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            StoreRegistry::new(
                DEFAULT_POOL_CAPACITY,
                crate::format::DEFAULT_FALLBACK_TILE_SIZE,
            )
        })
    }

    /// Open a store, sharing an existing connection for the same path.
    ///
    /// A failed open leaves no registry entry behind.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<StoreHandle, StoreError> {
        let path = path.as_ref();
        let canonical = std::fs::canonicalize(path).map_err(|e| StoreError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut stores = self.shared.stores.lock();
        if let Some(store) = stores.get(&canonical) {
            let previous = store.ref_count.fetch_add(1, Ordering::AcqRel);
            assert!(
                previous > 0,
                "registered store {} has a zero reference count",
                canonical.display()
            );
            debug!(
                "Shared store {} (refs {})",
                canonical.display(),
                previous + 1
            );
            return Ok(self.handle(store.clone()));
        }

        let connection = open_read_only(&canonical)?;
        let discovery =
            discover_connection(&connection, &canonical, self.shared.fallback_tile_size)?;

        let capacity = self.shared.pool_capacity;
        let store = Arc::new(SharedStore {
            path: canonical.clone(),
            ref_count: AtomicUsize::new(1),
            discovery,
            state: Mutex::new(StoreState {
                connection: Some(connection),
                pixel_pool: BufferPool::new(capacity),
                int_pool: BufferPool::new(capacity),
            }),
        });
        stores.insert(canonical.clone(), store.clone());
        drop(stores);

        self.shared.opened.fetch_add(1, Ordering::Relaxed);
        info!("Opened tile store {}", canonical.display());
        Ok(self.handle(store))
    }

    fn handle(&self, store: Arc<SharedStore>) -> StoreHandle {
        StoreHandle {
            store,
            registry: self.shared.clone(),
        }
    }

    /// Number of stores currently registered.
    pub fn len(&self) -> usize {
        self.shared.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a store is registered for `path`.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        match std::fs::canonicalize(path.as_ref()) {
            Ok(canonical) => self.shared.stores.lock().contains_key(&canonical),
            Err(_) => false,
        }
    }

    /// Connections opened over the registry's lifetime.
    pub fn stores_opened(&self) -> u64 {
        self.shared.opened.load(Ordering::Relaxed)
    }

    /// Connections closed over the registry's lifetime.
    pub fn stores_closed(&self) -> u64 {
        self.shared.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.len())
            .field("opened", &self.stores_opened())
            .field("closed", &self.stores_closed())
            .finish()
    }
}

// =============================================================================
// StoreHandle
// =============================================================================

/// A counted reference to a shared store.
///
/// Cloning increments the store's reference count; dropping decrements it.
/// The last drop closes the connection.
pub struct StoreHandle {
    store: Arc<SharedStore>,
    registry: Arc<RegistryShared>,
}

impl StoreHandle {
    /// Canonical path of the store.
    pub fn path(&self) -> &Path {
        &self.store.path
    }

    /// Current number of live handles for this store.
    pub fn ref_count(&self) -> usize {
        self.store.ref_count.load(Ordering::Acquire)
    }

    pub fn discovery(&self) -> &Discovery {
        &self.store.discovery
    }

    pub fn descriptor(&self) -> Option<&TileMatrixDescriptor> {
        self.store.discovery.descriptor()
    }

    /// Run `f` with exclusive access to the connection and pools.
    ///
    /// Concurrent sessions on the same store are serialized.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut StoreSession<'_>) -> R) -> R {
        let mut state = self.store.state.lock();
        let StoreState {
            connection,
            pixel_pool,
            int_pool,
        } = &mut *state;

        let connection = match connection.as_ref() {
            Some(connection) => connection,
            None => panic!(
                "store {} used after its connection was closed",
                self.store.path.display()
            ),
        };

        let mut session = StoreSession {
            connection,
            pixel_pool,
            int_pool,
        };
        f(&mut session)
    }

    /// Execute a query and collect its rows.
    pub fn query_rows(&self, spec: &QuerySpec) -> Result<Vec<TileRow>, StoreError> {
        self.with_session(|session| {
            let mut stmt = session.connection.prepare_cached(&spec.sql)?;
            let rows = stmt
                .query_map(params_from_iter(spec.bind_arguments.iter()), |row| {
                    spec.map_row(row)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Pooled `(pixel, int)` buffer counts.
    pub fn pooled_buffers(&self) -> (usize, usize) {
        let state = self.store.state.lock();
        (state.pixel_pool.len(), state.int_pool.len())
    }

    /// Release this reference explicitly.
    pub fn dereference(self) {
        drop(self);
    }
}

impl Clone for StoreHandle {
    fn clone(&self) -> Self {
        let _stores = self.registry.stores.lock();
        let previous = self.store.ref_count.fetch_add(1, Ordering::AcqRel);
        assert!(
            previous > 0,
            "cloned handle for {} after its reference count reached zero",
            self.store.path.display()
        );
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        let mut stores = self.registry.stores.lock();
        let previous = self.store.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(
            previous > 0,
            "dereferenced {} after its reference count reached zero",
            self.store.path.display()
        );
        if previous > 1 {
            return;
        }

        if let Some(registered) = stores.get(&self.store.path) {
            if Arc::ptr_eq(registered, &self.store) {
                stores.remove(&self.store.path);
            }
        }
        drop(stores);

        if self.store.close() {
            self.registry.closed.fetch_add(1, Ordering::Relaxed);
            info!("Closed tile store {}", self.store.path.display());
        }
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("path", &self.store.path)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
