//! Shared, reference-counted tile store handles.
//!
//! - [`registry`] - Process-wide path-to-connection registry
//! - [`pool`] - Bounded decode buffer pools carried by each store

pub mod pool;
pub mod registry;

pub use pool::{BufferPool, Recycled, DEFAULT_POOL_CAPACITY};
pub use registry::{StoreHandle, StoreRegistry, StoreSession};
