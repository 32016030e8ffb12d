//! Bounded buffer pools.
//!
//! Pools hold decode buffers between reads so a reader does not allocate
//! a fresh buffer per tile. They are plain containers: access is
//! serialized by the owning store's session lock.

use std::collections::VecDeque;

/// Default number of buffers kept per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 1;

/// Outcome of returning a buffer to a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recycled {
    /// The buffer was kept for reuse
    Pooled,

    /// The pool was full and the buffer was freed
    Discarded,
}

/// A bounded pool of reusable buffers.
#[derive(Debug)]
pub struct BufferPool<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BufferPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Take the first pooled buffer accepted by `compatible`.
    ///
    /// Incompatible buffers stay in the pool untouched.
    pub fn borrow_matching<F>(&mut self, compatible: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        let position = self.items.iter().position(compatible)?;
        self.items.remove(position)
    }

    /// Take any pooled buffer.
    pub fn borrow_any(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Return a buffer to the pool.
    pub fn recycle(&mut self, item: T) -> Recycled {
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            Recycled::Pooled
        } else {
            Recycled::Discarded
        }
    }

    /// Free every pooled buffer.
    pub fn drain(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
