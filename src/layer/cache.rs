//! Versioned zoom-level cache.
//!
//! Holds the decoded tiles a renderer draws from. The cache is owned by
//! the render thread; the worker never touches it directly and instead
//! posts whole result sets through the render queue.
//!
//! # Versions
//!
//! Every published set carries the version stamp of the request that
//! produced it. Publishing swaps the set in atomically: older entries are
//! dropped and only entries stamped with the published version are
//! drawable. A set older than the published version is rejected.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the byte size of decoded pixels and evicts
//! least-recently-used entries when the byte budget is exceeded.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::debug;

use crate::mosaic::TileAddress;
use crate::tile::TileImage;

/// Default byte budget: 64MB
pub const DEFAULT_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 4_096;

/// One decoded tile.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub address: TileAddress,
    pub pixels: TileImage,
    pub version: u64,
}

/// Decoded tiles for the zoom level currently drawn.
pub struct ZoomLevelCache {
    entries: LruCache<TileAddress, CacheEntry>,
    max_bytes: usize,
    current_bytes: usize,
    published_version: Option<u64>,
    zoom_index: Option<usize>,
    publications: u64,
}

impl ZoomLevelCache {
    /// Create a cache with the given byte budget.
    pub fn new(max_bytes: usize) -> Self {
        Self::with_capacity_and_entries(max_bytes, DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache with a byte budget and an entry limit.
    pub fn with_capacity_and_entries(max_bytes: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(max_entries),
            max_bytes,
            current_bytes: 0,
            published_version: None,
            zoom_index: None,
            publications: 0,
        }
    }

    /// Swap in a completed result set.
    ///
    /// Returns false, leaving the cache untouched, if `version` is older
    /// than the published version.
    pub fn publish(
        &mut self,
        version: u64,
        zoom_index: usize,
        tiles: Vec<(TileAddress, TileImage)>,
    ) -> bool {
        if let Some(published) = self.published_version {
            if version < published {
                debug!(
                    "Rejected stale result set v{} (published v{})",
                    version, published
                );
                return false;
            }
        }

        self.clear_entries();
        for (address, pixels) in tiles {
            self.insert(CacheEntry {
                address,
                pixels,
                version,
            });
        }

        self.published_version = Some(version);
        self.zoom_index = Some(zoom_index);
        self.publications += 1;
        debug!(
            "Published v{} at zoom index {} ({} tiles, {} bytes)",
            version,
            zoom_index,
            self.entries.len(),
            self.current_bytes
        );
        true
    }

    fn insert(&mut self, entry: CacheEntry) {
        let size = entry.pixels.byte_len();
        if let Some(old) = self.entries.pop(&entry.address) {
            self.current_bytes = self.current_bytes.saturating_sub(old.pixels.byte_len());
        }
        // The key is absent now, so anything returned is an LRU eviction.
        if let Some((_, evicted)) = self.entries.push(entry.address, entry) {
            self.current_bytes = self.current_bytes.saturating_sub(evicted.pixels.byte_len());
        }
        self.current_bytes += size;

        while self.current_bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, evicted)) => {
                    self.current_bytes =
                        self.current_bytes.saturating_sub(evicted.pixels.byte_len())
                }
                None => break,
            }
        }
    }

    /// Entries stamped with the published version.
    pub fn drawable(&self) -> impl Iterator<Item = &CacheEntry> {
        let version = self.published_version;
        self.entries
            .iter()
            .map(|(_, entry)| entry)
            .filter(move |entry| Some(entry.version) == version)
    }

    /// Look up a tile, marking it recently used.
    pub fn get(&mut self, address: &TileAddress) -> Option<&CacheEntry> {
        self.entries.get(address)
    }

    pub fn contains(&self, address: &TileAddress) -> bool {
        self.entries.contains(address)
    }

    /// Latest published version; the draw version.
    pub fn published_version(&self) -> Option<u64> {
        self.published_version
    }

    /// Zoom chain index of the published set.
    pub fn zoom_index(&self) -> Option<usize> {
        self.zoom_index
    }

    /// Number of accepted publications.
    pub fn publications(&self) -> u64 {
        self.publications
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current total size of cached pixels in bytes.
    pub fn size(&self) -> usize {
        self.current_bytes
    }

    pub fn capacity(&self) -> usize {
        self.max_bytes
    }

    fn clear_entries(&mut self) {
        self.entries.clear();
        self.current_bytes = 0;
    }

    /// Drop every entry. The published version is kept so older result
    /// sets still cannot be published afterwards.
    pub fn clear(&mut self) {
        self.clear_entries();
        self.zoom_index = None;
    }
}

impl Default for ZoomLevelCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTES)
    }
}

// =============================================================================
// Tests
// =============================================================================
