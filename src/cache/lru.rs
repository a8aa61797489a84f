//! Bounded LRU store for compressed tiles or whole grids.
//!
//! One store, two granularities (a deployment picks one per store):
//! - tile-grained: [`FrameCache::insert_packets`] / [`FrameCache::retrieve`],
//!   entries keyed by (timestamp, tile row offset, tile col offset), tile
//!   payloads held in [`MemoryPool`] slots, capacity counted in tiles;
//! - whole-grid: [`FrameCache::put`] / [`FrameCache::get`], decompressed
//!   grids keyed by timestamp alone, capacity counted in frames.
//!
//! A single recency list is shared across all keys, so eviction always
//! removes the globally least-recently-touched entry. The recency list is an
//! intrusive doubly linked list over a slab of entries, linked by index.
//!
//! Locking: structural state (index map, recency list, slab) lives under one
//! mutex; hit/miss counters under another. A stats snapshot reads a
//! consistent (hits, misses) pair but is not synchronized with in-flight
//! structural calls, and structural decisions never read the counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, trace};

use crate::codec::cursor::FormatError;
use crate::codec::frame::parse_stream;
use crate::config::{CacheConfig, CacheMode};
use crate::frame::FeatureGrid;
use crate::pool::{BufferHandle, MemoryPool};

/// Cache key: timestamp plus tile position. Whole-grid entries use (0, 0)
/// for the tile position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub timestamp_ns: u64,
    /// Tile row offset in cells.
    pub tile_x: u16,
    /// Tile column offset in cells.
    pub tile_y: u16,
}

impl CacheKey {
    fn frame(timestamp_ns: u64) -> Self {
        Self {
            timestamp_ns,
            tile_x: 0,
            tile_y: 0,
        }
    }
}

/// A retrieved tile: payload copied out of the pool plus the dimensions the
/// codec needs to decode it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTile {
    pub payload: Vec<u8>,
    pub tile_rows: u16,
    pub tile_cols: u16,
}

/// Read-only telemetry snapshot. Counters are monotonic for the cache's
/// lifetime; never use this to drive structural decisions.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_rate: f64,
    pub cache_size: usize,
    pub max_cache_size: usize,
}

enum CacheValue {
    Tile {
        payload: BufferHandle,
        tile_rows: u16,
        tile_cols: u16,
    },
    Grid(FeatureGrid),
}

struct Entry {
    key: CacheKey,
    value: CacheValue,
    prev: u32,
    next: u32,
}

const NIL: u32 = u32::MAX;

/// Structural state: key index + slab-backed recency list.
struct CacheInner {
    map: HashMap<CacheKey, u32>,
    slots: Vec<Option<Entry>>,
    free: Vec<u32>,
    /// Most recently used.
    head: u32,
    /// Least recently used.
    tail: u32,
}

impl CacheInner {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity + 1),
            slots: Vec::with_capacity(capacity + 1),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn entry(&self, idx: u32) -> &Entry {
        self.slots[idx as usize].as_ref().expect("linked slot occupied")
    }

    fn entry_mut(&mut self, idx: u32) -> &mut Entry {
        self.slots[idx as usize].as_mut().expect("linked slot occupied")
    }

    fn unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let e = self.entry(idx);
            (e.prev, e.next)
        };
        if prev != NIL {
            self.entry_mut(prev).next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.entry_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, idx: u32) {
        let old_head = self.head;
        {
            let e = self.entry_mut(idx);
            e.prev = NIL;
            e.next = old_head;
        }
        if old_head != NIL {
            self.entry_mut(old_head).prev = idx;
        } else {
            self.tail = idx;
        }
        self.head = idx;
    }

    /// Move an entry to the most-recently-used position.
    fn promote(&mut self, idx: u32) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    /// Remove an entry entirely, returning its value.
    fn remove(&mut self, idx: u32) -> (CacheKey, CacheValue) {
        self.unlink(idx);
        let entry = self.slots[idx as usize].take().expect("linked slot occupied");
        self.map.remove(&entry.key);
        self.free.push(idx);
        (entry.key, entry.value)
    }

    /// Insert at MRU; returns the value displaced by a same-key overwrite,
    /// if any.
    fn insert(&mut self, key: CacheKey, value: CacheValue) -> Option<CacheValue> {
        let displaced = self.map.get(&key).copied().map(|idx| self.remove(idx).1);

        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(Entry {
                    key,
                    value,
                    prev: NIL,
                    next: NIL,
                });
                idx
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Some(Entry {
                    key,
                    value,
                    prev: NIL,
                    next: NIL,
                }));
                idx
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);
        displaced
    }

    /// Evict the least-recently-used entry.
    fn evict_lru(&mut self) -> Option<(CacheKey, CacheValue)> {
        if self.tail == NIL {
            return None;
        }
        Some(self.remove(self.tail))
    }
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
}

/// Capacity-bounded LRU cache with pool-backed tile payloads.
pub struct FrameCache {
    capacity: usize,
    mode: CacheMode,
    block_size: usize,
    pool: Arc<MemoryPool>,
    inner: Mutex<CacheInner>,
    counters: Mutex<Counters>,
}

impl FrameCache {
    /// Create a cache. `block_size` must match the producer's codec
    /// configuration; it is needed to derive tile column extents when
    /// parsing streams.
    pub fn new(config: CacheConfig, block_size: usize, pool: Arc<MemoryPool>) -> Self {
        Self {
            capacity: config.capacity,
            mode: config.mode,
            block_size,
            pool,
            inner: Mutex::new(CacheInner::new(config.capacity)),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Resident entry count.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a whole decompressed grid keyed by timestamp (whole-grid
    /// mode). A duplicate timestamp overwrites in place and resets the
    /// entry's recency position.
    pub fn put(&self, timestamp_ns: u64, grid: FeatureGrid) {
        let mut reclaimed = Vec::new();
        {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            if let Some(old) = inner.insert(CacheKey::frame(timestamp_ns), CacheValue::Grid(grid)) {
                reclaimed.push(old);
            }
            while inner.len() > self.capacity {
                if let Some((key, value)) = inner.evict_lru() {
                    debug!(timestamp = key.timestamp_ns, "Evicted frame");
                    reclaimed.push(value);
                }
            }
        }
        self.reclaim(reclaimed);
    }

    /// Look up a grid by timestamp. A hit promotes the entry to
    /// most-recently-used.
    pub fn get(&self, timestamp_ns: u64) -> Option<FeatureGrid> {
        let result = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            match inner.map.get(&CacheKey::frame(timestamp_ns)).copied() {
                Some(idx) => {
                    inner.promote(idx);
                    match &inner.entry(idx).value {
                        CacheValue::Grid(grid) => Some(grid.clone()),
                        CacheValue::Tile { .. } => None,
                    }
                }
                None => None,
            }
        };
        self.record(result.is_some());
        result
    }

    /// Parse a compressed stream and insert each tile as an independent
    /// entry keyed by (timestamp, row offset, col offset) (tile mode).
    ///
    /// The stream is parsed fully before any entry is admitted; a malformed
    /// stream fails fast and leaves the cache untouched. Returns the number
    /// of tiles inserted.
    pub fn insert_packets(&self, stream: &[u8]) -> Result<usize, FormatError> {
        let packets = parse_stream(stream, self.block_size)?;

        let mut inserted = 0;
        for packet in &packets {
            for tile in &packet.tiles {
                let key = CacheKey {
                    timestamp_ns: packet.timestamp_ns,
                    tile_x: tile.row_offset,
                    tile_y: tile.col_offset,
                };
                let handle = self.pool.store(tile.payload);

                let mut reclaimed = Vec::new();
                {
                    let mut inner = self.inner.lock().expect("cache lock poisoned");
                    if let Some(old) = inner.insert(
                        key,
                        CacheValue::Tile {
                            payload: handle,
                            tile_rows: tile.tile_rows,
                            tile_cols: tile.tile_cols,
                        },
                    ) {
                        reclaimed.push(old);
                    }
                    while inner.len() > self.capacity {
                        if let Some((evicted_key, value)) = inner.evict_lru() {
                            trace!(
                                timestamp = evicted_key.timestamp_ns,
                                x = evicted_key.tile_x,
                                y = evicted_key.tile_y,
                                "Evicted tile"
                            );
                            reclaimed.push(value);
                        }
                    }
                }
                self.reclaim(reclaimed);
                inserted += 1;
            }
        }

        debug!(
            packets = packets.len(),
            tiles = inserted,
            "Inserted compressed stream"
        );
        Ok(inserted)
    }

    /// Look up one tile (tile mode). A hit promotes the entry and copies the
    /// payload out of the pool.
    pub fn retrieve(&self, timestamp_ns: u64, tile_x: u16, tile_y: u16) -> Option<CachedTile> {
        let result = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            let key = CacheKey {
                timestamp_ns,
                tile_x,
                tile_y,
            };
            match inner.map.get(&key).copied() {
                Some(idx) => {
                    inner.promote(idx);
                    match &inner.entry(idx).value {
                        CacheValue::Tile {
                            payload,
                            tile_rows,
                            tile_cols,
                        } => Some(CachedTile {
                            payload: self.pool.read(payload),
                            tile_rows: *tile_rows,
                            tile_cols: *tile_cols,
                        }),
                        CacheValue::Grid(_) => None,
                    }
                }
                None => None,
            }
        };
        self.record(result.is_some());
        result
    }

    /// hits / (hits + misses); 0.0 when no requests have occurred.
    pub fn hit_rate(&self) -> f64 {
        let counters = self.counters.lock().expect("stats lock poisoned");
        let total = counters.hits + counters.misses;
        if total == 0 {
            return 0.0;
        }
        counters.hits as f64 / total as f64
    }

    /// Telemetry snapshot. The (hits, misses) pair is consistent; the size
    /// field may be off by in-flight structural calls.
    pub fn stats(&self) -> CacheStats {
        let (hits, misses) = {
            let counters = self.counters.lock().expect("stats lock poisoned");
            (counters.hits, counters.misses)
        };
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStats {
            total_hits: hits,
            total_misses: misses,
            hit_rate,
            cache_size: self.len(),
            max_cache_size: self.capacity,
        }
    }

    fn record(&self, hit: bool) {
        let mut counters = self.counters.lock().expect("stats lock poisoned");
        if hit {
            counters.hits += 1;
        } else {
            counters.misses += 1;
        }
    }

    /// Return displaced pool buffers. Runs after the structural lock is
    /// released; the pool has its own lock.
    fn reclaim(&self, values: Vec<CacheValue>) {
        for value in values {
            if let CacheValue::Tile { payload, .. } = value {
                self.pool.deallocate(payload);
            }
        }
    }
}

impl Drop for FrameCache {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().expect("cache lock poisoned");
        for slot in inner.slots.drain(..) {
            if let Some(Entry {
                value: CacheValue::Tile { payload, .. },
                ..
            }) = slot
            {
                self.pool.deallocate(payload);
            }
        }
    }
}
