//! Fixed-slot memory pool for compressed tile buffers.
//!
//! A slab of contiguous fixed-size slots plus a stack of free slot indices.
//! Construction pre-allocates one arena chunk; when the free stack runs dry
//! the pool grows by another chunk, and chunks are only released when the
//! pool itself is dropped. Requests larger than a slot bypass the pool and
//! fall back to the default allocator, so allocation never fails.
//!
//! The free stack lives under its own mutex, independent of any cache lock.

use std::sync::Mutex;

use tracing::debug;

use crate::config::{ConfigError, PoolConfig};

/// Handle to a buffer serviced by the pool.
///
/// Pooled handles reference a slot by index; oversized requests carry their
/// own heap allocation. Pooled handles must be returned with
/// [`MemoryPool::deallocate`] to reuse the slot.
#[derive(Debug)]
pub enum BufferHandle {
    Pooled { slot: u32, len: u32 },
    Heap(Box<[u8]>),
}

impl BufferHandle {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            BufferHandle::Pooled { len, .. } => *len as usize,
            BufferHandle::Heap(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this handle occupies a pool slot.
    pub fn is_pooled(&self) -> bool {
        matches!(self, BufferHandle::Pooled { .. })
    }
}

struct Slab {
    chunks: Vec<Box<[u8]>>,
    free: Vec<u32>,
}

/// Thread-safe fixed-slot allocator.
pub struct MemoryPool {
    slot_bytes: usize,
    chunk_slots: usize,
    inner: Mutex<Slab>,
}

impl MemoryPool {
    /// Create a pool with one pre-allocated chunk of `chunk_slots` slots.
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        if config.slot_bytes == 0 || config.chunk_slots == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }

        let pool = Self {
            slot_bytes: config.slot_bytes,
            chunk_slots: config.chunk_slots,
            inner: Mutex::new(Slab {
                chunks: Vec::new(),
                free: Vec::new(),
            }),
        };
        pool.grow(&mut pool.inner.lock().expect("pool lock poisoned"));
        Ok(pool)
    }

    /// Payload capacity of one slot.
    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    /// Allocate a zeroed buffer of `size` bytes.
    ///
    /// Oversized requests bypass the pool entirely; pooled requests pop the
    /// free stack, growing by one chunk when it is empty.
    pub fn allocate(&self, size: usize) -> BufferHandle {
        if size > self.slot_bytes {
            return BufferHandle::Heap(vec![0u8; size].into_boxed_slice());
        }

        let mut slab = self.inner.lock().expect("pool lock poisoned");
        let slot = self.pop_free(&mut slab);
        BufferHandle::Pooled {
            slot,
            len: size as u32,
        }
    }

    /// Allocate and fill a buffer with `data`.
    pub fn store(&self, data: &[u8]) -> BufferHandle {
        if data.len() > self.slot_bytes {
            return BufferHandle::Heap(data.to_vec().into_boxed_slice());
        }

        let mut slab = self.inner.lock().expect("pool lock poisoned");
        let slot = self.pop_free(&mut slab);
        let (chunk, offset) = self.locate(slot);
        slab.chunks[chunk][offset..offset + data.len()].copy_from_slice(data);
        BufferHandle::Pooled {
            slot,
            len: data.len() as u32,
        }
    }

    /// Copy a buffer's payload out.
    pub fn read(&self, handle: &BufferHandle) -> Vec<u8> {
        match handle {
            BufferHandle::Heap(buf) => buf.to_vec(),
            BufferHandle::Pooled { slot, len } => {
                let slab = self.inner.lock().expect("pool lock poisoned");
                let (chunk, offset) = self.locate(*slot);
                slab.chunks[chunk][offset..offset + *len as usize].to_vec()
            }
        }
    }

    /// Return a buffer to the pool. Heap buffers simply drop.
    pub fn deallocate(&self, handle: BufferHandle) {
        if let BufferHandle::Pooled { slot, .. } = handle {
            let mut slab = self.inner.lock().expect("pool lock poisoned");
            slab.free.push(slot);
        }
    }

    /// Free slots currently on the stack.
    pub fn free_slots(&self) -> usize {
        self.inner.lock().expect("pool lock poisoned").free.len()
    }

    /// Total slots across all chunks.
    pub fn total_slots(&self) -> usize {
        self.inner.lock().expect("pool lock poisoned").chunks.len() * self.chunk_slots
    }

    fn pop_free(&self, slab: &mut Slab) -> u32 {
        if slab.free.is_empty() {
            self.grow(slab);
        }
        slab.free.pop().expect("free stack refilled by grow")
    }

    fn grow(&self, slab: &mut Slab) {
        let base = (slab.chunks.len() * self.chunk_slots) as u32;
        slab.chunks
            .push(vec![0u8; self.chunk_slots * self.slot_bytes].into_boxed_slice());
        slab.free.extend(base..base + self.chunk_slots as u32);
        debug!(
            chunks = slab.chunks.len(),
            slots = slab.chunks.len() * self.chunk_slots,
            "Pool grew by one chunk"
        );
    }

    fn locate(&self, slot: u32) -> (usize, usize) {
        let chunk = slot as usize / self.chunk_slots;
        let offset = (slot as usize % self.chunk_slots) * self.slot_bytes;
        (chunk, offset)
    }
}
