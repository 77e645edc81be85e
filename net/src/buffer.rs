//! Pooled I/O buffers.
//!
//! Channels draw their read chunks and frame accumulators from a
//! [`BufferPool`] keyed by a fixed chunk size, bounding allocation under
//! load. The pool is an explicit object passed by reference to the
//! components that need it; its lifetime is testable in isolation. A buffer
//! is owned by exactly one in-flight operation at a time — ownership moves
//! out on `acquire` and back on `release`.

use parking_lot::Mutex;

/// A bounded free-list of fixed-capacity byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    /// Capacity of every buffer handed out.
    chunk_size: usize,
    /// Maximum number of buffers retained for reuse.
    max_pooled: usize,
    /// The free list.
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool handing out buffers of `chunk_size` capacity and
    /// retaining at most `max_pooled` of them.
    pub fn new(chunk_size: usize, max_pooled: usize) -> Self {
        Self {
            chunk_size,
            max_pooled,
            free: Mutex::new(Vec::new()),
        }
    }

    /// The capacity of buffers managed by this pool.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Take a cleared buffer out of the pool, allocating if the free list is
    /// empty.
    pub fn acquire(&self) -> Vec<u8> {
        if let Some(buf) = self.free.lock().pop() {
            return buf;
        }
        Vec::with_capacity(self.chunk_size)
    }

    /// Return a buffer to the pool. Oversized or surplus buffers are dropped
    /// rather than retained.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.chunk_size {
            return;
        }
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    /// Number of buffers currently sitting in the free list.
    pub fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}
