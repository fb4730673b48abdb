use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::pooled_chunk::{ChunkRecycler, PooledChunk};

/// A free-list pool of reusable `BytesMut` allocations.
///
/// Acquiring prefers the smallest free block that already satisfies the
/// requested capacity, to avoid handing out an oversized block to a small
/// request and starving larger ones. Releasing clears and returns the
/// block to the free list rather than dropping it.
#[derive(Clone)]
pub struct ChunkPool {
    inner: Arc<PoolInner>,
}

impl Default for ChunkPool {
    fn default() -> Self {
        Self { inner: Arc::new(PoolInner::new()) }
    }
}

impl ChunkPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leases a buffer with at least `min_capacity` bytes of headroom.
    pub fn acquire(&self, min_capacity: usize) -> PooledChunk {
        let buffer = self.inner.acquire_buffer(min_capacity);
        let recycler: Arc<dyn ChunkRecycler> = self.inner.clone();
        PooledChunk::new(buffer, recycler)
    }

    /// Drops every free block, returning the number of bytes reclaimed.
    /// Useful after a large external-payload transfer to avoid holding a
    /// single oversized block in the free list indefinitely.
    pub fn shrink_to_fit(&self) -> usize {
        self.inner.shrink_free_list()
    }

    pub fn statistics(&self) -> PoolStats {
        self.inner.snapshot()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub allocated_bytes: usize,
    pub available_bytes: usize,
    pub active_leases: usize,
    pub free_slots: usize,
}

struct PoolInner {
    free_list: Mutex<Vec<BytesMut>>,
    allocated_bytes: AtomicUsize,
    available_bytes: AtomicUsize,
    active_leases: AtomicU64,
}

impl PoolInner {
    fn new() -> Self {
        Self {
            free_list: Mutex::new(Vec::new()),
            allocated_bytes: AtomicUsize::new(0),
            available_bytes: AtomicUsize::new(0),
            active_leases: AtomicU64::new(0),
        }
    }

    fn acquire_buffer(&self, min_capacity: usize) -> BytesMut {
        let reused = {
            let mut list = self.free_list.lock();
            list.iter()
                .position(|buf| buf.capacity() >= min_capacity)
                .map(|index| list.swap_remove(index))
        };

        let buffer = match reused {
            Some(mut buf) => {
                self.available_bytes.fetch_sub(buf.capacity(), Ordering::Relaxed);
                buf.clear();
                buf
            }
            None => {
                let buf = BytesMut::with_capacity(min_capacity);
                self.allocated_bytes.fetch_add(buf.capacity(), Ordering::Relaxed);
                buf
            }
        };
        self.active_leases.fetch_add(1, Ordering::Relaxed);
        buffer
    }

    fn shrink_free_list(&self) -> usize {
        let mut list = self.free_list.lock();
        let reclaimed: usize = list.iter().map(BytesMut::capacity).sum();
        list.clear();
        self.available_bytes.fetch_sub(reclaimed, Ordering::Relaxed);
        self.allocated_bytes.fetch_sub(reclaimed, Ordering::Relaxed);
        reclaimed
    }

    fn snapshot(&self) -> PoolStats {
        let free_slots = self.free_list.lock().len();
        PoolStats {
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            available_bytes: self.available_bytes.load(Ordering::Relaxed),
            active_leases: self.active_leases.load(Ordering::Relaxed) as usize,
            free_slots,
        }
    }
}

impl ChunkRecycler for PoolInner {
    fn reclaim(&self, buffer: BytesMut) {
        self.active_leases.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| Some(prev.saturating_sub(1))).ok();
        let capacity = buffer.capacity();
        self.available_bytes.fetch_add(capacity, Ordering::Relaxed);
        self.free_list.lock().push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reused_capacity_returns_to_the_free_list() {
        let pool = ChunkPool::new();
        {
            let mut chunk = pool.acquire(64);
            assert!(chunk.capacity() >= 64);
            chunk.extend_from_slice(&[1, 2, 3, 4]);
        }
        let snapshot = pool.statistics();
        assert_eq!(snapshot.free_slots, 1);
        assert!(snapshot.available_bytes >= 64);

        let before = pool.statistics().allocated_bytes;
        {
            let _second = pool.acquire(16);
        }
        let after = pool.statistics().allocated_bytes;
        assert_eq!(before, after, "reuse of a free block must not grow allocated_bytes");
    }

    #[test]
    fn split_frozen_yields_exactly_the_written_bytes() {
        let pool = ChunkPool::new();
        let mut chunk = pool.acquire(8);
        chunk.extend_from_slice(b"hello");
        let frozen = chunk.split_frozen();
        assert_eq!(&frozen[..], b"hello");
        assert_eq!(chunk.len(), 0);
    }

    #[test]
    fn shrink_to_fit_drains_the_free_list() {
        let pool = ChunkPool::new();
        {
            let _chunk = pool.acquire(128);
        }
        assert_eq!(pool.statistics().free_slots, 1);
        let reclaimed = pool.shrink_to_fit();
        assert!(reclaimed >= 128);
        assert_eq!(pool.statistics().free_slots, 0);
    }
}
