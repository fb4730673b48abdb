use std::sync::Arc;

use bytes::BytesMut;

/// Notified when a [`PooledChunk`] is dropped, so the issuing pool can
/// recover the underlying allocation.
pub(crate) trait ChunkRecycler: Send + Sync + 'static {
    fn reclaim(&self, buffer: BytesMut);
}

/// A leased, pool-backed buffer. Derefs to [`BytesMut`] for reading and
/// writing; returns its capacity to the pool on drop.
///
/// The buffer is cleared but not released back to the allocator, so the
/// next lease of sufficient size reuses the same heap block.
pub struct PooledChunk {
    buffer: Option<BytesMut>,
    recycler: Arc<dyn ChunkRecycler>,
}

impl PooledChunk {
    pub(crate) fn new(buffer: BytesMut, recycler: Arc<dyn ChunkRecycler>) -> Self {
        Self { buffer: Some(buffer), recycler }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map(BytesMut::capacity).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.buffer.as_ref().map(BytesMut::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `src`, growing the underlying allocation if needed.
    pub fn extend_from_slice(&mut self, src: &[u8]) {
        self.buffer_mut().extend_from_slice(src);
    }

    /// Freezes the written bytes into an owned, shareable `Bytes` and
    /// leaves this chunk empty and ready for further writes.
    pub fn split_frozen(&mut self) -> bytes::Bytes {
        self.buffer_mut().split().freeze()
    }

    fn buffer_mut(&mut self) -> &mut BytesMut {
        self.buffer.as_mut().expect("PooledChunk buffer taken before drop")
    }
}

impl std::ops::Deref for PooledChunk {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.buffer.as_ref().expect("PooledChunk buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledChunk {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buffer_mut()
    }
}

impl Drop for PooledChunk {
    fn drop(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            buffer.clear();
            self.recycler.reclaim(buffer);
        }
    }
}
