//! Pooled chunk buffers used by the connection handler's literal reader
//! and by the part streamer when it spills a payload to an external file.
//!
//! [`ChunkPool`] hands out [`PooledChunk`]s backed by [`bytes::BytesMut`].
//! On drop, a chunk returns its capacity to a free list instead of letting
//! the allocator reclaim it, which matters on a long-lived broker process
//! handling many short-lived client connections: without pooling, every
//! new connection's literal buffer is a fresh heap allocation.

mod pool;
mod pooled_chunk;

pub use pool::{ChunkPool, PoolStats};
pub use pooled_chunk::PooledChunk;
