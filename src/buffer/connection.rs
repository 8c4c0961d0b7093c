//! The buffer pair owned by one client/host connection pair.

use std::sync::Arc;

use crate::buffer::directional::DirectionalBuffer;
use crate::buffer::pool::BufferPool;

/// Upstream carries client → host bytes, downstream host → client.
#[derive(Debug)]
pub struct ConnectionBuffers {
    pub upstream: DirectionalBuffer,
    pub downstream: DirectionalBuffer,
}

impl ConnectionBuffers {
    pub fn new(pool: &Arc<BufferPool>) -> Self {
        Self {
            upstream: DirectionalBuffer::new(Arc::clone(pool)),
            downstream: DirectionalBuffer::new(Arc::clone(pool)),
        }
    }

    /// Return both blocks to the pool.
    pub fn release(&mut self) {
        self.upstream.release();
        self.downstream.release();
    }

    pub fn is_released(&self) -> bool {
        self.upstream.is_released() && self.downstream.is_released()
    }
}
