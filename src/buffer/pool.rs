//! Bounded pool of fixed-size byte blocks.
//!
//! # Responsibilities
//! - Hand out blocks of one fixed size to every worker thread
//! - Reuse released blocks instead of reallocating them
//! - Degrade to plain heap blocks once `max_buffers` pooled blocks exist
//!
//! # Design Decisions
//! - Release performs no ownership check: any pooled block goes back to
//!   the free list, and releasing a non-pooled block is a no-op
//! - The free list is a lock-free `ArrayQueue` sized to `max_buffers`,
//!   so a pooled block always fits back in

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::ArrayQueue;

/// A block of memory handed out by a [`BufferPool`].
#[derive(Debug)]
pub struct Block {
    data: Box<[u8]>,
    pooled: bool,
}

impl Block {
    fn new(size: usize, pooled: bool) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            pooled,
        }
    }

    /// Whether this block counts against the pool and returns to it.
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Thread-safe pool of fixed-size blocks.
#[derive(Debug)]
pub struct BufferPool {
    free: ArrayQueue<Box<[u8]>>,
    buffer_size: usize,
    min_buffers: usize,
    max_buffers: usize,
    /// Pooled blocks ever allocated. Never exceeds `max_buffers`.
    allocated: AtomicUsize,
    /// Pooled blocks currently lent out.
    in_use: AtomicUsize,
}

impl BufferPool {
    /// Create a pool and pre-allocate `min_buffers` blocks.
    ///
    /// `max_buffers` is raised to at least 1 and `min_buffers` is capped at
    /// `max_buffers`; validated configs never need either adjustment.
    pub fn new(min_buffers: usize, max_buffers: usize, buffer_size: usize) -> Self {
        let max_buffers = max_buffers.max(1);
        let min_buffers = min_buffers.min(max_buffers);
        let pool = Self {
            free: ArrayQueue::new(max_buffers),
            buffer_size,
            min_buffers,
            max_buffers,
            allocated: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        };

        for _ in 0..min_buffers {
            pool.allocated.fetch_add(1, Ordering::Relaxed);
            // Capacity is max_buffers >= min_buffers, so this cannot fail.
            let _ = pool.free.push(vec![0u8; buffer_size].into_boxed_slice());
        }

        tracing::debug!(
            min_buffers,
            max_buffers,
            buffer_size,
            "Buffer pool initialized"
        );
        pool
    }

    /// Take a block: from the free list, else a new pooled allocation while
    /// under `max_buffers`, else a non-pooled fallback. Never blocks or fails.
    pub fn take(&self) -> Block {
        if let Some(data) = self.free.pop() {
            self.in_use.fetch_add(1, Ordering::Relaxed);
            return Block { data, pooled: true };
        }

        if self.try_reserve_allocation() {
            self.in_use.fetch_add(1, Ordering::Relaxed);
            return Block::new(self.buffer_size, true);
        }

        tracing::trace!(
            max_buffers = self.max_buffers,
            "Buffer pool exhausted, allocating unpooled block"
        );
        Block::new(self.buffer_size, false)
    }

    /// Return a block. Non-pooled blocks are simply dropped.
    pub fn release(&self, block: Block) {
        if !block.pooled {
            return;
        }
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if self.free.push(block.data).is_err() {
            // Only reachable when a caller releases more pooled blocks than
            // were allocated; forget the excess rather than grow the pool.
            self.allocated.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn try_reserve_allocation(&self) -> bool {
        let mut current = self.allocated.load(Ordering::Relaxed);
        loop {
            if current >= self.max_buffers {
                return false;
            }
            match self.allocated.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn min_buffers(&self) -> usize {
        self.min_buffers
    }

    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    /// Pooled blocks allocated so far.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Pooled blocks currently taken and not yet released.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Idle pooled blocks ready to be taken.
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn preallocates_min_buffers() {
        let pool = BufferPool::new(3, 8, 16);
        assert_eq!(pool.allocated(), 3);
        assert_eq!(pool.available(), 3);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn reuses_released_blocks() {
        let pool = BufferPool::new(1, 2, 16);
        let block = pool.take();
        assert!(block.is_pooled());
        assert_eq!(block.len(), 16);
        assert_eq!(pool.in_use(), 1);

        pool.release(block);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 1);

        let _again = pool.take();
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn exhaustion_falls_back_to_unpooled() {
        let pool = BufferPool::new(0, 2, 32);
        let a = pool.take();
        let b = pool.take();
        let c = pool.take();

        assert!(a.is_pooled());
        assert!(b.is_pooled());
        assert!(!c.is_pooled());
        assert_eq!(c.len(), 32);
        assert_eq!(pool.allocated(), 2);

        pool.release(c);
        assert_eq!(pool.available(), 0);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn concurrent_use_never_exceeds_max() {
        let pool = Arc::new(BufferPool::new(2, 16, 64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let a = pool.take();
                        let b = pool.take();
                        assert!(pool.allocated() <= 16);
                        pool.release(a);
                        pool.release(b);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.allocated() <= 16);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), pool.allocated());
    }
}
