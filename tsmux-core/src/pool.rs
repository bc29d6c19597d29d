//! Pooled byte buffers for the packet transport.
//!
//! Buffer ownership is linear: a buffer is in the pool, in flight through a
//! channel, or owned by exactly one task. Reacquiring a buffer resets its
//! length to zero but keeps its capacity.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Default capacity of a pooled buffer in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048;

struct PoolInner {
    available: VecDeque<Vec<u8>>,
    buffer_capacity: usize,
    max_size: usize,
    total_allocated: usize,
}

/// A shared free-list of reusable byte buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl BufferPool {
    /// Create a pool of buffers with the given capacity, retaining at most
    /// `max_size` idle buffers.
    pub fn new(buffer_capacity: usize, max_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                available: VecDeque::with_capacity(max_size),
                buffer_capacity,
                max_size,
                total_allocated: 0,
            })),
        }
    }

    /// Create a pool with the default 2048-byte buffers.
    pub fn with_default_capacity(max_size: usize) -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, max_size)
    }

    /// Take a buffer from the pool, allocating when none is idle.
    ///
    /// The returned buffer is empty.
    pub fn acquire(&self) -> Vec<u8> {
        let mut inner = self.inner.lock();
        match inner.available.pop_front() {
            Some(mut buffer) => {
                buffer.clear();
                buffer
            }
            None => {
                inner.total_allocated += 1;
                Vec::with_capacity(inner.buffer_capacity)
            }
        }
    }

    /// Return a buffer to the pool.
    ///
    /// Buffers beyond the retained maximum, or that shrank below the pool's
    /// capacity, are dropped.
    pub fn release(&self, buffer: Vec<u8>) {
        let mut inner = self.inner.lock();
        if inner.available.len() < inner.max_size && buffer.capacity() >= inner.buffer_capacity {
            inner.available.push_back(buffer);
        }
    }

    /// Number of idle buffers.
    pub fn available(&self) -> usize {
        self.inner.lock().available.len()
    }

    /// Total buffers allocated over the pool's lifetime.
    pub fn total_allocated(&self) -> usize {
        self.inner.lock().total_allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_allocates() {
        let pool = BufferPool::new(1024, 4);
        let buffer = pool.acquire();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.capacity() >= 1024);
        assert_eq!(pool.total_allocated(), 1);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_release_and_reuse() {
        let pool = BufferPool::new(1024, 4);
        let mut buffer = pool.acquire();
        buffer.extend_from_slice(b"payload");
        pool.release(buffer);
        assert_eq!(pool.available(), 1);

        let buffer = pool.acquire();
        assert_eq!(buffer.len(), 0, "reacquired buffer must be empty");
        assert_eq!(pool.total_allocated(), 1, "buffer must be reused");
    }

    #[test]
    fn test_max_size_bound() {
        let pool = BufferPool::new(64, 2);
        let buffers: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        for buffer in buffers {
            pool.release(buffer);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_shared_across_clones() {
        let pool = BufferPool::with_default_capacity(4);
        let pool2 = pool.clone();

        let buffer = pool.acquire();
        pool2.release(buffer);
        assert_eq!(pool.available(), 1);
    }
}
