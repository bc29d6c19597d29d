//! Bounded packet channel over pooled buffers.
//!
//! Senders never block: a send on a full channel fails with
//! [`ChannelError::Full`] and a send after close with
//! [`ChannelError::Closed`]. Receivers copy the bytes out and return the
//! backing buffer to the pool before the call returns, so no pooled buffer
//! is ever held by a consumer. The internal lock is never held across an
//! await point.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{ChannelError, Result};
use crate::pool::{BufferPool, DEFAULT_BUFFER_CAPACITY};

struct ChannelState {
    queue: VecDeque<Vec<u8>>,
    closed: bool,
}

/// A bounded ordered channel of byte packets with pooled backing buffers.
pub struct PacketChannel {
    state: Mutex<ChannelState>,
    notify: Notify,
    pool: BufferPool,
    capacity: usize,
}

impl PacketChannel {
    /// Create a channel holding at most `capacity` in-flight packets.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            pool: BufferPool::new(DEFAULT_BUFFER_CAPACITY, capacity),
            capacity,
        }
    }

    /// Copy `data` into a pooled buffer and enqueue it without blocking.
    ///
    /// On failure the pooled buffer is returned before the error surfaces;
    /// on success its ownership transfers into the channel.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let mut buffer = self.pool.acquire();
        buffer.extend_from_slice(data);

        {
            let mut state = self.state.lock();
            if state.closed {
                drop(state);
                self.pool.release(buffer);
                return Err(ChannelError::Closed);
            }
            if state.queue.len() >= self.capacity {
                drop(state);
                self.pool.release(buffer);
                return Err(ChannelError::Full);
            }
            state.queue.push_back(buffer);
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Dequeue the next packet, waiting until one is available.
    ///
    /// Remaining packets are still drained after [`close`](Self::close);
    /// `None` is returned only once the channel is closed and empty. The
    /// returned bytes are a copy; the backing buffer is already back in the
    /// pool.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        let notified = self.notify.notified();
        tokio::pin!(notified);

        loop {
            // Register for a wakeup before inspecting state, so a close or
            // send racing with the check cannot be missed.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(buffer) = state.queue.pop_front() {
                    drop(state);
                    let data = buffer.clone();
                    self.pool.release(buffer);
                    return Some(data);
                }
                if state.closed {
                    return None;
                }
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }

    /// Dequeue the next packet without waiting.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        let buffer = self.state.lock().queue.pop_front()?;
        let data = buffer.clone();
        self.pool.release(buffer);
        Some(data)
    }

    /// Close the channel, waking every blocked receiver. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of packets currently in flight.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no packets are in flight.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Maximum number of in-flight packets.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
