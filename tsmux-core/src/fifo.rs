//! Generic mutex-guarded FIFO buffer.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// An ordered queue of `T`, safe under concurrent push and pop.
///
/// FIFO order is preserved under any interleaving of single-item
/// operations; the multiset of popped values always equals the multiset of
/// pushed values.
#[derive(Debug)]
pub struct FifoBuffer<T> {
    queue: Mutex<VecDeque<T>>,
}

impl<T> FifoBuffer<T> {
    /// Create a new, empty buffer.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        self.queue.lock().push_back(item);
    }

    /// Remove and return the oldest item, or `None` when empty.
    pub fn pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl<T> Default for FifoBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
