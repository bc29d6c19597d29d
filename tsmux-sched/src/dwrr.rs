//! Deficit Weighted Round Robin scheduler.
//!
//! Unlike textbook DWRR there is no separate deficit counter: the residual
//! quantum *is* the deficit. After each cycle `quantum[i]` equals the items
//! left in queue `i`, and an enqueue resets it to the post-append length, so
//! the carried deficit and the newly arrived items collapse into one number.

use std::collections::VecDeque;

use parking_lot::Mutex;

struct DwrrInner<T> {
    queues: Vec<VecDeque<T>>,
    quantums: Vec<usize>,
}

/// A Deficit Weighted Round Robin scheduler over queues of `T`.
///
/// All mutators are atomic under a single internal lock. No queue yields
/// more than `max_take` items per cycle, bounding head-of-line blocking.
pub struct Dwrr<T> {
    inner: Mutex<DwrrInner<T>>,
    max_take: usize,
}

impl<T> Dwrr<T> {
    /// Create a scheduler with `count` empty queues, each with quantum 1.
    pub fn new(count: usize, max_take: usize) -> Self {
        Self {
            inner: Mutex::new(DwrrInner {
                queues: (0..count).map(|_| VecDeque::new()).collect(),
                quantums: vec![1; count],
            }),
            max_take,
        }
    }

    /// Per-cycle take bound.
    pub fn max_take(&self) -> usize {
        self.max_take
    }

    /// Number of queues.
    pub fn queue_count(&self) -> usize {
        self.inner.lock().queues.len()
    }

    /// Append an empty queue with quantum 0.
    pub fn add_queue(&self) {
        let mut inner = self.inner.lock();
        inner.queues.push(VecDeque::new());
        inner.quantums.push(0);
    }

    /// Drop the last queue; no-op when none remain.
    pub fn remove_queue(&self) {
        let mut inner = self.inner.lock();
        inner.queues.pop();
        inner.quantums.pop();
    }

    /// Append `items` to queue `index` and reset its quantum to the new
    /// queue length, folding any residual deficit into the weight.
    pub fn enqueue(&self, index: usize, items: impl IntoIterator<Item = T>) {
        let mut inner = self.inner.lock();
        inner.queues[index].extend(items);
        inner.quantums[index] = inner.queues[index].len();
    }

    /// Remove and return the head of queue `index`, decrementing its
    /// quantum; `None` when the queue is empty.
    pub fn dequeue(&self, index: usize) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.queues[index].pop_front()?;
        inner.quantums[index] = inner.quantums[index].saturating_sub(1);
        Some(item)
    }

    /// Empty queue `index`, resetting its quantum to 0, and return the
    /// drained items.
    pub fn dequeue_all(&self, index: usize) -> Vec<T> {
        let mut inner = self.inner.lock();
        inner.quantums[index] = 0;
        inner.queues[index].drain(..).collect()
    }

    /// Run one scheduling cycle.
    ///
    /// Each queue yields `min(quantum, len, max_take)` items in FIFO order;
    /// its quantum becomes the residue. Empty queues yield an empty slot
    /// and have their quantum set to 1 so a refill gets a baseline share.
    pub fn do_cycle(&self) -> Vec<Vec<T>> {
        let mut inner = self.inner.lock();
        let count = inner.queues.len();
        let mut result = Vec::with_capacity(count);

        for i in 0..count {
            let len = inner.queues[i].len();
            if len == 0 {
                inner.quantums[i] = 1;
                result.push(Vec::new());
                continue;
            }

            let take = inner.quantums[i].min(len).min(self.max_take);
            let batch: Vec<T> = inner.queues[i].drain(..take).collect();
            inner.quantums[i] = len - take;
            result.push(batch);
        }

        result
    }

    /// Current length of queue `index`.
    pub fn len(&self, index: usize) -> usize {
        self.inner.lock().queues[index].len()
    }

    /// Whether every queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queues.iter().all(VecDeque::is_empty)
    }
}
