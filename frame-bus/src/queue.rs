use std::collections::VecDeque;

use parking_lot::Mutex;

/// Number of buffers a handoff queue holds before it starts evicting.
pub const DEFAULT_CAPACITY: usize = 4;

// larger queues grow on demand
const PREALLOCATE_LIMIT: usize = 64;

/// Bounded, non-blocking FIFO shared between one producer and one consumer thread.
///
/// `put` never blocks: once the queue is full the oldest item is evicted and
/// handed back to the caller, so the caller can release whatever that item
/// owns. The queue itself never drops items it was given.
pub struct BoundedHandoffQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> BoundedHandoffQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(PREALLOCATE_LIMIT) + 1)),
            capacity,
        }
    }

    /// Appends `item`, returning the evicted oldest item when the queue was full.
    #[must_use = "an evicted item must be released by the caller"]
    pub fn put(&self, item: T) -> Option<T> {
        let mut items = self.items.lock();
        items.push_back(item);
        if items.len() > self.capacity {
            items.pop_front()
        } else {
            None
        }
    }

    pub fn get(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Removes every queued item, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for BoundedHandoffQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
