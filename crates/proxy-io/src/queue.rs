use proxy_core::{Priority, PriorityBuffer};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// Priority buffer shared by every session (producers) and the dispatcher
/// (the single consumer).
///
/// `pop_next` parks on a `Notify` while both lanes are empty. Only one task
/// may wait in `pop_next` at a time.
#[derive(Debug)]
pub struct WorkQueue<T> {
    lanes: Mutex<PriorityBuffer<T>>,
    ready: Notify,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(PriorityBuffer::new()),
            ready: Notify::new(),
        }
    }

    fn lanes(&self) -> MutexGuard<'_, PriorityBuffer<T>> {
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Never blocks.
    pub fn push(&self, priority: Priority, item: T) {
        self.lanes().push(priority, item);
        self.ready.notify_one();
    }

    /// Waits for the next entry in priority-then-FIFO order.
    ///
    /// Cancel safe: an entry is only removed in the same poll that returns it.
    pub async fn pop_next(&self) -> (Priority, T) {
        loop {
            let next = self.lanes().pop_next();
            if let Some(next) = next {
                return next;
            }
            self.ready.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<(Priority, T)> {
        self.lanes().pop_next()
    }

    pub fn len(&self) -> usize {
        self.lanes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes().is_empty()
    }

    /// Discards everything still queued.
    pub fn drain(&self) -> Vec<T> {
        self.lanes().drain()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
