//! # Thread-Safe Queue
//!
//! A blocking, mutex-protected double-ended queue. Used both for each
//! connection's private outbound queue and for the inbound queue an
//! orchestrator shares between all of its connections.
//!
//! Every operation holds the lock for its whole duration. [`TsQueue::wait`]
//! parks the calling thread on a condition variable until an item is pushed;
//! it does not poll. The queue is unbounded.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct TsQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Default for TsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TsQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    // The deque holds plain data, so a panic in another holder cannot leave it
    // half-updated; recover the guard instead of propagating the poison.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_back(&self, item: T) {
        self.lock().push_back(item);
        self.ready.notify_one();
    }

    pub fn push_front(&self, item: T) {
        self.lock().push_front(item);
        self.ready.notify_one();
    }

    /// Remove and return the front item, `None` if empty.
    pub fn pop_front(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove and return the back item, `None` if empty.
    pub fn pop_back(&self) -> Option<T> {
        self.lock().pop_back()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Push to the back and report whether the queue was empty beforehand,
    /// as one atomic step.
    pub fn push_back_was_empty(&self, item: T) -> bool {
        let was_empty = {
            let mut items = self.lock();
            let was_empty = items.is_empty();
            items.push_back(item);
            was_empty
        };
        self.ready.notify_one();
        was_empty
    }

    /// Block until the queue holds at least one item.
    pub fn wait(&self) {
        let guard = self.lock();
        let _guard = self
            .ready
            .wait_while(guard, |items| items.is_empty())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }

    /// Block until the queue is non-empty or `timeout` elapses.
    ///
    /// Returns `true` if the queue is non-empty on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while guard.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match self.ready.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

impl<T: Clone> TsQueue<T> {
    /// Clone of the front item.
    pub fn front(&self) -> Option<T> {
        self.lock().front().cloned()
    }

    /// Clone of the back item.
    pub fn back(&self) -> Option<T> {
        self.lock().back().cloned()
    }
}
