//! Blocking frame queue between the capture callback and the worker thread
//!
//! Depth is unbounded; the producer checks its byte budget before pushing.
//! Besides pending items the queue tracks items handed out by `pop` that the
//! consumer has not acknowledged with `task_done` yet, so `wait_for_empty`
//! returns only once every pushed item has been fully processed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    in_flight: usize,
    aborted: bool,
}

impl<T> QueueState<T> {
    fn drained(&self) -> bool {
        self.items.is_empty() && self.in_flight == 0
    }
}

pub struct FrameQueue<T> {
    state: Mutex<QueueState<T>>,
    /// Signaled on push and abort
    not_empty: Condvar,
    /// Signaled when the last in-flight item is acknowledged, and on abort
    drained: Condvar,
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                in_flight: 0,
                aborted: false,
            }),
            not_empty: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    /// Append an item. Never blocks beyond the queue lock.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Block until an item is available. Returns `None` only after `abort`.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                state.in_flight += 1;
                return Some(item);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop), but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                state.in_flight += 1;
                return Some(item);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                // One last look: a push may have raced with the timeout.
                let item = state.items.pop_front();
                if item.is_some() {
                    state.in_flight += 1;
                }
                return item;
            }
        }
    }

    /// Acknowledge an item obtained from `pop` as fully processed.
    pub fn task_done(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        let drained = state.drained();
        drop(state);
        if drained {
            self.drained.notify_all();
        }
    }

    /// Guard calling [`task_done`](Self::task_done) when dropped
    pub fn done_guard(&self) -> DoneGuard<'_, T> {
        DoneGuard { queue: self }
    }

    /// Block until all pushed items were popped and acknowledged, or the
    /// queue is aborted.
    pub fn wait_for_empty(&self) {
        let mut state = self.state.lock();
        while !state.drained() && !state.aborted {
            self.drained.wait(&mut state);
        }
    }

    /// Returns `true` if the queue drained before `timeout` elapsed.
    pub fn wait_for_empty_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.drained() && !state.aborted {
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                return state.drained();
            }
        }
        state.drained()
    }

    /// Drop every pending item and wake all blocked callers. The queue stays
    /// aborted afterwards.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        state.items.clear();
        drop(state);
        self.not_empty.notify_all();
        self.drained.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Number of pending items, not counting in-flight ones
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }
}

pub struct DoneGuard<'a, T> {
    queue: &'a FrameQueue<T>,
}

impl<T> Drop for DoneGuard<'_, T> {
    fn drop(&mut self) {
        self.queue.task_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 5);
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(i));
            queue.task_done();
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_timeout_expires() {
        let queue: FrameQueue<u32> = FrameQueue::new();
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_abort_wakes_blocked_pop() {
        let queue: Arc<FrameQueue<u32>> = Arc::new(FrameQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.abort();
        assert_eq!(consumer.join().unwrap(), None);
        assert!(queue.is_aborted());
    }

    #[test]
    fn test_abort_clears_pending() {
        let queue = FrameQueue::new();
        queue.push(vec![0u8; 16]);
        queue.push(vec![0u8; 16]);
        queue.abort();
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_wait_for_empty_counts_in_flight() {
        let queue: Arc<FrameQueue<u32>> = Arc::new(FrameQueue::new());
        queue.push(1);
        queue.push(2);

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut processed = Vec::new();
                while let Some(item) = queue.pop_timeout(Duration::from_millis(200)) {
                    let _done = queue.done_guard();
                    thread::sleep(Duration::from_millis(10));
                    processed.push(item);
                }
                processed
            })
        };

        queue.wait_for_empty();
        assert!(queue.is_empty());
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(consumer.join().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_wait_for_empty_timeout() {
        let queue = FrameQueue::new();
        assert!(queue.wait_for_empty_timeout(Duration::from_millis(5)));

        queue.push(7u32);
        assert!(!queue.wait_for_empty_timeout(Duration::from_millis(20)));

        assert_eq!(queue.pop(), Some(7));
        assert!(!queue.wait_for_empty_timeout(Duration::from_millis(5)));
        queue.task_done();
        assert!(queue.wait_for_empty_timeout(Duration::from_millis(5)));
    }
}
