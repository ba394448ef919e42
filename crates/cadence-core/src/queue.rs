//! Deadline and frame-callback bookkeeping shared by the host event loops.
//!
//! The queues only store and hand back callbacks; deciding *when* to fire
//! them (real sleeps vs. a virtual clock) is the host's business.

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

use ahash::RandomState;
use hashbrown::HashSet;

use crate::platform::{FrameCallback, FrameCallbackHandle, TimeoutCallback, TimeoutHandle};

fn to_micros(ms: f64) -> u64 {
    (ms.max(0.0) * 1_000.0).round() as u64
}

struct TimerEntry {
    deadline_us: u64,
    id: u64,
    callback: TimeoutCallback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_us == other.deadline_us && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline_us, self.id).cmp(&(other.deadline_us, other.id))
    }
}

/// Min-heap of pending timeouts with O(1) cancellation.
///
/// Canceled entries stay in the heap and are discarded lazily when they
/// reach the top, so `cancel` never reshuffles the heap.
pub struct TimerQueue {
    heap: RefCell<BinaryHeap<Reverse<TimerEntry>>>,
    live: RefCell<HashSet<u64, RandomState>>,
    canceled: RefCell<HashSet<u64, RandomState>>,
    next_id: Cell<u64>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: RefCell::new(BinaryHeap::new()),
            live: RefCell::new(HashSet::default()),
            canceled: RefCell::new(HashSet::default()),
            next_id: Cell::new(1),
        }
    }

    /// Queues `callback` to fire at the absolute time `deadline_ms`.
    pub fn insert(&self, callback: TimeoutCallback, deadline_ms: f64) -> TimeoutHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.heap.borrow_mut().push(Reverse(TimerEntry {
            deadline_us: to_micros(deadline_ms),
            id,
            callback,
        }));
        self.live.borrow_mut().insert(id);
        TimeoutHandle(id)
    }

    /// No-op if the entry already fired or was canceled.
    pub fn cancel(&self, handle: TimeoutHandle) {
        if self.live.borrow_mut().remove(&handle.0) {
            self.canceled.borrow_mut().insert(handle.0);
        }
    }

    /// Earliest pending deadline in milliseconds, ignoring canceled entries.
    pub fn next_deadline_ms(&self) -> Option<f64> {
        let mut heap = self.heap.borrow_mut();
        loop {
            let (deadline_us, id) = match heap.peek() {
                Some(Reverse(entry)) => (entry.deadline_us, entry.id),
                None => return None,
            };
            if self.canceled.borrow_mut().remove(&id) {
                heap.pop();
                continue;
            }
            return Some(deadline_us as f64 / 1_000.0);
        }
    }

    /// Removes and returns the earliest entry due at or before `now_ms`,
    /// as `(deadline_ms, callback)`.
    pub fn pop_due(&self, now_ms: f64) -> Option<(f64, TimeoutCallback)> {
        let now_us = to_micros(now_ms);
        let mut heap = self.heap.borrow_mut();
        loop {
            let entry = match heap.pop() {
                Some(Reverse(entry)) => entry,
                None => return None,
            };
            if self.canceled.borrow_mut().remove(&entry.id) {
                continue;
            }
            if entry.deadline_us <= now_us {
                self.live.borrow_mut().remove(&entry.id);
                return Some((entry.deadline_us as f64 / 1_000.0, entry.callback));
            }
            heap.push(Reverse(entry));
            return None;
        }
    }

    /// Number of pending (not yet fired, not canceled) timeouts.
    pub fn len(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.borrow().is_empty()
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct FrameEntry {
    id: u64,
    callback: FrameCallback,
}

/// FIFO queue of before-next-paint callbacks.
///
/// Draining takes a snapshot of the current batch, so callbacks scheduled
/// while draining run on the following frame, not the current one.
pub struct FrameQueue {
    queue: RefCell<VecDeque<FrameEntry>>,
    next_id: Cell<u64>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn insert(&self, callback: FrameCallback) -> FrameCallbackHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.queue.borrow_mut().push_back(FrameEntry { id, callback });
        FrameCallbackHandle(id)
    }

    /// No-op if the entry already fired or was canceled.
    pub fn cancel(&self, handle: FrameCallbackHandle) {
        let mut queue = self.queue.borrow_mut();
        if let Some(index) = queue.iter().position(|entry| entry.id == handle.0) {
            queue.remove(index);
        }
    }

    /// Runs the current batch of callbacks with `frame_time_ms`, returning
    /// how many ran.
    pub fn drain(&self, frame_time_ms: f64) -> usize {
        let batch: Vec<FrameEntry> = self.queue.borrow_mut().drain(..).collect();
        let count = batch.len();
        for entry in batch {
            (entry.callback)(frame_time_ms);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}
