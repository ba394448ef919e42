//! Deterministic event loop for driving the engines in tests.
//!
//! [`TestEventLoop`] implements the same capability bundle the real hosts
//! do, but time only moves when a test says so: `advance_by` walks the
//! virtual clock from deadline to deadline, and `bump` models a synchronous
//! callback blocking the thread. Frame callbacks are drained at the same
//! virtual instant the triggering timeout fires, so tick timestamps come out
//! exact.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use cadence_core::queue::{FrameQueue, TimerQueue};
use cadence_core::tasks::LocalTasks;
use cadence_core::{
    EventLoop, EventLoopHandle, FrameCallback, FrameCallbackHandle, TimeoutCallback, TimeoutHandle,
};

struct TestEventLoopInner {
    now_ms: Cell<f64>,
    frames_supported: bool,
    timers: TimerQueue,
    frames: FrameQueue,
    tasks: LocalTasks,
}

/// Virtual-clock capability bundle. Cheap to clone; clones share one clock
/// and one set of queues.
#[derive(Clone)]
pub struct TestEventLoop {
    inner: Rc<TestEventLoopInner>,
}

impl TestEventLoop {
    pub fn new() -> Self {
        Self::with_frame_support(true)
    }

    /// A host without a before-next-paint signal, for exercising the
    /// timeout-substitution path.
    pub fn without_frame_callbacks() -> Self {
        Self::with_frame_support(false)
    }

    fn with_frame_support(frames_supported: bool) -> Self {
        Self {
            inner: Rc::new(TestEventLoopInner {
                now_ms: Cell::new(0.0),
                frames_supported,
                timers: TimerQueue::new(),
                frames: FrameQueue::new(),
                tasks: LocalTasks::new(),
            }),
        }
    }

    /// Shared handle in the shape the engines expect.
    pub fn handle(&self) -> EventLoopHandle {
        Rc::new(self.clone())
    }

    pub fn now_ms(&self) -> f64 {
        self.inner.now_ms.get()
    }

    /// Advances the clock without servicing any queued work, simulating a
    /// synchronous callback that blocks the thread for `ms`.
    pub fn bump(&self, ms: f64) {
        self.inner.now_ms.set(self.inner.now_ms.get() + ms.max(0.0));
    }

    /// Runs the clock forward by `ms`, firing every timeout due in that
    /// window in deadline order and draining frame callbacks and spawned
    /// tasks as it goes.
    pub fn advance_by(&self, ms: f64) {
        self.advance_to(self.inner.now_ms.get() + ms.max(0.0));
    }

    /// Like [`TestEventLoop::advance_by`], but to an absolute timestamp.
    pub fn advance_to(&self, deadline_ms: f64) {
        while let Some(next) = self.inner.timers.next_deadline_ms() {
            if next > deadline_ms {
                break;
            }
            self.fire_next_timeout();
            self.poll_tasks();
        }
        if self.inner.now_ms.get() < deadline_ms {
            self.inner.now_ms.set(deadline_ms);
        }
        self.drain_frames();
        self.poll_tasks();
    }

    /// Fires the earliest pending timeout, moving the clock to its deadline
    /// if that is in the future. Returns false when no timeout is queued.
    pub fn fire_next_timeout(&self) -> bool {
        let deadline = match self.inner.timers.next_deadline_ms() {
            Some(deadline) => deadline,
            None => return false,
        };
        if self.inner.now_ms.get() < deadline {
            self.inner.now_ms.set(deadline);
        }
        if let Some((_, callback)) = self.inner.timers.pop_due(self.inner.now_ms.get()) {
            callback();
        }
        self.drain_frames();
        true
    }

    /// Runs the current batch of frame callbacks at the current virtual
    /// time.
    pub fn drain_frames(&self) {
        self.inner.frames.drain(self.inner.now_ms.get());
    }

    /// Queues `future` on the embedded executor.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) -> u64 {
        self.inner.tasks.spawn(Box::pin(future))
    }

    /// Drops a spawned task. No-op if it already completed.
    pub fn cancel_task(&self, id: u64) {
        self.inner.tasks.cancel(id);
    }

    /// Polls spawned tasks until none of them asks to be woken again.
    pub fn poll_tasks(&self) {
        while self.inner.tasks.take_wake_request() {
            self.inner.tasks.poll_once();
        }
    }

    /// Drives `future` to completion, advancing virtual time deadline by
    /// deadline whenever no task can make progress.
    ///
    /// Panics if the future stalls with no timeout or frame callback
    /// pending.
    pub fn run_until<T: 'static>(&self, future: impl Future<Output = T> + 'static) -> T {
        let slot: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let out = Rc::clone(&slot);
        self.spawn(async move {
            *out.borrow_mut() = Some(future.await);
        });
        loop {
            self.poll_tasks();
            if let Some(value) = slot.borrow_mut().take() {
                return value;
            }
            if self.fire_next_timeout() {
                continue;
            }
            if !self.inner.frames.is_empty() {
                self.drain_frames();
                continue;
            }
            panic!("future stalled: no pending timeouts or frame callbacks");
        }
    }

    /// Timeouts scheduled but neither fired nor canceled.
    pub fn pending_timeouts(&self) -> usize {
        self.inner.timers.len()
    }

    /// Frame callbacks scheduled but neither fired nor canceled.
    pub fn pending_frame_callbacks(&self) -> usize {
        self.inner.frames.len()
    }
}

impl Default for TestEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TestEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestEventLoop")
            .field("now_ms", &self.inner.now_ms.get())
            .field("pending_timeouts", &self.pending_timeouts())
            .field("pending_frame_callbacks", &self.pending_frame_callbacks())
            .finish()
    }
}

impl EventLoop for TestEventLoop {
    fn schedule_timeout(&self, callback: TimeoutCallback, delay_ms: f64) -> TimeoutHandle {
        let deadline = self.inner.now_ms.get() + delay_ms.max(0.0);
        self.inner.timers.insert(callback, deadline)
    }

    fn cancel_timeout(&self, handle: TimeoutHandle) {
        self.inner.timers.cancel(handle);
    }

    fn supports_frame_callbacks(&self) -> bool {
        self.inner.frames_supported
    }

    fn schedule_frame_callback(&self, callback: FrameCallback) -> FrameCallbackHandle {
        self.inner.frames.insert(callback)
    }

    fn cancel_frame_callback(&self, handle: FrameCallbackHandle) {
        self.inner.frames.cancel(handle);
    }

    fn now(&self) -> f64 {
        self.inner.now_ms.get()
    }
}

/// Shared log of labeled calls and their timestamps, for ordering and
/// cadence assertions.
#[derive(Clone, Default)]
pub struct CallRecorder {
    calls: Rc<RefCell<Vec<(&'static str, f64)>>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: &'static str, time_ms: f64) {
        self.calls.borrow_mut().push((label, time_ms));
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.calls.borrow().iter().map(|(label, _)| *label).collect()
    }

    pub fn times_of(&self, label: &'static str) -> Vec<f64> {
        self.calls
            .borrow()
            .iter()
            .filter(|(recorded, _)| *recorded == label)
            .map(|(_, time)| *time)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }
}

/// Sentinel error for failure-path tests; `downcast_ref` against it to
/// assert a callback failure arrived unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestFailure(pub &'static str);

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TestFailure {}
