//! Standard event loop backed by Rust's `std` library.
//!
//! [`StdEventLoop`] implements the capability bundle over
//! [`std::time::Instant`] and a sleeping pump, so the engines run on plain
//! threads with no render loop. There is no real paint signal here: frame
//! callbacks are drained on a fixed cadence (roughly 60 Hz by default),
//! which stands in for vsync the way the bundle's fallback contract expects.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use cadence_core::queue::{FrameQueue, TimerQueue};
use cadence_core::tasks::LocalTasks;
use cadence_core::{
    EventLoop, EventLoopHandle, FrameCallback, FrameCallbackHandle, TimeoutCallback, TimeoutHandle,
};

/// Default spacing between frame-callback drains, in milliseconds.
pub const DEFAULT_FRAME_INTERVAL_MS: f64 = 1000.0 / 60.0;

struct StdEventLoopInner {
    origin: Instant,
    frame_interval_ms: Cell<f64>,
    last_frame_at_ms: Cell<f64>,
    timers: TimerQueue,
    frames: FrameQueue,
    tasks: LocalTasks,
}

/// Instant-backed capability bundle with a blocking pump. Cheap to clone;
/// clones share one clock and one set of queues.
#[derive(Clone)]
pub struct StdEventLoop {
    inner: Rc<StdEventLoopInner>,
}

impl StdEventLoop {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StdEventLoopInner {
                origin: Instant::now(),
                frame_interval_ms: Cell::new(DEFAULT_FRAME_INTERVAL_MS),
                last_frame_at_ms: Cell::new(f64::NEG_INFINITY),
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

    /// Replaces the frame-drain cadence. Non-finite or non-positive values
    /// are ignored.
    pub fn set_frame_interval_ms(&self, ms: f64) {
        if ms.is_finite() && ms > 0.0 {
            self.inner.frame_interval_ms.set(ms);
        } else {
            log::warn!("ignoring invalid frame interval {ms}ms");
        }
    }

    /// Queues `future` on the embedded executor.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) -> u64 {
        self.inner.tasks.spawn(Box::pin(future))
    }

    /// Services everything due now: fires elapsed timeouts, drains frame
    /// callbacks when the frame cadence is due, and polls spawned tasks.
    /// Returns the time until the next known wakeup, or `None` when nothing
    /// is scheduled.
    pub fn turn(&self) -> Option<Duration> {
        let now = self.now();
        while let Some((_, callback)) = self.inner.timers.pop_due(self.now()) {
            callback();
        }

        if !self.inner.frames.is_empty()
            && self.now() - self.inner.last_frame_at_ms.get() >= self.inner.frame_interval_ms.get()
        {
            let frame_time = self.frame_time();
            self.inner.last_frame_at_ms.set(frame_time);
            self.inner.frames.drain(frame_time);
        }

        while self.inner.tasks.take_wake_request() {
            self.inner.tasks.poll_once();
        }

        let mut next_ms: Option<f64> = self.inner.timers.next_deadline_ms();
        if !self.inner.frames.is_empty() {
            let frame_due = self.inner.last_frame_at_ms.get() + self.inner.frame_interval_ms.get();
            let frame_due = frame_due.max(now);
            next_ms = Some(match next_ms {
                Some(deadline) => deadline.min(frame_due),
                None => frame_due,
            });
        }
        next_ms.map(|deadline| Duration::from_secs_f64((deadline - self.now()).max(0.0) / 1000.0))
    }

    /// Pumps the loop for `duration`, sleeping between wakeups.
    pub fn run_for(&self, duration: Duration) {
        let end = Instant::now() + duration;
        loop {
            let wait = self.turn();
            let now = Instant::now();
            if now >= end {
                break;
            }
            let remaining = end - now;
            let nap = match wait {
                Some(wait) => wait.min(remaining),
                // Nothing scheduled; nap a frame's worth and re-check.
                None => remaining.min(Duration::from_secs_f64(
                    self.inner.frame_interval_ms.get() / 1000.0,
                )),
            };
            if !nap.is_zero() {
                thread::sleep(nap);
            }
        }
    }

    /// Pumps until no timeout, frame callback, or task remains, or until
    /// `limit` elapses. Returns true when the loop went idle.
    pub fn run_until_idle(&self, limit: Duration) -> bool {
        let end = Instant::now() + limit;
        loop {
            let wait = self.turn();
            if self.inner.timers.is_empty()
                && self.inner.frames.is_empty()
                && self.inner.tasks.is_idle()
            {
                return true;
            }
            let now = Instant::now();
            if now >= end {
                return false;
            }
            if let Some(wait) = wait {
                let nap = wait.min(end - now);
                if !nap.is_zero() {
                    thread::sleep(nap);
                }
            }
        }
    }
}

impl Default for StdEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdEventLoop")
            .field("now_ms", &self.now())
            .field("pending_timeouts", &self.inner.timers.len())
            .field("pending_frame_callbacks", &self.inner.frames.len())
            .finish()
    }
}

impl EventLoop for StdEventLoop {
    fn schedule_timeout(&self, callback: TimeoutCallback, delay_ms: f64) -> TimeoutHandle {
        let deadline = self.now() + delay_ms.max(0.0);
        self.inner.timers.insert(callback, deadline)
    }

    fn cancel_timeout(&self, handle: TimeoutHandle) {
        self.inner.timers.cancel(handle);
    }

    fn supports_frame_callbacks(&self) -> bool {
        true
    }

    fn schedule_frame_callback(&self, callback: FrameCallback) -> FrameCallbackHandle {
        self.inner.frames.insert(callback)
    }

    fn cancel_frame_callback(&self, handle: FrameCallbackHandle) {
        self.inner.frames.cancel(handle);
    }

    fn now(&self) -> f64 {
        self.inner.origin.elapsed().as_secs_f64() * 1000.0
    }
}
