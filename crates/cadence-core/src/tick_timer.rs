//! Drift-compensating cadence timer.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::platform::{request_frame, EventLoopHandle, TimeoutHandle};
use crate::{CallbackError, ErrorHandler};

type TickFn = Box<dyn FnMut(f64) -> Result<(), CallbackError>>;

/// Invokes a callback at a target cadence, re-anchoring every tick to the
/// original schedule instead of "now + interval" so small scheduling jitter
/// never accumulates into drift.
///
/// Each tick runs in two stages: a timeout gets close to the target instant,
/// then a frame callback aligns the actual invocation with rendering. The
/// next tick's timeout is queued before the callback runs, so a callback
/// that overruns its interval delays the already-pending tick rather than
/// silently stretching the schedule; once the backlog clears, the rounding
/// rule snaps the delay to the next future boundary and the boundaries that
/// elapsed meanwhile are skipped, never replayed.
///
/// Restarting after `stop()` bumps an internal generation counter, so
/// callbacks scheduled by an earlier run go inert instead of double-ticking.
pub struct TickTimer {
    inner: Rc<TickTimerInner>,
}

struct TickTimerInner {
    env: EventLoopHandle,
    on_tick: RefCell<TickFn>,
    on_error: RefCell<Option<ErrorHandler>>,
    interval_ms: Cell<f64>,
    start_time: Cell<Option<f64>>,
    run_id: Cell<u64>,
    pending: RefCell<Option<PendingTick>>,
}

/// Bookkeeping for the tick whose timeout has not fired yet; used to re-plan
/// the schedule when the interval changes mid-wait.
struct PendingTick {
    anchor: f64,
    handle: TimeoutHandle,
}

fn sanitize_interval(ms: f64) -> Option<f64> {
    if ms.is_finite() && ms >= 0.0 {
        Some(ms)
    } else {
        None
    }
}

impl TickTimer {
    /// Creates a stopped timer. An invalid (negative or non-finite)
    /// `target_tick_interval_ms` is replaced with 0, i.e. tick as fast as
    /// the host schedules timeouts.
    pub fn new(
        env: EventLoopHandle,
        target_tick_interval_ms: f64,
        on_tick: impl FnMut(f64) -> Result<(), CallbackError> + 'static,
    ) -> Self {
        let interval_ms = sanitize_interval(target_tick_interval_ms).unwrap_or_else(|| {
            log::warn!("replacing invalid tick interval {target_tick_interval_ms}ms with 0ms");
            0.0
        });
        Self {
            inner: Rc::new(TickTimerInner {
                env,
                on_tick: RefCell::new(Box::new(on_tick)),
                on_error: RefCell::new(None),
                interval_ms: Cell::new(interval_ms),
                start_time: Cell::new(None),
                run_id: Cell::new(0),
                pending: RefCell::new(None),
            }),
        }
    }

    pub fn with_error_handler(
        self,
        handler: impl FnMut(CallbackError) -> Result<(), CallbackError> + 'static,
    ) -> Self {
        *self.inner.on_error.borrow_mut() = Some(Box::new(handler));
        self
    }

    pub fn is_running(&self) -> bool {
        self.inner.start_time.get().is_some()
    }

    /// Timestamp the current run was anchored to, or `None` when stopped.
    pub fn start_time(&self) -> Option<f64> {
        self.inner.start_time.get()
    }

    pub fn target_tick_interval_ms(&self) -> f64 {
        self.inner.interval_ms.get()
    }

    /// Control surface that does not keep the timer alive.
    pub fn handle(&self) -> TickTimerHandle {
        TickTimerHandle(Rc::downgrade(&self.inner))
    }

    /// Anchors the schedule to the current frame time and queues the first
    /// tick. No-op if already running.
    pub fn start(&self) {
        TickTimerInner::start(&self.inner);
    }

    /// Stops the timer and cancels the pending tick timeout. A tick already
    /// past its timeout goes inert via the generation check.
    pub fn stop(&self) {
        TickTimerInner::halt(&self.inner);
    }

    /// Changes the cadence. When a tick is mid-wait, its timeout is replaced
    /// so the new interval applies before the next tick rather than after.
    pub fn set_target_tick_interval_ms(&self, ms: f64) {
        TickTimerInner::set_interval(&self.inner, ms);
    }
}

impl TickTimerInner {
    fn start(inner: &Rc<Self>) {
        if inner.start_time.get().is_some() {
            return;
        }
        inner.run_id.set(inner.run_id.get() + 1);
        let start_time = inner.env.frame_time();
        inner.start_time.set(Some(start_time));
        log::trace!("tick timer started at {start_time}ms");
        Self::schedule_tick(inner, start_time);
    }

    fn halt(inner: &Rc<Self>) {
        if inner.start_time.take().is_none() {
            return;
        }
        if let Some(pending) = inner.pending.borrow_mut().take() {
            inner.env.cancel_timeout(pending.handle);
        }
        log::trace!("tick timer stopped");
    }

    fn set_interval(inner: &Rc<Self>, ms: f64) {
        let interval = match sanitize_interval(ms) {
            Some(interval) => interval,
            None => {
                log::warn!("ignoring invalid tick interval {ms}ms");
                return;
            }
        };
        inner.interval_ms.set(interval);
        let replaced = inner.pending.borrow_mut().take();
        if let Some(pending) = replaced {
            inner.env.cancel_timeout(pending.handle);
            Self::schedule_tick(inner, pending.anchor);
        }
    }

    /// Queues the next tick's timeout against `anchor`.
    ///
    /// The elapsed time since the anchor is rounded to the nearest interval
    /// boundary before adding one interval, so a tick firing slightly early
    /// or late self-corrects toward the original cadence, and a tick
    /// overrunning a whole interval lands on the next future boundary.
    fn schedule_tick(inner: &Rc<Self>, anchor: f64) {
        let interval = inner.interval_ms.get();
        let elapsed = inner.env.now() - anchor;
        let rounded = if interval > 0.0 {
            (elapsed / interval).round() * interval
        } else {
            elapsed
        };
        let target = anchor + rounded + interval;
        let delay = (target - inner.env.now()).max(0.0);
        let run_id = inner.run_id.get();
        let weak = Rc::downgrade(inner);
        let handle = inner.env.schedule_timeout(
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::on_timeout(&inner, run_id);
                }
            }),
            delay,
        );
        *inner.pending.borrow_mut() = Some(PendingTick { anchor, handle });
    }

    fn on_timeout(inner: &Rc<Self>, run_id: u64) {
        if run_id != inner.run_id.get() || inner.start_time.get().is_none() {
            return;
        }
        inner.pending.borrow_mut().take();
        // Queue the next tick before this one runs; stop() or a failure in
        // the callback cancels it again.
        if let Some(anchor) = inner.start_time.get() {
            Self::schedule_tick(inner, anchor);
        }
        // The timeout got us close to the boundary; the frame callback
        // aligns the actual invocation with the host's render pass.
        let weak = Rc::downgrade(inner);
        request_frame(&inner.env, move |frame_time| {
            if let Some(inner) = weak.upgrade() {
                Self::on_frame(&inner, run_id, frame_time);
            }
        });
    }

    fn on_frame(inner: &Rc<Self>, run_id: u64, frame_time: f64) {
        if run_id != inner.run_id.get() || inner.start_time.get().is_none() {
            return;
        }
        let result = (inner.on_tick.borrow_mut())(frame_time);
        if let Err(err) = result {
            Self::fail(inner, err);
        }
    }

    fn fail(inner: &Rc<Self>, err: CallbackError) {
        Self::halt(inner);
        log::debug!("tick timer stopped by callback failure: {err}");
        if let Some(handler) = inner.on_error.borrow_mut().as_mut() {
            if let Err(secondary) = handler(err) {
                // No remediation path exists for a failing error handler.
                log::error!("tick timer error handler failed: {secondary}");
            }
        }
    }
}

/// Weak control handle for a [`TickTimer`]; all methods are no-ops once the
/// timer has been dropped.
#[derive(Clone)]
pub struct TickTimerHandle(Weak<TickTimerInner>);

impl TickTimerHandle {
    pub fn start(&self) {
        if let Some(inner) = self.0.upgrade() {
            TickTimerInner::start(&inner);
        }
    }

    pub fn stop(&self) {
        if let Some(inner) = self.0.upgrade() {
            TickTimerInner::halt(&inner);
        }
    }

    pub fn is_running(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.start_time.get().is_some())
            .unwrap_or(false)
    }

    pub fn start_time(&self) -> Option<f64> {
        self.0.upgrade().and_then(|inner| inner.start_time.get())
    }

    pub fn set_target_tick_interval_ms(&self, ms: f64) {
        if let Some(inner) = self.0.upgrade() {
            TickTimerInner::set_interval(&inner, ms);
        }
    }
}
