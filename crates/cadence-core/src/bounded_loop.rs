//! Frame-budgeted synchronous loop.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::platform::{request_frame, EventLoopHandle};
use crate::{CallbackError, ErrorHandler};

/// Default per-cycle blocking budget in milliseconds. Slightly under one
/// 60 Hz frame so the host keeps headroom to paint.
pub const DEFAULT_MAX_BLOCKING_TIME_MS: f64 = 15.0;

type LoopFn = Box<dyn FnMut() -> Result<(), CallbackError>>;

/// Runs a synchronous callback as many times as fit within a per-cycle time
/// budget, then yields to the host event loop and resumes on the next frame.
///
/// The budget check is amortized: after `n` iterations taking `elapsed`
/// milliseconds, the cycle continues only while
/// `elapsed + elapsed / n < max_blocking_time_ms`. This assumes a roughly
/// uniform per-call cost and reads the clock once per iteration instead of
/// bracketing every call.
///
/// A callback failure stops the loop before the error handler runs; the loop
/// never resumes on its own afterwards.
pub struct BoundedLoop {
    inner: Rc<BoundedLoopInner>,
}

struct BoundedLoopInner {
    env: EventLoopHandle,
    loop_fn: RefCell<LoopFn>,
    on_error: RefCell<Option<ErrorHandler>>,
    max_blocking_time_ms: Cell<f64>,
    running: Cell<bool>,
}

impl BoundedLoop {
    pub fn new(
        env: EventLoopHandle,
        loop_fn: impl FnMut() -> Result<(), CallbackError> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(BoundedLoopInner {
                env,
                loop_fn: RefCell::new(Box::new(loop_fn)),
                on_error: RefCell::new(None),
                max_blocking_time_ms: Cell::new(DEFAULT_MAX_BLOCKING_TIME_MS),
                running: Cell::new(false),
            }),
        }
    }

    /// Replaces the default per-cycle budget. Non-finite or non-positive
    /// values are ignored and the default kept.
    pub fn with_max_blocking_time_ms(self, ms: f64) -> Self {
        if ms.is_finite() && ms > 0.0 {
            self.inner.max_blocking_time_ms.set(ms);
        } else {
            log::warn!("ignoring invalid blocking budget {ms}ms");
        }
        self
    }

    pub fn with_error_handler(
        self,
        handler: impl FnMut(CallbackError) -> Result<(), CallbackError> + 'static,
    ) -> Self {
        *self.inner.on_error.borrow_mut() = Some(Box::new(handler));
        self
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Control surface that does not keep the loop alive.
    pub fn handle(&self) -> BoundedLoopHandle {
        BoundedLoopHandle(Rc::downgrade(&self.inner))
    }

    /// Begins executing immediately. No-op if already running.
    pub fn start(&self) {
        if self.inner.running.replace(true) {
            return;
        }
        log::trace!("bounded loop started");
        Self::run_cycle(&self.inner);
    }

    /// Stops the loop. A pending resumption is not canceled; the running
    /// flag makes it a no-op when it fires.
    pub fn stop(&self) {
        self.inner.running.set(false);
    }

    fn run_cycle(inner: &Rc<BoundedLoopInner>) {
        let cycle_start = inner.env.now();
        let budget = inner.max_blocking_time_ms.get();
        let mut iterations = 0.0_f64;
        loop {
            if !inner.running.get() {
                return;
            }
            let result = (inner.loop_fn.borrow_mut())();
            if let Err(err) = result {
                Self::fail(inner, err);
                return;
            }
            iterations += 1.0;
            let elapsed = inner.env.now() - cycle_start;
            let average = elapsed / iterations;
            if elapsed + average >= budget {
                break;
            }
        }
        let weak = Rc::downgrade(inner);
        request_frame(&inner.env, move |_frame_time| {
            if let Some(inner) = weak.upgrade() {
                if inner.running.get() {
                    Self::run_cycle(&inner);
                }
            }
        });
    }

    fn fail(inner: &Rc<BoundedLoopInner>, err: CallbackError) {
        inner.running.set(false);
        log::debug!("bounded loop stopped by callback failure: {err}");
        if let Some(handler) = inner.on_error.borrow_mut().as_mut() {
            if let Err(secondary) = handler(err) {
                // No remediation path exists for a failing error handler.
                log::error!("bounded loop error handler failed: {secondary}");
            }
        }
    }
}

/// Weak control handle for a [`BoundedLoop`]; all methods are no-ops once
/// the loop has been dropped.
#[derive(Clone)]
pub struct BoundedLoopHandle(Weak<BoundedLoopInner>);

impl BoundedLoopHandle {
    pub fn start(&self) {
        if let Some(inner) = self.0.upgrade() {
            if !inner.running.replace(true) {
                BoundedLoop::run_cycle(&inner);
            }
        }
    }

    pub fn stop(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.running.set(false);
        }
    }

    pub fn is_running(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.running.get())
            .unwrap_or(false)
    }
}
