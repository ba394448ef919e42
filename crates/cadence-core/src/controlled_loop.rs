//! Serialized asynchronous loop.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};

use crate::{CallbackError, ErrorHandler};

/// Boxed future produced by a [`ControlledLoop`] iteration callback.
pub type LocalFuture<T> = Pin<Box<dyn Future<Output = T> + 'static>>;

type IterationFn = Box<dyn FnMut() -> LocalFuture<Result<(), CallbackError>>>;

/// Repeatedly invokes a callback returning a future, awaiting each iteration
/// before starting the next, until stopped or failed.
///
/// At most one iteration future is ever outstanding. Iterations run
/// back-to-back with no delay between them; the loop yields only at the
/// await point of each iteration, so a callback whose future is immediately
/// ready keeps the loop on the current task without yielding.
///
/// Unlike the other engines, a failure thrown by the error handler itself is
/// not swallowed here: it surfaces through the completion future returned by
/// [`ControlledLoop::start`], since that future's task is the one unwinding.
pub struct ControlledLoop {
    inner: Rc<ControlledLoopInner>,
}

struct ControlledLoopInner {
    loop_fn: RefCell<IterationFn>,
    on_error: RefCell<Option<ErrorHandler>>,
    running: Cell<bool>,
}

impl ControlledLoop {
    pub fn new<F>(mut loop_fn: impl FnMut() -> F + 'static) -> Self
    where
        F: Future<Output = Result<(), CallbackError>> + 'static,
    {
        Self {
            inner: Rc::new(ControlledLoopInner {
                loop_fn: RefCell::new(Box::new(move || {
                    Box::pin(loop_fn()) as LocalFuture<Result<(), CallbackError>>
                })),
                on_error: RefCell::new(None),
                running: Cell::new(false),
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
        self.inner.running.get()
    }

    /// Control surface that does not keep the loop alive.
    pub fn handle(&self) -> ControlledLoopHandle {
        ControlledLoopHandle(Rc::downgrade(&self.inner))
    }

    /// Returns the loop's completion future. The loop runs while that future
    /// is polled and the future resolves once the loop stops, by [`stop`]
    /// (`Ok`) or by a propagated failure (`Err`).
    ///
    /// If the loop is already running the returned future resolves `Ok(())`
    /// immediately.
    ///
    /// [`stop`]: ControlledLoop::stop
    pub fn start(&self) -> impl Future<Output = Result<(), CallbackError>> + 'static {
        let inner = Rc::clone(&self.inner);
        async move {
            if inner.running.replace(true) {
                return Ok(());
            }
            log::trace!("controlled loop started");
            loop {
                if !inner.running.get() {
                    log::trace!("controlled loop stopped");
                    return Ok(());
                }
                let iteration = (inner.loop_fn.borrow_mut())();
                if let Err(err) = iteration.await {
                    inner.running.set(false);
                    log::debug!("controlled loop stopped by iteration failure: {err}");
                    let mut on_error = inner.on_error.borrow_mut();
                    return match on_error.as_mut() {
                        Some(handler) => handler(err),
                        None => Err(err),
                    };
                }
            }
        }
    }

    /// Stops the loop. Observed at the top of the next iteration; an
    /// in-flight iteration future is not interrupted.
    pub fn stop(&self) {
        self.inner.running.set(false);
    }
}

/// Weak control handle for a [`ControlledLoop`]; all methods are no-ops once
/// the loop has been dropped.
#[derive(Clone)]
pub struct ControlledLoopHandle(Weak<ControlledLoopInner>);

impl ControlledLoopHandle {
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
