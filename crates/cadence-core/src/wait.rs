//! One-shot waits: a single delay and poll-until-condition.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::platform::{EventLoopHandle, TimeoutHandle};
use crate::CallbackError;

/// Default condition-check interval for [`poll_until`]: roughly one render
/// frame.
pub const DEFAULT_POLL_INTERVAL_MS: f64 = 16.0;

/// Default deadline for [`poll_until`].
pub const DEFAULT_POLL_TIMEOUT_MS: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub enum WaitError {
    /// A supplied duration was negative, zero where a positive value is
    /// required, NaN, or infinite.
    InvalidDuration { ms: f64 },
    /// The deadline elapsed before the condition held.
    Timeout { timeout_ms: f64 },
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::InvalidDuration { ms } => write!(f, "invalid duration {ms}ms"),
            WaitError::Timeout { timeout_ms } => {
                write!(f, "condition not met within {timeout_ms}ms")
            }
        }
    }
}

impl std::error::Error for WaitError {}

/// Failure modes of [`poll_until`].
#[derive(Debug)]
pub enum PollError {
    Wait(WaitError),
    /// The condition callback itself failed.
    Callback(CallbackError),
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Wait(err) => err.fmt(f),
            PollError::Callback(err) => write!(f, "condition failed: {err}"),
        }
    }
}

impl std::error::Error for PollError {}

impl From<WaitError> for PollError {
    fn from(err: WaitError) -> Self {
        PollError::Wait(err)
    }
}

/// Resolves after `duration_ms`, rounded to the nearest millisecond.
///
/// The duration must be positive and finite; anything else resolves
/// `Err(WaitError::InvalidDuration)`. Dropping the future before it fires
/// releases its timeout.
pub fn delay(env: &EventLoopHandle, duration_ms: f64) -> Delay {
    Delay {
        env: Rc::clone(env),
        duration_ms,
        state: Rc::new(RefCell::new(DelayState {
            registered: false,
            handle: None,
            elapsed: false,
            waker: None,
        })),
    }
}

struct DelayState {
    registered: bool,
    handle: Option<TimeoutHandle>,
    elapsed: bool,
    waker: Option<Waker>,
}

pub struct Delay {
    env: EventLoopHandle,
    duration_ms: f64,
    state: Rc<RefCell<DelayState>>,
}

impl Future for Delay {
    type Output = Result<(), WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.duration_ms.is_finite() || self.duration_ms <= 0.0 {
            return Poll::Ready(Err(WaitError::InvalidDuration {
                ms: self.duration_ms,
            }));
        }
        {
            let mut state = self.state.borrow_mut();
            if state.elapsed {
                return Poll::Ready(Ok(()));
            }
            state.waker = Some(cx.waker().clone());
            if state.registered {
                return Poll::Pending;
            }
            state.registered = true;
        }
        let weak = Rc::downgrade(&self.state);
        let handle = self.env.schedule_timeout(
            Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    let mut state = state.borrow_mut();
                    state.elapsed = true;
                    state.handle = None;
                    if let Some(waker) = state.waker.take() {
                        waker.wake();
                    }
                }
            }),
            self.duration_ms.round(),
        );
        self.state.borrow_mut().handle = Some(handle);
        Poll::Pending
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if let Some(handle) = self.state.borrow_mut().handle.take() {
            self.env.cancel_timeout(handle);
        }
    }
}

/// Timing knobs for [`poll_until`]. Non-finite or negative fields are
/// replaced with the defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollOptions {
    pub interval_ms: f64,
    pub timeout_ms: f64,
}

impl PollOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval_ms(mut self, ms: f64) -> Self {
        self.interval_ms = ms;
        self
    }

    pub fn with_timeout_ms(mut self, ms: f64) -> Self {
        self.timeout_ms = ms;
        self
    }

    fn sanitized(self) -> Self {
        let mut sanitized = self;
        if !sanitized.interval_ms.is_finite() || sanitized.interval_ms < 0.0 {
            log::warn!(
                "replacing invalid poll interval {}ms with {DEFAULT_POLL_INTERVAL_MS}ms",
                sanitized.interval_ms
            );
            sanitized.interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        if !sanitized.timeout_ms.is_finite() || sanitized.timeout_ms < 0.0 {
            log::warn!(
                "replacing invalid poll timeout {}ms with {DEFAULT_POLL_TIMEOUT_MS}ms",
                sanitized.timeout_ms
            );
            sanitized.timeout_ms = DEFAULT_POLL_TIMEOUT_MS;
        }
        sanitized
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

/// Repeatedly evaluates `condition` every `interval_ms` until it yields a
/// value, fails, or `timeout_ms` elapses, whichever happens first. The
/// deadline races the check interval, so a timeout fires on schedule even
/// mid-interval.
///
/// Whatever the outcome, no timers remain scheduled once the future settles
/// or is dropped.
pub fn poll_until<T: 'static>(
    env: &EventLoopHandle,
    condition: impl FnMut() -> Result<Option<T>, CallbackError> + 'static,
    options: PollOptions,
) -> PollUntil<T> {
    let options = options.sanitized();
    PollUntil {
        state: Rc::new(RefCell::new(PollState {
            env: Rc::clone(env),
            condition: Some(Box::new(condition)),
            options,
            registered: false,
            interval_handle: None,
            deadline_handle: None,
            outcome: None,
            waker: None,
        })),
    }
}

type ConditionFn<T> = Box<dyn FnMut() -> Result<Option<T>, CallbackError>>;

struct PollState<T> {
    env: EventLoopHandle,
    condition: Option<ConditionFn<T>>,
    options: PollOptions,
    registered: bool,
    interval_handle: Option<TimeoutHandle>,
    deadline_handle: Option<TimeoutHandle>,
    outcome: Option<Result<T, PollError>>,
    waker: Option<Waker>,
}

pub struct PollUntil<T> {
    state: Rc<RefCell<PollState<T>>>,
}

impl<T: 'static> PollUntil<T> {
    fn register(state: &Rc<RefCell<PollState<T>>>) {
        let (env, interval_ms, timeout_ms) = {
            let state = state.borrow();
            (
                Rc::clone(&state.env),
                state.options.interval_ms,
                state.options.timeout_ms,
            )
        };

        let weak = Rc::downgrade(state);
        let deadline_handle = env.schedule_timeout(
            Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    Self::on_deadline(&state, timeout_ms);
                }
            }),
            timeout_ms,
        );

        let weak = Rc::downgrade(state);
        let interval_handle = env.schedule_timeout(
            Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    Self::on_interval(&state);
                }
            }),
            interval_ms,
        );

        let mut state = state.borrow_mut();
        state.deadline_handle = Some(deadline_handle);
        state.interval_handle = Some(interval_handle);
    }

    fn on_interval(state: &Rc<RefCell<PollState<T>>>) {
        let mut condition = {
            let mut state = state.borrow_mut();
            state.interval_handle = None;
            if state.outcome.is_some() {
                return;
            }
            match state.condition.take() {
                Some(condition) => condition,
                None => return,
            }
        };

        let verdict = condition();

        let mut state_ref = state.borrow_mut();
        state_ref.condition = Some(condition);
        match verdict {
            Ok(Some(value)) => {
                drop(state_ref);
                Self::settle(state, Ok(value));
            }
            Ok(None) => {
                let env = Rc::clone(&state_ref.env);
                let interval_ms = state_ref.options.interval_ms;
                drop(state_ref);
                let weak = Rc::downgrade(state);
                let handle = env.schedule_timeout(
                    Box::new(move || {
                        if let Some(state) = weak.upgrade() {
                            Self::on_interval(&state);
                        }
                    }),
                    interval_ms,
                );
                state.borrow_mut().interval_handle = Some(handle);
            }
            Err(err) => {
                drop(state_ref);
                Self::settle(state, Err(PollError::Callback(err)));
            }
        }
    }

    fn on_deadline(state: &Rc<RefCell<PollState<T>>>, timeout_ms: f64) {
        {
            let mut state = state.borrow_mut();
            state.deadline_handle = None;
            if state.outcome.is_some() {
                return;
            }
        }
        Self::settle(state, Err(WaitError::Timeout { timeout_ms }.into()));
    }

    fn settle(state: &Rc<RefCell<PollState<T>>>, outcome: Result<T, PollError>) {
        let waker = {
            let mut state = state.borrow_mut();
            state.outcome = Some(outcome);
            let env = Rc::clone(&state.env);
            if let Some(handle) = state.interval_handle.take() {
                env.cancel_timeout(handle);
            }
            if let Some(handle) = state.deadline_handle.take() {
                env.cancel_timeout(handle);
            }
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T: 'static> Future for PollUntil<T> {
    type Output = Result<T, PollError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(outcome) = state.outcome.take() {
                return Poll::Ready(outcome);
            }
            state.waker = Some(cx.waker().clone());
            if state.registered {
                return Poll::Pending;
            }
            state.registered = true;
        }
        Self::register(&self.state);
        Poll::Pending
    }
}

impl<T> Drop for PollUntil<T> {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        let env = Rc::clone(&state.env);
        if let Some(handle) = state.interval_handle.take() {
            env.cancel_timeout(handle);
        }
        if let Some(handle) = state.deadline_handle.take() {
            env.cancel_timeout(handle);
        }
    }
}
