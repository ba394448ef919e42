#![doc = r"Cooperative scheduling primitives for single-threaded event loops.

Three engines (a frame-budgeted synchronous loop, a serialized asynchronous
loop, and a drift-compensating timer) plus two leaf waits. Every engine
pulls its timer and frame primitives from an injected [`EventLoop`] bundle,
so the same code runs against a real host or a virtual test clock."]

pub mod bounded_loop;
pub mod controlled_loop;
pub mod platform;
pub mod queue;
pub mod tasks;
pub mod tick_timer;
pub mod wait;

pub use bounded_loop::{BoundedLoop, BoundedLoopHandle, DEFAULT_MAX_BLOCKING_TIME_MS};
pub use controlled_loop::{ControlledLoop, ControlledLoopHandle, LocalFuture};
pub use platform::{
    request_frame, EventLoop, EventLoopHandle, FrameCallback, FrameCallbackHandle, FrameRequest,
    TimeoutCallback, TimeoutHandle, FRAME_FALLBACK_DELAY_MS,
};
pub use queue::{FrameQueue, TimerQueue};
pub use tasks::{LocalBoxFuture, LocalTasks};
pub use tick_timer::{TickTimer, TickTimerHandle};
pub use wait::{
    delay, poll_until, Delay, PollError, PollOptions, PollUntil, WaitError,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_TIMEOUT_MS,
};

/// Value a user-supplied callback fails with. Engines hand it to the error
/// handler verbatim, exactly once per failure.
pub type CallbackError = Box<dyn std::error::Error + 'static>;

/// Optional per-engine failure hook. The owning engine is always stopped
/// before the handler runs. A handler returning `Err` has no remediation
/// path in the synchronous engines; the asynchronous loop propagates it
/// through its completion future.
pub type ErrorHandler = Box<dyn FnMut(CallbackError) -> Result<(), CallbackError>>;
