//! Platform abstraction for the host event loop.
//!
//! The engines never read ambient timer globals; every scheduling and
//! time-reading primitive comes from an injected [`EventLoop`]
//! implementation. Hosts bind their real primitives, tests substitute a
//! virtual clock, and the engines cannot tell the difference.

use std::rc::Rc;

/// Callback invoked once when a timeout elapses.
pub type TimeoutCallback = Box<dyn FnOnce() + 'static>;

/// Callback invoked once before the host's next render pass, with the frame
/// timestamp in milliseconds.
pub type FrameCallback = Box<dyn FnOnce(f64) + 'static>;

/// Identifies a pending timeout for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutHandle(pub u64);

/// Identifies a pending frame callback for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameCallbackHandle(pub u64);

/// Delay standing in for a frame callback on hosts without a paint signal.
pub const FRAME_FALLBACK_DELAY_MS: f64 = 1.0;

/// Scheduling and clock primitives supplied by the host event loop.
///
/// Implementations hold no per-engine state, so a single bundle may be
/// shared read-only by any number of engines.
pub trait EventLoop {
    /// Invoke `callback` once, no earlier than `delay_ms` from now.
    fn schedule_timeout(&self, callback: TimeoutCallback, delay_ms: f64) -> TimeoutHandle;

    /// Cancel a pending timeout. No-op if it already fired or was canceled.
    fn cancel_timeout(&self, handle: TimeoutHandle);

    /// Whether the host has a real before-next-paint signal.
    ///
    /// Hosts returning `false` are never handed a frame callback by the
    /// engines; [`request_frame`] substitutes a short timeout instead.
    fn supports_frame_callbacks(&self) -> bool;

    /// Invoke `callback` once before the next render pass.
    fn schedule_frame_callback(&self, callback: FrameCallback) -> FrameCallbackHandle;

    /// Cancel a pending frame callback. No-op if it already fired or was
    /// canceled.
    fn cancel_frame_callback(&self, handle: FrameCallbackHandle);

    /// Current monotonic time in milliseconds.
    fn now(&self) -> f64;

    /// Render-aligned timestamp when the host has one, else [`EventLoop::now`].
    fn frame_time(&self) -> f64 {
        self.now()
    }
}

/// Shared handle the engines hold onto the host bundle.
pub type EventLoopHandle = Rc<dyn EventLoop>;

/// Handle for a scheduled yield point: a real frame callback or its timeout
/// substitute.
#[derive(Debug, Clone, Copy)]
pub enum FrameRequest {
    Frame(FrameCallbackHandle),
    Fallback(TimeoutHandle),
}

/// Schedules `callback` before the next paint, substituting a
/// [`FRAME_FALLBACK_DELAY_MS`] timeout on hosts without frame callbacks.
pub fn request_frame(
    env: &EventLoopHandle,
    callback: impl FnOnce(f64) + 'static,
) -> FrameRequest {
    if env.supports_frame_callbacks() {
        FrameRequest::Frame(env.schedule_frame_callback(Box::new(callback)))
    } else {
        let clock = Rc::clone(env);
        let handle = env.schedule_timeout(
            Box::new(move || callback(clock.frame_time())),
            FRAME_FALLBACK_DELAY_MS,
        );
        FrameRequest::Fallback(handle)
    }
}
