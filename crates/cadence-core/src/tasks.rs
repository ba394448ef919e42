//! Minimal single-threaded future executor embedded by the host event loops.
//!
//! Futures spawned here never leave the host thread, so they may freely
//! capture `Rc`/`RefCell` state. The executor shares one waker across all
//! tasks; a wake from any of them requests another [`LocalTasks::poll_once`]
//! pass from the host.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_task::ArcWake;

/// Boxed future pinned to the host thread.
pub type LocalBoxFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;

struct TaskEntry {
    id: u64,
    future: LocalBoxFuture,
}

struct WakeFlag(AtomicBool);

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::SeqCst);
    }
}

pub struct LocalTasks {
    tasks: RefCell<Vec<TaskEntry>>,
    next_task_id: Cell<u64>,
    woken: Arc<WakeFlag>,
    waker: Waker,
}

impl LocalTasks {
    pub fn new() -> Self {
        let woken = Arc::new(WakeFlag(AtomicBool::new(false)));
        let waker = futures_task::waker(Arc::clone(&woken));
        Self {
            tasks: RefCell::new(Vec::new()),
            next_task_id: Cell::new(1),
            woken,
            waker,
        }
    }

    /// Queues `future` and requests a poll pass. Returns an id usable with
    /// [`LocalTasks::cancel`].
    pub fn spawn(&self, future: LocalBoxFuture) -> u64 {
        let id = self.next_task_id.get();
        self.next_task_id.set(id + 1);
        self.tasks.borrow_mut().push(TaskEntry { id, future });
        self.woken.0.store(true, Ordering::SeqCst);
        id
    }

    /// Drops a queued task without polling it further. No-op if it already
    /// completed.
    pub fn cancel(&self, id: u64) {
        self.tasks.borrow_mut().retain(|entry| entry.id != id);
    }

    /// Consumes the pending wake request, if any. Hosts poll only when this
    /// returns true to avoid spinning on parked futures.
    pub fn take_wake_request(&self) -> bool {
        self.woken.0.swap(false, Ordering::SeqCst)
    }

    /// Polls every queued task once. Returns true when at least one task
    /// completed.
    pub fn poll_once(&self) -> bool {
        let tasks = mem::take(&mut *self.tasks.borrow_mut());
        if tasks.is_empty() {
            return false;
        }
        let mut cx = Context::from_waker(&self.waker);
        let mut pending = Vec::with_capacity(tasks.len());
        let mut completed = false;
        for mut entry in tasks {
            match entry.future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => completed = true,
                Poll::Pending => pending.push(entry),
            }
        }
        if !pending.is_empty() {
            // Tasks spawned while polling landed in the fresh vec; keep them
            // after the survivors so ids stay roughly in spawn order.
            let mut tasks = self.tasks.borrow_mut();
            let spawned = mem::take(&mut *tasks);
            pending.extend(spawned);
            *tasks = pending;
        }
        completed
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_idle()
    }
}

impl Default for LocalTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTasks")
            .field("tasks", &self.tasks.borrow().len())
            .finish()
    }
}
