//! Tokio-backed event loop
//!
//! Every scheduled item is a `spawn_local` task; cancellation aborts it.
//! Must be used from within a `LocalSet` on a current-thread runtime.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::trace;

use super::{EventLoop, LoopTask, TaskHandle};
use crate::connection::{ConnRef, ConnectionId};

/// Event loop adapter over the current `LocalSet`
pub struct TokioLoop {
    inner: Rc<Inner>,
}

#[derive(Default)]
struct Inner {
    next_task: Cell<u64>,
    tasks: RefCell<HashMap<u64, AbortHandle>>,
    idle: RefCell<HashMap<ConnectionId, AbortHandle>>,
}

impl Inner {
    fn next_task_id(&self) -> u64 {
        let id = self.next_task.get() + 1;
        self.next_task.set(id);
        id
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
        for (_, handle) in self.idle.get_mut().drain() {
            handle.abort();
        }
    }
}

impl TokioLoop {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner::default()),
        }
    }

    /// Number of tasks scheduled and not yet run or cancelled
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Number of armed idle deadlines
    pub fn armed_idle_timeouts(&self) -> usize {
        self.inner.idle.borrow().len()
    }

    fn spawn_task(&self, delay: Option<Duration>, task: LoopTask) -> TaskHandle {
        let id = self.inner.next_task_id();
        let weak: Weak<Inner> = Rc::downgrade(&self.inner);

        let join = tokio::task::spawn_local(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(inner) = weak.upgrade() {
                inner.tasks.borrow_mut().remove(&id);
            }
            task();
        });

        self.inner.tasks.borrow_mut().insert(id, join.abort_handle());
        TaskHandle::from_raw(id)
    }
}

impl Default for TokioLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop for TokioLoop {
    fn schedule_idle_timeout(&self, conn: &ConnRef, after: Duration) {
        let id = conn.id();
        let target = Arc::downgrade(conn);
        let weak = Rc::downgrade(&self.inner);

        let join = tokio::task::spawn_local(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = weak.upgrade() {
                inner.idle.borrow_mut().remove(&id);
            }
            if let Some(conn) = target.upgrade() {
                trace!(conn_id = %id, "Idle timeout expired");
                conn.timeout_expired();
            }
        });

        let previous = self.inner.idle.borrow_mut().insert(id, join.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_idle_timeout(&self, id: ConnectionId) {
        let handle = self.inner.idle.borrow_mut().remove(&id);
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn run_on_next_turn(&self, task: LoopTask) -> TaskHandle {
        self.spawn_task(None, task)
    }

    fn schedule_one_shot(&self, after: Duration, task: LoopTask) -> TaskHandle {
        self.spawn_task(Some(after), task)
    }

    fn cancel(&self, handle: TaskHandle) {
        let handle = self.inner.tasks.borrow_mut().remove(&handle.as_u64());
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
