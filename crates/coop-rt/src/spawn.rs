// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Deferred spawning.
//!
//! [`Scheduler::spawn`](crate::Scheduler::spawn) needs `&mut Scheduler`,
//! which a running computation never has. A [`Spawner`] queues work
//! instead; the scheduler starts queued computations at the top of its
//! next tick, in queue order. Cancellation works the same way: a
//! [`Spawner::cancel`] request is applied before the next resumption.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::Location;
use std::rc::Rc;

use crate::coroutine::{Computation, Coroutine};

/// Stable identity of a spawned computation, kept across re-yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Id allocation and the pending queue, shared by a scheduler and its
/// spawners.
#[derive(Default)]
pub(crate) struct SpawnQueue {
    next_id: Cell<u64>,
    pending: RefCell<VecDeque<(TaskId, Coroutine)>>,
    cancelled: RefCell<Vec<TaskId>>,
}

impl SpawnQueue {
    pub fn next_id(&self) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        TaskId(id)
    }

    pub fn push(&self, id: TaskId, coroutine: Coroutine) {
        self.pending.borrow_mut().push_back((id, coroutine));
    }

    /// Take everything queued so far. Spawns made while the batch is being
    /// started land in the next batch.
    pub fn drain(&self) -> Vec<(TaskId, Coroutine)> {
        self.pending.borrow_mut().drain(..).collect()
    }

    pub fn remove(&self, id: TaskId) -> bool {
        let mut pending = self.pending.borrow_mut();
        let before = pending.len();
        pending.retain(|(queued, _)| *queued != id);
        pending.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    pub fn request_cancel(&self, id: TaskId) {
        self.cancelled.borrow_mut().push(id);
    }

    pub fn take_cancelled(&self) -> Vec<TaskId> {
        std::mem::take(&mut *self.cancelled.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }
}

/// Cloneable handle for spawning onto a scheduler from inside running
/// computations or host code between ticks.
#[derive(Clone)]
pub struct Spawner {
    queue: Rc<SpawnQueue>,
}

impl Spawner {
    pub(crate) fn new(queue: Rc<SpawnQueue>) -> Self {
        Self { queue }
    }

    /// Queue `computation`; it is started on the scheduler's next tick.
    /// The returned id can be cancelled before or after it starts.
    #[track_caller]
    pub fn spawn(&self, computation: impl Computation + 'static) -> TaskId {
        let id = self.queue.next_id();
        let coroutine = Coroutine::spawned_at(Box::new(computation), Location::caller());
        log::trace!("queued task {} from {}", id, coroutine.location());
        self.queue.push(id, coroutine);
        id
    }

    /// Cancel `task` from inside a running computation. A task still in the
    /// queue is dropped at once; a tracked one is removed, and its readiness
    /// registration released, before the scheduler resumes anything else.
    /// Ids of tasks that already finished are ignored.
    pub fn cancel(&self, task: TaskId) {
        if self.queue.remove(task) {
            log::debug!("cancelled queued task {}", task);
            return;
        }
        log::trace!("cancel of task {} requested", task);
        self.queue.request_cancel(task);
    }

    /// Number of computations waiting for the next tick.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl fmt::Debug for Spawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spawner")
            .field("pending", &self.queue.len())
            .finish()
    }
}
