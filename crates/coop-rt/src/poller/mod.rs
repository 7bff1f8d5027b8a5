// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Readiness pollers.
//!
//! The scheduler talks to the OS multiplexer through [`ReadinessPoller`]
//! only. Two implementations:
//! - `epoll`  — Linux epoll via libc, used by real programs
//! - `manual` — scripted readiness over a [`ManualClock`](crate::clock::ManualClock),
//!   used for deterministic runs

use std::collections::HashSet;
use std::time::Duration;

use crate::error::Result;
use crate::resource::{Interest, Resource};

pub mod epoll;
pub mod manual;

pub use epoll::EpollPoller;
pub use manual::{ManualPoller, PollerEvent};

/// Resources reported ready by one poll.
pub type ReadySet = HashSet<Resource>;

/// Contract the scheduler consumes.
///
/// Each resource carries at most one registration at a time.
pub trait ReadinessPoller {
    /// Start watching `resource`. Fails with `AlreadyRegistered` if it is
    /// already being watched and with `Unwatchable` if the OS cannot watch
    /// it at all.
    fn register(&mut self, resource: Resource, interest: Interest) -> Result<()>;

    /// Stop watching `resource`. Fails with `NotRegistered` if it is not
    /// being watched.
    fn unregister(&mut self, resource: Resource) -> Result<()>;

    /// Wait for readiness. `None` blocks until something is ready,
    /// `Some(Duration::ZERO)` returns immediately, `Some(d)` blocks at most `d`.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<ReadySet>;
}

impl<P: ReadinessPoller + ?Sized> ReadinessPoller for Box<P> {
    fn register(&mut self, resource: Resource, interest: Interest) -> Result<()> {
        (**self).register(resource, interest)
    }

    fn unregister(&mut self, resource: Resource) -> Result<()> {
        (**self).unregister(resource)
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<ReadySet> {
        (**self).poll(timeout)
    }
}
