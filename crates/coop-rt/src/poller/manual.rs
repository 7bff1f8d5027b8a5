// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scripted readiness for deterministic runs.
//!
//! Readiness is marked ahead of time with [`ManualPoller::mark_ready`] or
//! [`ManualPoller::mark_ready_at`]. A poll that would block advances the
//! shared [`ManualClock`] instead of sleeping: up to the earliest scheduled
//! readiness of a registered resource, or by the full timeout.

use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};

use crate::clock::{Clock, ManualClock};
use crate::error::{Error, Result};
use crate::resource::{Interest, Resource};

use super::{ReadinessPoller, ReadySet};

/// Registration traffic seen by a [`ManualPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerEvent {
    Registered(Resource, Interest),
    Unregistered(Resource),
}

#[derive(Debug)]
pub struct ManualPoller {
    clock: ManualClock,
    registrations: HashMap<Resource, Interest>,
    /// Scheduled readiness, in marking order.
    marks: Vec<(Instant, Resource)>,
    history: Vec<PollerEvent>,
    timeouts: Vec<Option<Duration>>,
    fail_next: Option<io::Error>,
}

impl ManualPoller {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            registrations: HashMap::new(),
            marks: Vec::new(),
            history: Vec::new(),
            timeouts: Vec::new(),
            fail_next: None,
        }
    }

    /// Report `resource` ready on the next poll that sees it registered.
    pub fn mark_ready(&mut self, resource: Resource) {
        let now = self.clock.now();
        self.marks.push((now, resource));
    }

    /// Report `resource` ready once the clock reaches `at`.
    pub fn mark_ready_at(&mut self, resource: Resource, at: Instant) {
        self.marks.push((at, resource));
    }

    /// Make the next poll fail with `err`.
    pub fn fail_next_poll(&mut self, err: io::Error) {
        self.fail_next = Some(err);
    }

    pub fn is_registered(&self, resource: Resource) -> bool {
        self.registrations.contains_key(&resource)
    }

    pub fn registered(&self) -> usize {
        self.registrations.len()
    }

    /// Every register/unregister, in order.
    pub fn history(&self) -> &[PollerEvent] {
        &self.history
    }

    /// Timeouts passed to each poll, in order.
    pub fn timeouts(&self) -> &[Option<Duration>] {
        &self.timeouts
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Earliest scheduled readiness among registered resources.
    fn next_wakeup(&self) -> Option<Instant> {
        self.marks
            .iter()
            .filter(|(_, r)| self.registrations.contains_key(r))
            .map(|(at, _)| *at)
            .min()
    }

    fn take_due(&mut self, now: Instant) -> ReadySet {
        let mut ready = ReadySet::new();
        let registrations = &self.registrations;
        self.marks.retain(|(at, r)| {
            if *at <= now && registrations.contains_key(r) {
                ready.insert(*r);
                false
            } else {
                true
            }
        });
        ready
    }
}

impl ReadinessPoller for ManualPoller {
    fn register(&mut self, resource: Resource, interest: Interest) -> Result<()> {
        if self.registrations.contains_key(&resource) {
            return Err(Error::AlreadyRegistered(resource));
        }
        self.registrations.insert(resource, interest);
        self.history.push(PollerEvent::Registered(resource, interest));
        Ok(())
    }

    fn unregister(&mut self, resource: Resource) -> Result<()> {
        if self.registrations.remove(&resource).is_none() {
            return Err(Error::NotRegistered(resource));
        }
        self.history.push(PollerEvent::Unregistered(resource));
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<ReadySet> {
        self.timeouts.push(timeout);
        if let Some(err) = self.fail_next.take() {
            return Err(Error::Poll(err));
        }

        let now = self.clock.now();
        let wake_at = match (self.next_wakeup(), timeout) {
            (Some(at), None) => at.max(now),
            (Some(at), Some(t)) => at.max(now).min(now + t),
            (None, Some(t)) => now + t,
            (None, None) => {
                return Err(Error::Poll(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "nothing registered will ever become ready",
                )))
            }
        };

        if wake_at > now {
            self.clock.advance(wake_at - now);
        }
        Ok(self.take_due(wake_at))
    }
}
