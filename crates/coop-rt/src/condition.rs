// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Wait conditions: what a suspended coroutine is blocked on.
//!
//! A computation yields a [`Wait`] request. The scheduler turns it into a
//! [`WaitCondition`] in the same step it installs the entry, so readiness
//! registrations are never made ahead of time and left dangling.

use std::time::{Duration, Instant};

use crate::error::Result;
use crate::poller::{ReadinessPoller, ReadySet};
use crate::resource::{Interest, Resource};

/// A wait requested by a computation at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Resume after the delay has elapsed.
    Timer(Duration),
    /// Resume once `resource` is ready for `interest`, then receive it
    /// through a bare [`Yield::Receive`](crate::coroutine::Yield::Receive).
    Readiness {
        resource: Resource,
        interest: Interest,
    },
}

impl Wait {
    pub fn timer(delay: Duration) -> Self {
        Wait::Timer(delay)
    }

    pub fn readable(resource: Resource) -> Self {
        Wait::Readiness {
            resource,
            interest: Interest::Read,
        }
    }

    pub fn writable(resource: Resource) -> Self {
        Wait::Readiness {
            resource,
            interest: Interest::Write,
        }
    }

    /// Readiness wait from a textual interest tag (`"readable"`, `"writable"`).
    pub fn readiness(resource: Resource, interest: &str) -> Result<Self> {
        Ok(Wait::Readiness {
            resource,
            interest: interest.parse()?,
        })
    }

    pub fn is_readiness(&self) -> bool {
        matches!(self, Wait::Readiness { .. })
    }
}

/// An installed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    Timer {
        deadline: Instant,
    },
    ResourceReadiness {
        resource: Resource,
        interest: Interest,
    },
}

impl WaitCondition {
    pub fn timer(now: Instant, delay: Duration) -> Self {
        WaitCondition::Timer {
            deadline: now + delay,
        }
    }

    /// Register `resource` with the poller and return the condition
    /// watching it. Nothing is registered if the poller refuses.
    pub fn readiness<P>(poller: &mut P, resource: Resource, interest: Interest) -> Result<Self>
    where
        P: ReadinessPoller + ?Sized,
    {
        poller.register(resource, interest)?;
        Ok(WaitCondition::ResourceReadiness { resource, interest })
    }

    /// Build the condition for a yielded wait.
    pub fn install<P>(wait: Wait, now: Instant, poller: &mut P) -> Result<Self>
    where
        P: ReadinessPoller + ?Sized,
    {
        match wait {
            Wait::Timer(delay) => Ok(Self::timer(now, delay)),
            Wait::Readiness { resource, interest } => Self::readiness(poller, resource, interest),
        }
    }

    pub fn is_mature(&self, now: Instant, ready: &ReadySet) -> bool {
        match self {
            WaitCondition::Timer { deadline } => now >= *deadline,
            WaitCondition::ResourceReadiness { resource, .. } => ready.contains(resource),
        }
    }

    /// Drop the poller registration this condition holds, if any.
    pub fn release<P>(&self, poller: &mut P) -> Result<()>
    where
        P: ReadinessPoller + ?Sized,
    {
        match self {
            WaitCondition::Timer { .. } => Ok(()),
            WaitCondition::ResourceReadiness { resource, .. } => poller.unregister(*resource),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            WaitCondition::Timer { deadline } => Some(*deadline),
            WaitCondition::ResourceReadiness { .. } => None,
        }
    }

    pub fn resource(&self) -> Option<Resource> {
        match self {
            WaitCondition::Timer { .. } => None,
            WaitCondition::ResourceReadiness { resource, .. } => Some(*resource),
        }
    }
}
