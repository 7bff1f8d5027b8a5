// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler configuration.

use std::time::Duration;

use crate::poller::epoll::DEFAULT_MAX_EVENTS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Event buffer size for the epoll poller.
    pub max_events: usize,
    /// Return from `run` once nothing is tracked or queued. When false the
    /// loop idles in the poller until shut down.
    pub exit_when_idle: bool,
    /// Upper bound on every poll timeout, so the shutdown token and the
    /// spawn queue are checked at least this often.
    pub max_poll_interval: Option<Duration>,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            exit_when_idle: true,
            max_poll_interval: None,
        }
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn exit_when_idle(mut self, exit: bool) -> Self {
        self.exit_when_idle = exit;
        self
    }

    pub fn max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval = Some(interval);
        self
    }

    /// Cap `timeout` by `max_poll_interval`.
    pub(crate) fn cap(&self, timeout: Option<Duration>) -> Option<Duration> {
        match (timeout, self.max_poll_interval) {
            (Some(t), Some(max)) => Some(t.min(max)),
            (None, max) => max,
            (t, None) => t,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}
