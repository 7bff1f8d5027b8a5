// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler and coroutine errors.

use std::io;

use thiserror::Error;

use crate::resource::Resource;
use crate::spawn::TaskId;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the host.
#[derive(Debug, Error)]
pub enum Error {
    /// Readiness interest tag that is neither read nor write.
    #[error("unsupported readiness interest `{0}`")]
    InvalidInterest(String),

    /// The resource already has a live readiness registration.
    #[error("resource {0} is already registered for readiness")]
    AlreadyRegistered(Resource),

    /// The OS refused to watch the resource, e.g. a regular file under
    /// epoll. Only that resource is affected; the poller keeps working.
    #[error("cannot watch {resource}: {source}")]
    Unwatchable {
        resource: Resource,
        #[source]
        source: io::Error,
    },

    /// Unregistering a resource that has no live registration.
    #[error("resource {0} is not registered")]
    NotRegistered(Resource),

    /// Cancelling a task the scheduler is not tracking.
    #[error("task {0} is not tracked by this scheduler")]
    UnknownTask(TaskId),

    /// The OS readiness primitive failed. Fatal for the run loop.
    #[error("readiness poller failed: {0}")]
    Poll(#[source] io::Error),

    /// A computation failed while being started.
    #[error(transparent)]
    Fault(#[from] Fault),
}

/// Why a coroutine was torn down.
#[derive(Debug, Error)]
pub enum Fault {
    /// The computation returned an error.
    #[error("computation failed: {0}")]
    Failed(String),

    /// The computation panicked.
    #[error("computation panicked: {0}")]
    Panicked(String),

    /// The readiness handshake was not followed.
    #[error("protocol violation: expected {expected}, got {found}")]
    ProtocolViolation {
        expected: &'static str,
        found: &'static str,
    },

    /// The next wait could not be installed.
    #[error("could not install wait: {0}")]
    Registration(#[source] Box<Error>),
}

impl Fault {
    /// Shorthand for computations that fail with a message.
    pub fn failed(msg: impl Into<String>) -> Self {
        Fault::Failed(msg.into())
    }
}

impl From<io::Error> for Fault {
    fn from(err: io::Error) -> Self {
        Fault::Failed(err.to_string())
    }
}

/// A fault attributed to the task it tore down.
#[derive(Debug)]
pub struct FaultReport {
    pub task: TaskId,
    pub fault: Fault,
}
