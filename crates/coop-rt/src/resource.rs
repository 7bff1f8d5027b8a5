// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! I/O resources and readiness interest.

use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::str::FromStr;

use crate::error::Error;

/// Handle to a pollable I/O resource (file descriptor or socket).
///
/// The scheduler never owns or closes the underlying descriptor; the
/// computation that yields it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resource(RawFd);

impl Resource {
    pub fn from_raw(fd: RawFd) -> Self {
        Self(fd)
    }

    pub fn of(source: &impl AsRawFd) -> Self {
        Self(source.as_raw_fd())
    }

    pub fn raw(self) -> RawFd {
        self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// What a resource is being waited on for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Read,
    Write,
}

impl FromStr for Interest {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "read" | "readable" => Ok(Interest::Read),
            "write" | "writable" => Ok(Interest::Write),
            other => Err(Error::InvalidInterest(other.to_string())),
        }
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interest::Read => write!(f, "readable"),
            Interest::Write => write!(f, "writable"),
        }
    }
}
