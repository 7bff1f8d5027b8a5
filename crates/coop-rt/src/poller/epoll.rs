// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Epoll-backed readiness poller (Linux).
//!
//! Level-triggered. Registrations are one-shot from the scheduler's point
//! of view: it unregisters every resource once its wait matures.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::resource::{Interest, Resource};

use super::{ReadinessPoller, ReadySet};

/// Default size of the per-poll event buffer.
pub const DEFAULT_MAX_EVENTS: usize = 64;

fn epoll_events(interest: Interest) -> u32 {
    match interest {
        Interest::Read => libc::EPOLLIN as u32,
        Interest::Write => libc::EPOLLOUT as u32,
    }
}

/// Milliseconds for `epoll_wait`, rounded up so a sub-millisecond
/// remainder does not turn into a busy spin.
fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            i32::try_from(ms).unwrap_or(i32::MAX)
        }
    }
}

pub struct EpollPoller {
    epoll_fd: libc::c_int,
    /// Resource → interest it is registered for.
    registrations: HashMap<Resource, Interest>,
    events: Vec<libc::epoll_event>,
}

impl EpollPoller {
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    /// Create a poller that reports at most `max_events` resources per poll.
    pub fn with_capacity(max_events: usize) -> Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(Error::Poll(io::Error::last_os_error()));
        }

        Ok(Self {
            epoll_fd,
            registrations: HashMap::new(),
            events: vec![libc::epoll_event { events: 0, u64: 0 }; max_events.max(1)],
        })
    }

    /// Number of live registrations.
    pub fn registered(&self) -> usize {
        self.registrations.len()
    }
}

impl ReadinessPoller for EpollPoller {
    fn register(&mut self, resource: Resource, interest: Interest) -> Result<()> {
        if self.registrations.contains_key(&resource) {
            return Err(Error::AlreadyRegistered(resource));
        }

        let mut ev = libc::epoll_event {
            events: epoll_events(interest),
            u64: resource.raw() as u64,
        };
        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, resource.raw(), &mut ev)
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // The kernel still has it (e.g. a dup'd fd we lost track of).
            if err.raw_os_error() == Some(libc::EEXIST) {
                return Err(Error::AlreadyRegistered(resource));
            }
            // EPERM (regular files), EBADF and friends are about this fd,
            // not about the epoll instance.
            return Err(Error::Unwatchable {
                resource,
                source: err,
            });
        }

        self.registrations.insert(resource, interest);
        log::trace!("epoll: registered {} for {}", resource, interest);
        Ok(())
    }

    fn unregister(&mut self, resource: Resource) -> Result<()> {
        if self.registrations.remove(&resource).is_none() {
            return Err(Error::NotRegistered(resource));
        }

        let ret = unsafe {
            libc::epoll_ctl(
                self.epoll_fd,
                libc::EPOLL_CTL_DEL,
                resource.raw(),
                std::ptr::null_mut(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // ENOENT / EBADF are expected if the fd was already closed.
            if err.raw_os_error() != Some(libc::ENOENT) && err.raw_os_error() != Some(libc::EBADF)
            {
                return Err(Error::Poll(err));
            }
        }
        log::trace!("epoll: unregistered {}", resource);
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<ReadySet> {
        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(ReadySet::new()); // EINTR: next tick retries.
            }
            return Err(Error::Poll(err));
        }

        let mut ready = ReadySet::with_capacity(n as usize);
        for ev in &self.events[..n as usize] {
            let resource = Resource::from_raw(ev.u64 as libc::c_int);
            if self.registrations.contains_key(&resource) {
                ready.insert(resource);
            }
        }
        Ok(ready)
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        for resource in self.registrations.keys() {
            unsafe {
                libc::epoll_ctl(
                    self.epoll_fd,
                    libc::EPOLL_CTL_DEL,
                    resource.raw(),
                    std::ptr::null_mut(),
                );
            }
        }
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (Resource, Resource) {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(ret, 0);
        (Resource::from_raw(fds[0]), Resource::from_raw(fds[1]))
    }

    fn close(r: Resource) {
        unsafe { libc::close(r.raw()) };
    }

    #[test]
    fn timeout_rounds_up() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(250))), 250);
        assert_eq!(timeout_ms(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }

    #[test]
    fn pipe_readiness() {
        let mut poller = EpollPoller::new().unwrap();
        let (read_end, write_end) = pipe();

        poller.register(read_end, Interest::Read).unwrap();
        assert!(poller.poll(Some(Duration::ZERO)).unwrap().is_empty());

        unsafe {
            libc::write(write_end.raw(), b"x".as_ptr() as *const libc::c_void, 1);
        }

        let ready = poller.poll(Some(Duration::from_millis(100))).unwrap();
        assert!(ready.contains(&read_end));

        poller.unregister(read_end).unwrap();
        close(read_end);
        close(write_end);
    }

    #[test]
    fn write_end_is_writable() {
        let mut poller = EpollPoller::new().unwrap();
        let (read_end, write_end) = pipe();

        poller.register(write_end, Interest::Write).unwrap();
        let ready = poller.poll(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(ready.len(), 1);
        assert!(ready.contains(&write_end));

        poller.unregister(write_end).unwrap();
        close(read_end);
        close(write_end);
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut poller = EpollPoller::new().unwrap();
        let (read_end, write_end) = pipe();

        poller.register(read_end, Interest::Read).unwrap();
        match poller.register(read_end, Interest::Write) {
            Err(Error::AlreadyRegistered(r)) => assert_eq!(r, read_end),
            other => panic!("expected AlreadyRegistered, got {:?}", other),
        }
        assert_eq!(poller.registered(), 1);

        poller.unregister(read_end).unwrap();
        close(read_end);
        close(write_end);
    }

    #[test]
    fn regular_file_is_unwatchable() {
        let mut poller = EpollPoller::new().unwrap();
        let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        let file = std::fs::File::open(manifest).unwrap();
        let resource = Resource::of(&file);

        match poller.register(resource, Interest::Read) {
            Err(Error::Unwatchable { resource: r, source }) => {
                assert_eq!(r, resource);
                assert_eq!(source.raw_os_error(), Some(libc::EPERM));
            }
            other => panic!("expected Unwatchable, got {:?}", other),
        }
        assert_eq!(poller.registered(), 0);
        assert!(poller.poll(Some(Duration::ZERO)).unwrap().is_empty());
    }

    #[test]
    fn unregister_unknown() {
        let mut poller = EpollPoller::new().unwrap();
        assert!(matches!(
            poller.unregister(Resource::from_raw(1234)),
            Err(Error::NotRegistered(_))
        ));
    }

    #[test]
    fn timeout_no_events() {
        let mut poller = EpollPoller::new().unwrap();
        let ready = poller.poll(Some(Duration::from_millis(1))).unwrap();
        assert!(ready.is_empty());
    }
}
