// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Demo computations.

use std::io::{self, Write};
use std::time::Duration;

use coop_rt::{Computation, Fault, Resource, Step, Wait, Yield};

/// Set a file descriptor to non-blocking mode.
pub fn set_nonblocking(fd: Resource) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd.raw(), libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd.raw(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Non-blocking pipe: (read end, write end).
pub fn pipe() -> io::Result<(Resource, Resource)> {
    let mut fds = [0i32; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((Resource::from_raw(fds[0]), Resource::from_raw(fds[1])))
}

fn read_fd(fd: Resource, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd.raw(), buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn write_fd(fd: Resource, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd.raw(), buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Whole-line print so concurrent printers never interleave mid-line.
fn say(line: &str) -> Result<(), Fault> {
    let mut out = io::stdout().lock();
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}

/// Prints its label every `every`, forever.
pub struct Printer {
    pub label: String,
    pub every: Duration,
}

impl Computation for Printer {
    fn start(&mut self) -> Step {
        Ok(Wait::timer(self.every).into())
    }

    fn resume(&mut self, _value: Option<Resource>) -> Step {
        say(&self.label)?;
        Ok(Wait::timer(self.every).into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Pausing,
    WaitingWritable,
    Receiving,
}

/// Writes `count` numbered lines into a pipe, pausing between them, then
/// closes its end. A line the pipe only takes part of is finished on the
/// next writable wakeup.
pub struct PipeWriter {
    fd: Resource,
    pause: Duration,
    count: usize,
    sent: usize,
    /// Bytes of the current line not yet accepted by the pipe.
    unsent: Vec<u8>,
    state: WriterState,
}

impl PipeWriter {
    pub fn new(fd: Resource, count: usize, pause: Duration) -> Self {
        Self {
            fd,
            pause,
            count,
            sent: 0,
            unsent: Vec::new(),
            state: WriterState::Pausing,
        }
    }

    fn wait_writable(&mut self) -> Step {
        self.state = WriterState::WaitingWritable;
        Ok(Wait::writable(self.fd).into())
    }

    fn flush(&mut self, fd: Resource) -> Step {
        if self.unsent.is_empty() {
            self.sent += 1;
            self.unsent = format!("line {}\n", self.sent).into_bytes();
        }
        match write_fd(fd, &self.unsent) {
            Ok(n) => {
                self.unsent.drain(..n);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
        if !self.unsent.is_empty() {
            log::trace!("writer has {} byte(s) left of line {}", self.unsent.len(), self.sent);
            return self.wait_writable();
        }

        log::debug!("writer sent line {}", self.sent);
        if self.sent == self.count {
            unsafe { libc::close(fd.raw()) };
            return Ok(Yield::Done);
        }
        self.state = WriterState::Pausing;
        Ok(Wait::timer(self.pause).into())
    }
}

impl Computation for PipeWriter {
    fn start(&mut self) -> Step {
        self.state = WriterState::Pausing;
        Ok(Wait::timer(self.pause).into())
    }

    fn resume(&mut self, value: Option<Resource>) -> Step {
        match (self.state, value) {
            (WriterState::Pausing, _) => self.wait_writable(),
            (WriterState::WaitingWritable, None) => {
                self.state = WriterState::Receiving;
                Ok(Yield::Receive)
            }
            (WriterState::Receiving, Some(fd)) => self.flush(fd),
            _ => Err(Fault::failed("writer resumed out of order")),
        }
    }
}

/// Reads from a resource whenever it turns readable and prints what it
/// got, prefixed, until end of file.
pub struct LineReader {
    fd: Resource,
    prefix: &'static str,
    pending: Vec<u8>,
    close_on_eof: bool,
}

impl LineReader {
    pub fn new(fd: Resource, prefix: &'static str, close_on_eof: bool) -> Self {
        Self {
            fd,
            prefix,
            pending: Vec::new(),
            close_on_eof,
        }
    }

    fn flush_lines(&mut self) -> Result<(), Fault> {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            say(&format!("{}{}", self.prefix, text))?;
        }
        Ok(())
    }
}

impl Computation for LineReader {
    fn start(&mut self) -> Step {
        Ok(Wait::readable(self.fd).into())
    }

    fn resume(&mut self, value: Option<Resource>) -> Step {
        let Some(fd) = value else {
            return Ok(Yield::Receive);
        };

        let mut buf = [0u8; 4096];
        let n = match read_fd(fd, &mut buf) {
            Ok(n) => n,
            // Spurious wakeup; wait again.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(Wait::readable(self.fd).into())
            }
            Err(e) => return Err(e.into()),
        };

        if n == 0 {
            if !self.pending.is_empty() {
                self.pending.push(b'\n');
                self.flush_lines()?;
            }
            if self.close_on_eof {
                unsafe { libc::close(fd.raw()) };
            }
            return Ok(Yield::Done);
        }

        self.pending.extend_from_slice(&buf[..n]);
        self.flush_lines()?;
        Ok(Wait::readable(self.fd).into())
    }
}
