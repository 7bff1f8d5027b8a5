// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! End-to-end runs on the epoll poller and the wall clock.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use coop_rt::{
    from_fn, Error, Fault, Resource, Resume, Scheduler, SchedulerConfig, Wait, Yield,
};

fn pipe() -> (Resource, Resource) {
    let mut fds = [0i32; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
    assert_eq!(ret, 0, "pipe2 failed");
    (Resource::from_raw(fds[0]), Resource::from_raw(fds[1]))
}

fn close(r: Resource) {
    unsafe { libc::close(r.raw()) };
}

#[test]
fn writer_and_reader_exchange_through_a_pipe() {
    let mut sched = Scheduler::new().unwrap();
    let (read_end, write_end) = pipe();
    let received = Rc::new(RefCell::new(Vec::new()));

    // Reader first, so it is already waiting when the data lands.
    let sink = received.clone();
    sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::readable(read_end).into()),
            Resume::Woke => Ok(Yield::Receive),
            Resume::Delivered(fd) => {
                let mut buf = [0u8; 16];
                let n = unsafe {
                    libc::read(fd.raw(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
                };
                if n < 0 {
                    return Err(Fault::from(std::io::Error::last_os_error()));
                }
                sink.borrow_mut().extend_from_slice(&buf[..n as usize]);
                Ok(Yield::Done)
            }
        }))
        .unwrap();

    sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::writable(write_end).into()),
            Resume::Woke => Ok(Yield::Receive),
            Resume::Delivered(fd) => {
                let msg = b"ping";
                let n = unsafe {
                    libc::write(fd.raw(), msg.as_ptr() as *const libc::c_void, msg.len())
                };
                assert_eq!(n, 4);
                Ok(Yield::Done)
            }
        }))
        .unwrap();

    sched.run().unwrap();
    assert_eq!(received.borrow().as_slice(), b"ping");
    assert_eq!(sched.poller().registered(), 0);

    close(read_end);
    close(write_end);
}

#[test]
fn timer_waits_on_the_wall_clock() {
    let mut sched = Scheduler::new().unwrap();
    let started = Instant::now();
    let woke = Rc::new(RefCell::new(None));
    let slot = woke.clone();

    sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::timer(Duration::from_millis(20)).into()),
            _ => {
                *slot.borrow_mut() = Some(Instant::now());
                Ok(Yield::Done)
            }
        }))
        .unwrap();
    sched.run().unwrap();

    let woke = woke.borrow().expect("timer never fired");
    assert!(woke - started >= Duration::from_millis(20));
}

#[test]
fn shutdown_stops_an_idle_loop() {
    let config = SchedulerConfig::new()
        .exit_when_idle(false)
        .max_poll_interval(Duration::from_millis(5));
    let mut sched = Scheduler::with_config(config).unwrap();
    let token = sched.shutdown_token();

    sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::timer(Duration::from_millis(10)).into()),
            _ => {
                token.shutdown();
                Ok(Yield::Done)
            }
        }))
        .unwrap();

    sched.run().unwrap();
    assert!(sched.is_idle());
}

#[test]
fn regular_file_is_refused_at_spawn() {
    let mut sched = Scheduler::new().unwrap();
    let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
    let file = std::fs::File::open(manifest).unwrap();
    let resource = Resource::of(&file);

    let err = sched
        .spawn(from_fn(move |_| Ok(Wait::readable(resource).into())))
        .unwrap_err();
    assert!(matches!(err, Error::Unwatchable { resource: r, .. } if r == resource));
    assert!(sched.is_empty());
    assert_eq!(sched.poller().registered(), 0);
}
