// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Scheduler scenarios driven by a manual clock and scripted readiness.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use coop_rt::poller::PollerEvent;
use coop_rt::{
    delegate, from_fn, Clock, Computation, Error, Fault, FaultReport, Interest, ManualClock,
    ManualPoller, Resource, Resume, Scheduler, SchedulerConfig, Step, TaskId, Wait, Yield,
};

type Sched = Scheduler<ManualPoller, ManualClock>;
type Output = Rc<RefCell<Vec<String>>>;

fn scheduler() -> (Sched, ManualClock) {
    let clock = ManualClock::new();
    let poller = ManualPoller::new(clock.clone());
    let sched = Scheduler::with_parts(poller, clock.clone(), SchedulerConfig::default());
    (sched, clock)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Prints its label every `every`, forever.
struct Printer {
    label: &'static str,
    every: Duration,
    out: Output,
}

impl Computation for Printer {
    fn start(&mut self) -> Step {
        Ok(Wait::timer(self.every).into())
    }

    fn resume(&mut self, _value: Option<Resource>) -> Step {
        self.out.borrow_mut().push(self.label.to_string());
        Ok(Wait::timer(self.every).into())
    }
}

/// Waits for `resource` to be readable `times` times, recording each delivery.
fn reader(resource: Resource, times: usize, got: Rc<RefCell<Vec<Resource>>>) -> impl Computation {
    from_fn(move |r| match r {
        Resume::Start => Ok(Wait::readable(resource).into()),
        Resume::Woke => Ok(Yield::Receive),
        Resume::Delivered(ready) => {
            got.borrow_mut().push(ready);
            if got.borrow().len() < times {
                Ok(Wait::readable(resource).into())
            } else {
                Ok(Yield::Done)
            }
        }
    })
}

fn collect_faults(sched: &mut Sched) -> Rc<RefCell<Vec<(TaskId, String)>>> {
    let faults = Rc::new(RefCell::new(Vec::new()));
    let sink = faults.clone();
    sched.on_fault(move |report: &FaultReport| {
        sink.borrow_mut().push((report.task, report.fault.to_string()));
    });
    faults
}

#[test]
fn slow_and_fast_printers() {
    let (mut sched, _) = scheduler();
    let out: Output = Rc::new(RefCell::new(Vec::new()));

    sched
        .spawn(Printer {
            label: "A",
            every: secs(5),
            out: out.clone(),
        })
        .unwrap();
    sched
        .spawn(Printer {
            label: "B",
            every: secs(1),
            out: out.clone(),
        })
        .unwrap();

    sched.run_for(secs(6)).unwrap();

    let lines = out.borrow();
    let a = lines.iter().filter(|l| *l == "A").count();
    let b = lines.iter().filter(|l| *l == "B").count();
    assert_eq!(a, 1);
    assert!((5..=6).contains(&b), "B printed {} times", b);
    assert!(lines.iter().all(|l| l == "A" || l == "B"));
}

#[test]
fn timers_never_resume_early() {
    let (mut sched, clock) = scheduler();
    let spawned = clock.now();
    let woke: Rc<RefCell<Vec<(u64, Instant)>>> = Rc::new(RefCell::new(Vec::new()));

    for delay in [4, 1, 3, 1, 0] {
        let woke = woke.clone();
        let clock = clock.clone();
        sched
            .spawn(from_fn(move |r| match r {
                Resume::Start => Ok(Wait::timer(secs(delay)).into()),
                _ => {
                    woke.borrow_mut().push((delay, clock.now()));
                    Ok(Yield::Done)
                }
            }))
            .unwrap();
    }

    sched.run().unwrap();

    let woke = woke.borrow();
    assert_eq!(woke.len(), 5);
    for (delay, at) in woke.iter() {
        assert!(*at >= spawned + secs(*delay));
    }
    let order: Vec<u64> = woke.iter().map(|(d, _)| *d).collect();
    assert_eq!(order, vec![0, 1, 1, 3, 4]);
}

#[test]
fn readable_wait_receives_its_resource() {
    let (mut sched, _) = scheduler();
    let fd = Resource::from_raw(42);
    let got = Rc::new(RefCell::new(Vec::new()));

    let task = sched.spawn(reader(fd, 1, got.clone())).unwrap().unwrap();
    assert!(sched.is_tracked(task));

    sched.poller_mut().mark_ready(fd);
    assert_eq!(sched.tick().unwrap(), 1);

    assert_eq!(*got.borrow(), vec![fd]);
    assert!(sched.is_empty());
    assert_eq!(
        sched.poller().history(),
        &[
            PollerEvent::Registered(fd, Interest::Read),
            PollerEvent::Unregistered(fd)
        ]
    );
}

#[test]
fn rearmed_resource_unregisters_once_per_maturation() {
    let (mut sched, clock) = scheduler();
    let fd = Resource::from_raw(7);
    let got = Rc::new(RefCell::new(Vec::new()));
    sched.spawn(reader(fd, 3, got.clone())).unwrap();

    let t0 = clock.now();
    for at in [1, 2, 5] {
        sched.poller_mut().mark_ready_at(fd, t0 + secs(at));
    }
    sched.run().unwrap();

    assert_eq!(got.borrow().len(), 3);
    let history = sched.poller().history();
    assert_eq!(history.len(), 6);
    for pair in history.chunks(2) {
        assert_eq!(
            pair,
            &[
                PollerEvent::Registered(fd, Interest::Read),
                PollerEvent::Unregistered(fd)
            ]
        );
    }
    assert_eq!(clock.now() - t0, secs(5));
}

#[test]
fn double_registration_is_rejected() {
    let (mut sched, _) = scheduler();
    let fd = Resource::from_raw(5);
    let got = Rc::new(RefCell::new(Vec::new()));

    sched.spawn(reader(fd, 1, got.clone())).unwrap();
    match sched.spawn(reader(fd, 1, got.clone())) {
        Err(Error::AlreadyRegistered(r)) => assert_eq!(r, fd),
        other => panic!("expected AlreadyRegistered, got {:?}", other),
    }
    assert_eq!(sched.len(), 1);
    assert_eq!(sched.poller().registered(), 1);
}

#[test]
fn rearming_a_taken_resource_faults_only_that_task() {
    let (mut sched, _) = scheduler();
    let fd = Resource::from_raw(8);
    let got = Rc::new(RefCell::new(Vec::new()));
    let faults = collect_faults(&mut sched);

    let holder = sched.spawn(reader(fd, 1, got.clone())).unwrap().unwrap();
    let thief = sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::timer(secs(1)).into()),
            _ => Ok(Wait::writable(fd).into()),
        }))
        .unwrap()
        .unwrap();

    sched.tick().unwrap();

    assert_eq!(faults.borrow().len(), 1);
    assert_eq!(faults.borrow()[0].0, thief);
    assert!(faults.borrow()[0].1.contains("already registered"));
    assert!(sched.is_tracked(holder));
    assert!(!sched.is_tracked(thief));
    assert_eq!(sched.poller().registered(), 1);
}

#[test]
fn faulty_computation_does_not_stall_others() {
    let (mut sched, _) = scheduler();
    let faults = collect_faults(&mut sched);
    let out: Output = Rc::new(RefCell::new(Vec::new()));

    let bad = sched
        .spawn(from_fn(|r| match r {
            Resume::Start => Ok(Wait::timer(secs(1)).into()),
            _ => panic!("computation blew up"),
        }))
        .unwrap()
        .unwrap();
    sched
        .spawn(Printer {
            label: "ok",
            every: secs(1),
            out: out.clone(),
        })
        .unwrap();

    sched.run_for(secs(3)).unwrap();

    assert_eq!(out.borrow().len(), 3);
    let faults = faults.borrow();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].0, bad);
    assert!(faults[0].1.contains("computation blew up"));
    assert!(!sched.is_tracked(bad));
}

#[test]
fn faulted_reader_releases_its_registration() {
    let (mut sched, _) = scheduler();
    let faults = collect_faults(&mut sched);
    let fd = Resource::from_raw(13);

    sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::readable(fd).into()),
            Resume::Woke => Ok(Yield::Receive),
            Resume::Delivered(_) => Err(Fault::failed("short read")),
        }))
        .unwrap();
    sched.poller_mut().mark_ready(fd);
    sched.tick().unwrap();

    assert_eq!(faults.borrow().len(), 1);
    assert!(!sched.poller().is_registered(fd));
    assert!(sched.is_empty());
}

#[test]
fn skipped_handshake_is_a_protocol_violation() {
    let (mut sched, _) = scheduler();
    let faults = collect_faults(&mut sched);
    let fd = Resource::from_raw(21);

    sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::readable(fd).into()),
            _ => Ok(Wait::timer(secs(1)).into()),
        }))
        .unwrap();
    sched.poller_mut().mark_ready(fd);
    sched.tick().unwrap();

    assert!(faults.borrow()[0].1.contains("protocol violation"));
    assert!(sched.is_empty());
    assert_eq!(sched.poller().registered(), 0);
}

#[test]
fn timers_are_not_starved_by_idle_resources() {
    let (mut sched, clock) = scheduler();
    let t0 = clock.now();
    let quiet = Resource::from_raw(30);
    let got = Rc::new(RefCell::new(Vec::new()));
    let out: Output = Rc::new(RefCell::new(Vec::new()));

    sched.spawn(reader(quiet, 1, got.clone())).unwrap();
    let out_in = out.clone();
    sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::timer(secs(2)).into()),
            _ => {
                out_in.borrow_mut().push("tick".into());
                Ok(Yield::Done)
            }
        }))
        .unwrap();

    sched.tick().unwrap();
    assert_eq!(sched.poller().timeouts(), &[Some(secs(2))]);
    assert_eq!(out.borrow().len(), 1);
    assert_eq!(clock.now() - t0, secs(2));
    assert!(got.borrow().is_empty());
}

#[test]
fn cancelled_task_is_never_resumed() {
    let (mut sched, _) = scheduler();
    let out: Output = Rc::new(RefCell::new(Vec::new()));
    let fd = Resource::from_raw(17);
    let got = Rc::new(RefCell::new(Vec::new()));

    let printer = sched
        .spawn(Printer {
            label: "p",
            every: secs(1),
            out: out.clone(),
        })
        .unwrap()
        .unwrap();
    let waiting = sched.spawn(reader(fd, 1, got.clone())).unwrap().unwrap();

    sched.cancel(printer).unwrap();
    sched.cancel(waiting).unwrap();
    sched.poller_mut().mark_ready(fd);

    sched.run().unwrap();
    assert!(out.borrow().is_empty());
    assert!(got.borrow().is_empty());
    assert_eq!(
        sched.poller().history(),
        &[
            PollerEvent::Registered(fd, Interest::Read),
            PollerEvent::Unregistered(fd)
        ]
    );
}

/// Waits for one readable event on `fd` and remembers what was delivered.
struct ReadOnce {
    fd: Resource,
    got: Option<Resource>,
}

impl Computation for ReadOnce {
    fn start(&mut self) -> Step {
        Ok(Wait::readable(self.fd).into())
    }

    fn resume(&mut self, value: Option<Resource>) -> Step {
        match value {
            None => Ok(Yield::Receive),
            Some(ready) => {
                self.got = Some(ready);
                Ok(Yield::Done)
            }
        }
    }
}

#[test]
fn outer_continues_after_delegated_read() {
    let (mut sched, clock) = scheduler();
    let t0 = clock.now();
    let fd = Resource::from_raw(23);
    let out: Output = Rc::new(RefCell::new(Vec::new()));

    let after = out.clone();
    let task = sched
        .spawn(delegate(ReadOnce { fd, got: None }, move |read: ReadOnce| {
            after
                .borrow_mut()
                .push(format!("received {:?}", read.got.map(|r| r.raw())));
            from_fn(move |r| match r {
                Resume::Start => Ok(Wait::timer(secs(1)).into()),
                _ => {
                    after.borrow_mut().push("outer done".into());
                    Ok(Yield::Done)
                }
            })
        }))
        .unwrap()
        .unwrap();

    sched.poller_mut().mark_ready_at(fd, t0 + secs(2));
    sched.run().unwrap();

    assert_eq!(
        *out.borrow(),
        vec!["received Some(23)".to_string(), "outer done".to_string()]
    );
    assert_eq!(clock.now() - t0, secs(3));
    assert!(!sched.is_tracked(task));
    assert_eq!(
        sched.poller().history(),
        &[
            PollerEvent::Registered(fd, Interest::Read),
            PollerEvent::Unregistered(fd)
        ]
    );
}

#[test]
fn guard_cancels_a_stuck_reader_mid_run() {
    let (mut sched, clock) = scheduler();
    let t0 = clock.now();
    let fd = Resource::from_raw(21);
    let got = Rc::new(RefCell::new(Vec::new()));
    let spawner = sched.spawner();

    let waiting = sched.spawn(reader(fd, 1, got.clone())).unwrap().unwrap();
    sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::timer(secs(2)).into()),
            _ => {
                spawner.cancel(waiting);
                Ok(Yield::Done)
            }
        }))
        .unwrap();

    sched.run().unwrap();
    assert!(got.borrow().is_empty());
    assert!(!sched.is_tracked(waiting));
    assert_eq!(clock.now() - t0, secs(2));
    assert_eq!(
        sched.poller().history(),
        &[
            PollerEvent::Registered(fd, Interest::Read),
            PollerEvent::Unregistered(fd)
        ]
    );
}

#[test]
fn cancel_requested_mid_tick_skips_the_sibling() {
    let (mut sched, _) = scheduler();
    let out: Output = Rc::new(RefCell::new(Vec::new()));
    let spawner = sched.spawner();
    let victim = Rc::new(RefCell::new(None::<TaskId>));

    let target = victim.clone();
    let first = out.clone();
    sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::timer(secs(1)).into()),
            _ => {
                first.borrow_mut().push("guard".into());
                if let Some(task) = *target.borrow() {
                    spawner.cancel(task);
                }
                Ok(Yield::Done)
            }
        }))
        .unwrap();
    let second = out.clone();
    let task = sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => Ok(Wait::timer(secs(1)).into()),
            _ => {
                second.borrow_mut().push("victim".into());
                Ok(Yield::Done)
            }
        }))
        .unwrap()
        .unwrap();
    *victim.borrow_mut() = Some(task);

    assert_eq!(sched.tick().unwrap(), 1);
    assert_eq!(*out.borrow(), vec!["guard".to_string()]);
    assert!(sched.is_empty());
}

#[test]
fn spawner_starts_children_on_next_tick() {
    let (mut sched, _) = scheduler();
    let spawner = sched.spawner();
    let out: Output = Rc::new(RefCell::new(Vec::new()));

    let child_out = out.clone();
    let parent_out = out.clone();
    sched
        .spawn(from_fn(move |r| match r {
            Resume::Start => {
                let out = child_out.clone();
                spawner.spawn(from_fn(move |_| {
                    out.borrow_mut().push("child".into());
                    Ok(Yield::Done)
                }));
                Ok(Wait::timer(secs(1)).into())
            }
            _ => {
                parent_out.borrow_mut().push("parent".into());
                Ok(Yield::Done)
            }
        }))
        .unwrap();

    assert!(out.borrow().is_empty());
    sched.tick().unwrap();
    assert_eq!(*out.borrow(), vec!["child".to_string(), "parent".to_string()]);
    assert_eq!(sched.poller().timeouts(), &[Some(secs(1))]);
    assert!(sched.is_idle());
}

#[test]
fn queued_spawn_can_be_cancelled() {
    let (mut sched, _) = scheduler();
    let ran = Rc::new(RefCell::new(false));
    let flag = ran.clone();
    let task = sched.spawner().spawn(from_fn(move |_| {
        *flag.borrow_mut() = true;
        Ok(Yield::Done)
    }));

    sched.cancel(task).unwrap();
    sched.run().unwrap();
    assert!(!*ran.borrow());
}

#[test]
fn queued_spawn_faults_are_reported() {
    let (mut sched, _) = scheduler();
    let faults = collect_faults(&mut sched);
    let task = sched
        .spawner()
        .spawn(from_fn(|_| Err(Fault::failed("no such file"))));

    sched.run().unwrap();
    assert_eq!(faults.borrow().len(), 1);
    assert_eq!(faults.borrow()[0].0, task);
}
