// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Suspendable computations and the coroutine adapter.
//!
//! A [`Computation`] is written as an explicit state machine: `start` runs
//! to the first suspension point, `resume` runs from the last one to the
//! next. Each suspension yields a [`Yield`].
//!
//! Readiness waits use a two-step handshake. When the resource is ready the
//! computation is first resumed with no value and must stop at a bare
//! [`Yield::Receive`]; it is then resumed again with the ready resource.
//! [`Coroutine`] drives that handshake and rejects computations that skip
//! or misplace the receive point.
//!
//! [`delegate`] composes computations: an inner one runs as if it were
//! part of the outer one, and the outer one continues from its final state.

use std::mem;
use std::panic::{self, AssertUnwindSafe, Location};

use crate::condition::Wait;
use crate::error::Fault;
use crate::resource::Resource;

/// What a computation hands back at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Yield {
    /// Block on a timer or readiness wait.
    Wait(Wait),
    /// Bare suspension point asking for the resource of the readiness wait
    /// that just matured.
    Receive,
    /// The computation finished.
    Done,
}

impl From<Wait> for Yield {
    fn from(wait: Wait) -> Self {
        Yield::Wait(wait)
    }
}

pub type Step = Result<Yield, Fault>;

/// A suspendable computation.
pub trait Computation {
    /// Run until the first suspension point.
    fn start(&mut self) -> Step;

    /// Continue from the last suspension point. `value` is `Some` only when
    /// delivering a ready resource to a [`Yield::Receive`].
    fn resume(&mut self, value: Option<Resource>) -> Step;
}

impl<C: Computation + ?Sized> Computation for Box<C> {
    fn start(&mut self) -> Step {
        (**self).start()
    }

    fn resume(&mut self, value: Option<Resource>) -> Step {
        (**self).resume(value)
    }
}

/// How a closure-based computation is being entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    Start,
    /// Woken from a wait, no value delivered.
    Woke,
    /// Receiving the ready resource.
    Delivered(Resource),
}

/// Computation backed by a closure. See [`from_fn`].
pub struct FnComputation<F> {
    f: F,
}

/// Build a computation from a closure that is called once per entry.
pub fn from_fn<F>(f: F) -> FnComputation<F>
where
    F: FnMut(Resume) -> Step,
{
    FnComputation { f }
}

impl<F> Computation for FnComputation<F>
where
    F: FnMut(Resume) -> Step,
{
    fn start(&mut self) -> Step {
        (self.f)(Resume::Start)
    }

    fn resume(&mut self, value: Option<Resource>) -> Step {
        match value {
            Some(resource) => (self.f)(Resume::Delivered(resource)),
            None => (self.f)(Resume::Woke),
        }
    }
}

/// Run `inner` to completion, then continue with `then(inner)`.
///
/// Every wait the inner computation yields, the receive point included,
/// passes straight through to the scheduler, which sees one coroutine.
/// `then` receives the finished inner computation, so whatever it produced
/// is available to the continuation, and the continuation is started in
/// the same step the inner one completes.
pub fn delegate<I, F, O>(inner: I, then: F) -> Delegate<I, F, O>
where
    I: Computation,
    F: FnOnce(I) -> O,
    O: Computation,
{
    Delegate {
        stage: Stage::Inner {
            inner,
            then,
            woken_for_receive: false,
        },
    }
}

/// Computation returned by [`delegate`].
pub struct Delegate<I, F, O> {
    stage: Stage<I, F, O>,
}

enum Stage<I, F, O> {
    Inner {
        inner: I,
        then: F,
        /// The inner computation is parked on a readiness wait, so the next
        /// empty resume must end at a receive point.
        woken_for_receive: bool,
    },
    Outer {
        outer: O,
        /// First suspension of the continuation, held back while the
        /// scheduler finishes a handshake the inner computation walked away
        /// from.
        held: Option<Yield>,
    },
    Spent,
}

impl<I, F, O> Delegate<I, F, O>
where
    I: Computation,
    F: FnOnce(I) -> O,
    O: Computation,
{
    fn after_inner(&mut self, step: Yield, waking: bool) -> Step {
        if step != Yield::Done {
            if let Stage::Inner {
                woken_for_receive, ..
            } = &mut self.stage
            {
                *woken_for_receive = matches!(step, Yield::Wait(Wait::Readiness { .. }));
            }
            return Ok(step);
        }

        let Stage::Inner { inner, then, .. } = mem::replace(&mut self.stage, Stage::Spent) else {
            return Ok(Yield::Done);
        };
        let mut outer = then(inner);
        let first = outer.start()?;
        if waking && first != Yield::Done {
            self.stage = Stage::Outer {
                outer,
                held: Some(first),
            };
            return Ok(Yield::Receive);
        }
        self.stage = Stage::Outer { outer, held: None };
        Ok(first)
    }
}

impl<I, F, O> Computation for Delegate<I, F, O>
where
    I: Computation,
    F: FnOnce(I) -> O,
    O: Computation,
{
    fn start(&mut self) -> Step {
        match &mut self.stage {
            Stage::Inner { inner, .. } => {
                let step = inner.start()?;
                self.after_inner(step, false)
            }
            Stage::Outer { outer, .. } => outer.start(),
            Stage::Spent => Ok(Yield::Done),
        }
    }

    fn resume(&mut self, value: Option<Resource>) -> Step {
        match &mut self.stage {
            Stage::Inner {
                inner,
                woken_for_receive,
                ..
            } => {
                let waking = *woken_for_receive && value.is_none();
                let step = inner.resume(value)?;
                self.after_inner(step, waking)
            }
            Stage::Outer { outer, held } => match held.take() {
                Some(step) => Ok(step),
                None => outer.resume(value),
            },
            Stage::Spent => Ok(Yield::Done),
        }
    }
}

/// Turn a panic payload into text.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn kind(y: &Yield) -> &'static str {
    match y {
        Yield::Wait(Wait::Timer(_)) => "timer wait",
        Yield::Wait(Wait::Readiness { .. }) => "readiness wait",
        Yield::Receive => "bare receive point",
        Yield::Done => "completion",
    }
}

/// Scheduler-side wrapper around a computation.
pub struct Coroutine {
    computation: Box<dyn Computation>,
    /// The wait it is currently suspended on.
    awaiting: Option<Wait>,
    spawned_at: &'static Location<'static>,
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("awaiting", &self.awaiting)
            .field("file", &self.spawned_at.file())
            .field("line", &self.spawned_at.line())
            .finish()
    }
}

impl Coroutine {
    #[track_caller]
    pub fn new(computation: impl Computation + 'static) -> Self {
        Self::spawned_at(Box::new(computation), Location::caller())
    }

    pub(crate) fn spawned_at(
        computation: Box<dyn Computation>,
        location: &'static Location<'static>,
    ) -> Self {
        Self {
            computation,
            awaiting: None,
            spawned_at: location,
        }
    }

    /// Where the computation was spawned from.
    pub fn location(&self) -> &'static Location<'static> {
        self.spawned_at
    }

    pub fn awaiting(&self) -> Option<Wait> {
        self.awaiting
    }

    /// Run to the first suspension point. `Ok(None)` means it completed.
    pub fn start(&mut self) -> Result<Option<Wait>, Fault> {
        let computation = &mut self.computation;
        let step = guarded(|| computation.start());
        self.settle(step)
    }

    /// Resume after the current wait matured.
    ///
    /// Timer waits take one call with no value. Readiness waits take two:
    /// one with no value that must stop at the receive point, then one
    /// delivering `value` (the matured resource if `None` is passed). If the
    /// computation completes in the first call the second is skipped.
    pub fn resume(&mut self, value: Option<Resource>) -> Result<Option<Wait>, Fault> {
        match self.awaiting.take() {
            Some(Wait::Readiness { resource, .. }) => {
                let computation = &mut self.computation;
                match guarded(|| computation.resume(None))? {
                    Yield::Receive => {}
                    Yield::Done => return Ok(None),
                    other => {
                        return Err(Fault::ProtocolViolation {
                            expected: "bare receive point",
                            found: kind(&other),
                        })
                    }
                }
                let delivered = value.unwrap_or(resource);
                let step = guarded(|| computation.resume(Some(delivered)));
                self.settle(step)
            }
            _ => {
                let computation = &mut self.computation;
                let step = guarded(|| computation.resume(None));
                self.settle(step)
            }
        }
    }

    fn settle(&mut self, step: Step) -> Result<Option<Wait>, Fault> {
        match step? {
            Yield::Wait(wait) => {
                self.awaiting = Some(wait);
                Ok(Some(wait))
            }
            Yield::Done => Ok(None),
            Yield::Receive => Err(Fault::ProtocolViolation {
                expected: "wait or completion",
                found: kind(&Yield::Receive),
            }),
        }
    }
}

/// Run one entry into a computation, converting a panic into a fault.
fn guarded(f: impl FnOnce() -> Step) -> Step {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(step) => step,
        Err(payload) => Err(Fault::Panicked(panic_message(payload))),
    }
}
