// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coop runtime: a single-threaded cooperative scheduler.
//!
//! Computations suspend on timers or on I/O readiness and are resumed by
//! one run loop that polls the OS multiplexer with a timeout bounded by
//! the nearest timer.
//!
//! Components:
//! - resource/condition — what a computation can wait on
//! - coroutine — computation protocol, the handshake-checking adapter and
//!   delegation to inner computations
//! - poller — readiness polling (epoll, scripted)
//! - clock — wall clock and manual clock
//! - scheduler — entry table and run loop
//! - spawn — deferred spawning from inside computations
//! - cancel — external shutdown

pub mod cancel;
pub mod clock;
pub mod condition;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod poller;
pub mod resource;
pub mod scheduler;
pub mod spawn;

pub use cancel::ShutdownToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::{Wait, WaitCondition};
pub use config::SchedulerConfig;
pub use coroutine::{delegate, from_fn, Computation, Coroutine, Delegate, Resume, Step, Yield};
pub use error::{Error, Fault, FaultReport, Result};
pub use poller::{EpollPoller, ManualPoller, ReadinessPoller, ReadySet};
pub use resource::{Interest, Resource};
pub use scheduler::{Scheduler, TaskId};
pub use spawn::Spawner;
